//! Weight quantization modes
//!
//! The mode is a request, not a guarantee: reduced precision is only applied when
//! the model is placed on an accelerator. On CPU the model loads at full precision
//! and the registry records [`QuantizationMode::None`] as the effective mode.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ConversarError;

/// Requested weight precision for a model load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QuantizationMode {
    /// 4-bit weights (GGUF `Q4_K_M`, falling back to `Q4_0`)
    #[default]
    #[serde(rename = "4bit")]
    FourBit,
    /// 8-bit weights (GGUF `Q8_0`)
    #[serde(rename = "8bit")]
    EightBit,
    /// Full precision (F16 on accelerators, F32 on CPU)
    #[serde(rename = "none")]
    None,
}

impl QuantizationMode {
    /// Wire/CLI name of the mode
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FourBit => "4bit",
            Self::EightBit => "8bit",
            Self::None => "none",
        }
    }

    /// Mode that will actually be applied on a device
    ///
    /// Quantized kernels are only used on accelerators.
    #[must_use]
    pub const fn effective(self, accelerator: bool) -> Self {
        if accelerator {
            self
        } else {
            Self::None
        }
    }

    /// Whether weights are loaded in reduced precision
    #[must_use]
    pub const fn is_quantized(self) -> bool {
        !matches!(self, Self::None)
    }

    /// GGUF file-name tags accepted for this mode, in order of preference
    #[must_use]
    pub const fn gguf_tags(self) -> &'static [&'static str] {
        match self {
            Self::FourBit => &["q4_k_m", "q4_k_s", "q4_0"],
            Self::EightBit => &["q8_0"],
            Self::None => &[],
        }
    }
}

impl fmt::Display for QuantizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuantizationMode {
    type Err = ConversarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "4bit" | "int4" | "q4" => Ok(Self::FourBit),
            "8bit" | "int8" | "q8" => Ok(Self::EightBit),
            "none" | "fp16" | "f16" | "full" => Ok(Self::None),
            other => Err(ConversarError::InvalidConfiguration(format!(
                "unknown quantization mode '{other}' (expected 4bit, 8bit or none)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_four_bit() {
        assert_eq!(QuantizationMode::default(), QuantizationMode::FourBit);
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("4bit".parse::<QuantizationMode>().unwrap(), QuantizationMode::FourBit);
        assert_eq!("8BIT".parse::<QuantizationMode>().unwrap(), QuantizationMode::EightBit);
        assert_eq!(" none ".parse::<QuantizationMode>().unwrap(), QuantizationMode::None);
        assert!("3bit".parse::<QuantizationMode>().is_err());
    }

    #[test]
    fn test_effective_on_cpu_is_none() {
        assert_eq!(QuantizationMode::FourBit.effective(false), QuantizationMode::None);
        assert_eq!(QuantizationMode::EightBit.effective(false), QuantizationMode::None);
        assert_eq!(QuantizationMode::EightBit.effective(true), QuantizationMode::EightBit);
    }

    #[test]
    fn test_serde_names_match_display() {
        for mode in [
            QuantizationMode::FourBit,
            QuantizationMode::EightBit,
            QuantizationMode::None,
        ] {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{mode}\""));
        }
    }

    #[test]
    fn test_gguf_tags() {
        assert!(QuantizationMode::None.gguf_tags().is_empty());
        assert_eq!(QuantizationMode::EightBit.gguf_tags(), &["q8_0"]);
        assert_eq!(QuantizationMode::FourBit.gguf_tags()[0], "q4_k_m");
    }
}
