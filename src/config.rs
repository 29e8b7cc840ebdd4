//! Server configuration
//!
//! Every flag of `conversar serve` can also come from a `CONVERSAR_*`
//! environment variable; the hub token is read from `HF_TOKEN`.

use std::{net::SocketAddr, path::PathBuf};

use clap::Args;

use crate::{
    error::{ConversarError, Result},
    quantization::QuantizationMode,
};

/// Options for `conversar serve`
#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Host to bind to
    #[arg(short = 'H', long, env = "CONVERSAR_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind to
    #[arg(short, long, env = "CONVERSAR_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Quantization for models loaded implicitly by completion requests (4bit, 8bit, none)
    #[arg(
        short,
        long,
        env = "CONVERSAR_QUANTIZATION",
        default_value = "4bit",
        value_parser = parse_quantization
    )]
    pub quantization: QuantizationMode,

    /// Models to load before accepting requests (comma separated)
    #[arg(long, env = "CONVERSAR_PRELOAD", value_delimiter = ',')]
    pub preload: Vec<String>,

    /// Hugging Face access token for gated repositories
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    /// Hub download cache directory
    #[arg(long, env = "CONVERSAR_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Repository revision to fetch
    #[arg(long, env = "CONVERSAR_REVISION", default_value = "main")]
    pub revision: String,

    /// Repository lending `tokenizer.json` to GGUF repositories that ship none
    #[arg(long, env = "CONVERSAR_TOKENIZER_REPO")]
    pub tokenizer_repo: Option<String>,

    /// Never use an accelerator
    #[arg(long, env = "CONVERSAR_CPU")]
    pub cpu: bool,

    /// Serve the deterministic mock backend instead of real models
    #[arg(long, env = "CONVERSAR_DEMO")]
    pub demo: bool,
}

fn parse_quantization(value: &str) -> std::result::Result<QuantizationMode, String> {
    value.parse().map_err(|e: ConversarError| e.to_string())
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            quantization: QuantizationMode::default(),
            preload: Vec::new(),
            hf_token: None,
            cache_dir: None,
            revision: "main".to_string(),
            tokenizer_repo: None,
            cpu: false,
            demo: false,
        }
    }
}

impl ServerConfig {
    /// Bind address
    ///
    /// # Errors
    ///
    /// Returns error if `host:port` is not a socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                ConversarError::InvalidConfiguration(format!(
                    "invalid bind address {}:{}: {e}",
                    self.host, self.port
                ))
            })
    }

    /// Check the configuration before starting the server
    ///
    /// # Errors
    ///
    /// Returns error if the bind address is invalid or a preload entry is blank
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if self.preload.iter().any(|id| id.trim().is_empty()) {
            return Err(ConversarError::InvalidConfiguration(
                "empty model identifier in --preload".to_string(),
            ));
        }
        if self
            .tokenizer_repo
            .as_deref()
            .is_some_and(|repo| repo.trim().is_empty())
        {
            return Err(ConversarError::InvalidConfiguration(
                "tokenizer repository must not be empty".to_string(),
            ));
        }
        if self.revision.trim().is_empty() {
            return Err(ConversarError::InvalidConfiguration(
                "revision must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Hub settings for the candle loader
    #[cfg(feature = "candle")]
    #[must_use]
    pub fn hub_config(&self) -> crate::backend::candle::HubConfig {
        crate::backend::candle::HubConfig {
            token: self.hf_token.clone(),
            cache_dir: self.cache_dir.clone(),
            revision: self.revision.clone(),
            tokenizer_repo: self.tokenizer_repo.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: ServerConfig,
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.quantization, QuantizationMode::FourBit);
        assert!(config.validate().is_ok());
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:8000");
    }

    #[test]
    fn test_parse_flags() {
        let cli = TestCli::try_parse_from([
            "conversar",
            "--port",
            "9001",
            "--quantization",
            "8BIT",
            "--preload",
            "org/a,org/b",
            "--cpu",
        ])
        .unwrap();
        assert_eq!(cli.config.port, 9001);
        assert_eq!(cli.config.quantization, QuantizationMode::EightBit);
        assert_eq!(cli.config.preload, vec!["org/a", "org/b"]);
        assert!(cli.config.cpu);
        assert!(!cli.config.demo);
    }

    #[test]
    fn test_tokenizer_repo_flag() {
        let cli = TestCli::try_parse_from([
            "conversar",
            "--tokenizer-repo",
            "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
        ])
        .unwrap();
        assert_eq!(
            cli.config.tokenizer_repo.as_deref(),
            Some("TinyLlama/TinyLlama-1.1B-Chat-v1.0")
        );
        assert!(cli.config.validate().is_ok());

        let blank = ServerConfig {
            tokenizer_repo: Some(String::new()),
            ..ServerConfig::default()
        };
        assert!(blank.validate().is_err());
    }

    #[cfg(feature = "candle")]
    #[test]
    fn test_hub_config_carries_tokenizer_repo() {
        let config = ServerConfig {
            tokenizer_repo: Some("org/base".to_string()),
            ..ServerConfig::default()
        };
        assert_eq!(config.hub_config().tokenizer_repo.as_deref(), Some("org/base"));
    }

    #[test]
    fn test_rejects_unknown_quantization() {
        let result = TestCli::try_parse_from(["conversar", "--quantization", "2bit"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_host() {
        let config = ServerConfig {
            host: "not a host".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConversarError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_blank_preload_rejected() {
        let config = ServerConfig {
            preload: vec!["org/a".to_string(), " ".to_string()],
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
