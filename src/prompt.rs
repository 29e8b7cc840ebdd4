//! Chat prompt flattening
//!
//! Turns an ordered list of chat messages into the plain-text prompt fed to the
//! model. Each recognized turn becomes a role-labelled block followed by a blank
//! line, and the prompt ends with an open `Assistant: ` cue:
//!
//! ```text
//! System: You are terse.
//!
//! User: Hi
//!
//! Assistant:
//! ```
//!
//! Messages with an unrecognized role contribute nothing.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Cue appended after the last turn
pub const ASSISTANT_CUE: &str = "Assistant: ";

/// Recognized chat roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the assistant
    System,
    /// End-user turn
    User,
    /// Prior model turn
    Assistant,
}

impl Role {
    /// Label written in front of the message content
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::System => "System",
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }

    /// Parse a wire role; `None` for anything unrecognized
    #[must_use]
    pub fn parse(role: &str) -> Option<Self> {
        role.parse().ok()
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(()),
        }
    }
}

/// Flatten `(role, content)` turns into a single prompt
///
/// Roles are matched exactly (`"User"` is not `"user"`).
pub fn format_messages<'a, I>(turns: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut prompt = String::new();
    for (role, content) in turns {
        let Some(role) = Role::parse(role) else {
            tracing::debug!(role, "skipping message with unrecognized role");
            continue;
        };
        prompt.push_str(role.label());
        prompt.push_str(": ");
        prompt.push_str(content);
        prompt.push_str("\n\n");
    }
    prompt.push_str(ASSISTANT_CUE);
    prompt
}

/// Approximate token count: number of whitespace-separated words
///
/// Not a tokenizer count. Used for the `usage` block of completion responses.
/// Separators are Unicode whitespace plus the ASCII information separators
/// `\x1c`..=`\x1f`.
#[must_use]
pub fn approximate_token_count(text: &str) -> usize {
    text.split(is_word_separator)
        .filter(|word| !word.is_empty())
        .count()
}

fn is_word_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '\x1c'..='\x1f')
}
