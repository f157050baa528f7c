use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StyleKey {
    #[default]
    Traditional,
    NeoTraditional,
    Irezumi,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown tattoo style '{0}'")]
pub struct StyleParseError(pub String);

impl StyleKey {
    pub const ALL: [StyleKey; 3] = [
        StyleKey::Traditional,
        StyleKey::NeoTraditional,
        StyleKey::Irezumi,
    ];

    pub fn key(self) -> &'static str {
        match self {
            StyleKey::Traditional => "traditional",
            StyleKey::NeoTraditional => "neoTraditional",
            StyleKey::Irezumi => "irezumi",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            StyleKey::Traditional => "Traditional American",
            StyleKey::NeoTraditional => "Neo-Traditional",
            StyleKey::Irezumi => "Irezumi",
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            StyleKey::Traditional => {
                "bold lines, classic colors, white background, vector ink, Traditional American tattoo of"
            }
            StyleKey::NeoTraditional => {
                "bold lines, classic colors, white background, vector ink, Neo-Traditional tattoo of"
            }
            StyleKey::Irezumi => {
                "bold lines, classic colors, white background, vector ink, Irezumi tattoo of"
            }
        }
    }

    /// Prompt actually sent to the generator.
    pub fn compose(self, user_prompt: &str) -> String {
        format!("{} {}", self.prefix(), user_prompt)
    }
}

impl fmt::Display for StyleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for StyleKey {
    type Err = StyleParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        StyleKey::ALL
            .into_iter()
            .find(|style| style.key() == trimmed)
            .ok_or_else(|| StyleParseError(trimmed.to_string()))
    }
}

#[cfg(test)]
#[path = "tests/style_tests.rs"]
mod tests;
