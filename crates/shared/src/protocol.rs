use serde::{Deserialize, Serialize};

use crate::{domain::GeneratedDesign, style::StyleKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateDesignRequest {
    pub prompt: String,
    /// Raw style key; parsed at the boundary so unknown keys are reported
    /// as validation failures rather than body decoding errors.
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignHistoryResponse {
    pub designs: Vec<GeneratedDesign>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleSummary {
    pub key: StyleKey,
    pub name: String,
    pub prefix: String,
}

impl From<StyleKey> for StyleSummary {
    fn from(style: StyleKey) -> Self {
        Self {
            key: style,
            name: style.display_name().to_string(),
            prefix: style.prefix().to_string(),
        }
    }
}
