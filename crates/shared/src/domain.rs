use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::style::StyleKey;

macro_rules! text_id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                // Hosted stores hand back either bigint or uuid keys.
                #[derive(Deserialize)]
                #[serde(untagged)]
                enum Raw {
                    Text(String),
                    Number(i64),
                }

                Ok(match Raw::deserialize(deserializer)? {
                    Raw::Text(text) => Self(text),
                    Raw::Number(number) => Self(number.to_string()),
                })
            }
        }
    };
}

text_id_newtype!(UserId);
text_id_newtype!(DesignId);

/// Row persisted in the `generated_images` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedDesign {
    pub id: DesignId,
    pub user_id: UserId,
    pub url: String,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GeneratedDesign {
    /// The prompt the user typed, without the style phrase that was prepended
    /// before generation.
    pub fn user_prompt(&self) -> &str {
        StyleKey::ALL
            .iter()
            .find_map(|style| {
                self.prompt
                    .strip_prefix(style.prefix())
                    .and_then(|rest| rest.strip_prefix(' '))
            })
            .unwrap_or(&self.prompt)
    }

    pub fn download_filename(&self) -> String {
        format!(
            "tattoo-{}.png",
            self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }
}

/// Insert payload; id and timestamps are assigned by the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDesign {
    pub user_id: UserId,
    pub url: String,
    pub prompt: String,
}

/// The authenticated identity attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

pub fn describe_age(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(created_at);
    let days = elapsed.num_days();
    let hours = elapsed.num_hours();
    let minutes = elapsed.num_minutes();

    if days > 0 {
        format!("{days} {} ago", if days == 1 { "day" } else { "days" })
    } else if hours > 0 {
        format!("{hours} {} ago", if hours == 1 { "hour" } else { "hours" })
    } else if minutes > 0 {
        format!(
            "{minutes} {} ago",
            if minutes == 1 { "minute" } else { "minutes" }
        )
    } else {
        "Just now".to_string()
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
