//! Clients for the hosted Supabase services: object storage, the PostgREST
//! table API and the auth server.

use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use thiserror::Error;

mod auth;
mod blob_store;
mod record_store;

pub use auth::{AuthError, SupabaseAuth};
pub use blob_store::SupabaseBlobStore;
pub use record_store::PostgrestRecordStore;

pub const DEFAULT_BUCKET: &str = "tattogenerator";
pub const DEFAULT_TABLE: &str = "generated_images";

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project base URL, e.g. `https://abcd.supabase.co`.
    pub url: String,
    /// Anon or service-role key, sent as both `apikey` and bearer token.
    pub api_key: String,
    pub bucket: String,
    pub table: String,
    /// HS256 secret for verifying access tokens locally. When absent tokens
    /// are checked against the auth server instead.
    pub jwt_secret: Option<String>,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            bucket: DEFAULT_BUCKET.to_string(),
            table: DEFAULT_TABLE.to_string(),
            jwt_secret: None,
        }
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.url.trim_end_matches('/'))
    }

    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

#[derive(Debug, Error)]
pub enum SupabaseError {
    #[error("{service} returned {status}: {message}")]
    Rejected {
        service: &'static str,
        status: u16,
        message: String,
    },
    #[error("upload succeeded but no path was returned")]
    MissingPath,
}

/// Passes successful responses through and turns anything else into a
/// [`SupabaseError::Rejected`] carrying the service's own message.
pub(crate) async fn check_response(
    service: &'static str,
    response: Response,
) -> Result<Response, SupabaseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SupabaseError::Rejected {
        service,
        status: status.as_u16(),
        message: error_message(&body),
    })
}

fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    ["message", "error_description", "error", "msg"]
        .iter()
        .find_map(|field| value.get(*field).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
