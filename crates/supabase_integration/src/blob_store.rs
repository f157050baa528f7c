use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use storage::{BlobStore, UploadedBlob};
use tracing::{debug, info};

use crate::{check_response, SupabaseConfig, SupabaseError};

const LIST_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "Key", default)]
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
}

/// Supabase Storage bucket addressed through its REST API.
#[derive(Clone)]
pub struct SupabaseBlobStore {
    http: Client,
    config: SupabaseConfig,
}

impl SupabaseBlobStore {
    pub fn new(http: Client, config: SupabaseConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl BlobStore for SupabaseBlobStore {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadedBlob> {
        let size = bytes.len();
        info!(bucket = %self.config.bucket, key, size, "uploading object");

        let request = self
            .http
            .post(self.config.endpoint(&format!(
                "/storage/v1/object/{}/{key}",
                self.config.bucket
            )))
            .header("content-type", content_type)
            .header("x-upsert", "true")
            .header("cache-control", "max-age=3600")
            .body(bytes);
        let response = self
            .config
            .authorize(request)
            .send()
            .await
            .context("failed to reach supabase storage")?;
        let response = check_response("storage", response).await?;
        let body: UploadResponse = response
            .json()
            .await
            .context("unexpected upload response from supabase storage")?;

        // `Key` is "<bucket>/<path>"; callers only ever want the path.
        let bucket_prefix = format!("{}/", self.config.bucket);
        let path = body
            .key
            .map(|full| {
                full.strip_prefix(&bucket_prefix)
                    .map(str::to_string)
                    .unwrap_or(full)
            })
            .filter(|path| !path.is_empty())
            .ok_or(SupabaseError::MissingPath)?;

        debug!(path = %path, "object stored");
        Ok(UploadedBlob { path })
    }

    fn public_url(&self, path: &str) -> String {
        self.config.endpoint(&format!(
            "/storage/v1/object/public/{}/{path}",
            self.config.bucket
        ))
    }

    async fn list_public_urls(&self, prefix: &str) -> Result<Vec<String>> {
        let request = self
            .http
            .post(self.config.endpoint(&format!(
                "/storage/v1/object/list/{}",
                self.config.bucket
            )))
            .json(&json!({
                "prefix": prefix,
                "limit": LIST_LIMIT,
                "offset": 0,
                "sortBy": { "column": "created_at", "order": "desc" },
            }));
        let response = self
            .config
            .authorize(request)
            .send()
            .await
            .context("failed to reach supabase storage")?;
        let objects: Vec<ListedObject> = check_response("storage", response)
            .await?
            .json()
            .await
            .context("unexpected list response from supabase storage")?;

        Ok(objects
            .into_iter()
            .map(|object| self.public_url(&format!("{prefix}/{}", object.name)))
            .collect())
    }
}
