use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use replicate_integration::{GenerationRequest, ImageGenerator};
use reqwest::Client;
use shared::{
    domain::{GeneratedDesign, NewDesign, UserId},
    error::{ApiError, ErrorCode},
    style::StyleKey,
};
use storage::{BlobStore, RecordStore};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{HISTORY_LIMIT, IMAGE_CONTENT_TYPE};

/// Failure of one generation request, rendered as the text shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Please enter a prompt")]
    EmptyPrompt,
    #[error("Please sign in to generate images")]
    AuthRequired,
    #[error("A design is already being generated")]
    SubmissionInFlight,
    #[error("Failed to generate image: {0}")]
    Generation(String),
    #[error("Failed to fetch image: {0}")]
    Fetch(String),
    #[error("Storage upload failed: {0}")]
    Upload(String),
    #[error("Database save failed: {0}")]
    Persist(String),
    #[error("Design was saved but the database did not return it")]
    NotReturned,
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::EmptyPrompt => ErrorCode::Validation,
            PipelineError::AuthRequired => ErrorCode::Unauthorized,
            PipelineError::SubmissionInFlight => ErrorCode::Conflict,
            PipelineError::Generation(_)
            | PipelineError::Fetch(_)
            | PipelineError::Upload(_)
            | PipelineError::Persist(_)
            | PipelineError::NotReturned => ErrorCode::Upstream,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(value: PipelineError) -> Self {
        ApiError::new(value.code(), value.to_string())
    }
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Downloads generator output over plain HTTP.
pub struct HttpImageSource {
    http: Client,
}

impl HttpImageSource {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("image host unreachable")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{status}"));
        }
        let bytes = response.bytes().await.context("image download interrupted")?;
        Ok(bytes.to_vec())
    }
}

/// Blob key for a design created at `created_at_millis`.
pub fn object_key(user_id: &UserId, created_at_millis: i64) -> String {
    format!("{user_id}/{created_at_millis}.png")
}

/// Sequences generate, fetch, upload and insert for one request.
///
/// Stages run strictly in order and the first failure ends the request.
/// Nothing is retried and nothing already written upstream is undone.
pub struct DesignPipeline {
    generator: Arc<dyn ImageGenerator>,
    images: Arc<dyn ImageSource>,
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
}

impl DesignPipeline {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        images: Arc<dyn ImageSource>,
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            generator,
            images,
            blobs,
            records,
        }
    }

    pub async fn submit(
        &self,
        prompt: &str,
        style: StyleKey,
        user_id: Option<&UserId>,
    ) -> Result<GeneratedDesign, PipelineError> {
        if prompt.trim().is_empty() {
            return Err(PipelineError::EmptyPrompt);
        }
        let user_id = user_id.ok_or(PipelineError::AuthRequired)?;

        let full_prompt = style.compose(prompt);
        info!(%user_id, style = %style, prompt = %full_prompt, "starting design generation");

        let outputs = self
            .generator
            .generate(&GenerationRequest::for_prompt(full_prompt.clone()))
            .await
            .map_err(|e| {
                error!(%user_id, error = %format!("{e:#}"), "generation failed");
                PipelineError::Generation(format!("{e:#}"))
            })?;
        let transient_url = outputs
            .into_iter()
            .next()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                error!(%user_id, "generator returned no image");
                PipelineError::Generation("No image was generated".to_string())
            })?;
        info!(%user_id, %transient_url, "image generated");

        let bytes = self.images.fetch(&transient_url).await.map_err(|e| {
            error!(%transient_url, error = %format!("{e:#}"), "image fetch failed");
            PipelineError::Fetch(format!("{e:#}"))
        })?;

        let key = object_key(user_id, Utc::now().timestamp_millis());
        let uploaded = self
            .blobs
            .upload(&key, bytes, IMAGE_CONTENT_TYPE)
            .await
            .map_err(|e| {
                error!(%key, error = %format!("{e:#}"), "upload failed");
                PipelineError::Upload(format!("{e:#}"))
            })?;
        let url = self.blobs.public_url(&uploaded.path);
        info!(path = %uploaded.path, %url, "image stored");

        let inserted = self
            .records
            .insert_design(&NewDesign {
                user_id: user_id.clone(),
                url: url.clone(),
                prompt: full_prompt,
            })
            .await
            .map_err(|e| {
                warn!(%url, "blob left without a record");
                error!(%user_id, error = %format!("{e:#}"), "record insert failed");
                PipelineError::Persist(format!("{e:#}"))
            })?;
        let Some(design) = inserted else {
            warn!(%url, "record store accepted the insert but returned no row");
            return Err(PipelineError::NotReturned);
        };

        info!(%user_id, design_id = %design.id, "design saved");
        Ok(design)
    }

    /// Most recent designs for `user_id`, newest first. Store failures read
    /// as an empty history.
    pub async fn load_history(&self, user_id: &UserId) -> Vec<GeneratedDesign> {
        match self.records.recent_designs(user_id, HISTORY_LIMIT).await {
            Ok(mut designs) => {
                designs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                designs.truncate(HISTORY_LIMIT as usize);
                info!(%user_id, count = designs.len(), "loaded history");
                designs
            }
            Err(e) => {
                error!(%user_id, error = %format!("{e:#}"), "failed to load history");
                Vec::new()
            }
        }
    }

    /// Public URLs of every object stored under the user's prefix, including
    /// ones whose record insert never happened.
    pub async fn stored_objects(&self, user_id: &UserId) -> Vec<String> {
        match self.blobs.list_public_urls(user_id.as_str()).await {
            Ok(urls) => urls,
            Err(e) => {
                error!(%user_id, error = %format!("{e:#}"), "failed to list stored objects");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/pipeline_tests.rs"]
mod tests;
