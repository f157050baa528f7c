use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_API_BASE: &str = "https://api.replicate.com";
/// `fofr/sdxl-fresh-ink`
pub const DEFAULT_MODEL_VERSION: &str =
    "8515c238222fa529763ec99b4ba1fa9d32ab5d6ebc82b4281de99e4dbdcec943";
pub const NEGATIVE_PROMPT: &str = "nsfw, nude, explicit content, violence, gore, blood, blurry, low quality, text, watermark, ugly, deformed, distorted";

const IMAGE_SIZE: u32 = 1024;
const GUIDANCE_SCALE: f32 = 7.5;
const INFERENCE_STEPS: u32 = 25;

/// Model input for one generation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub num_outputs: u32,
    pub guidance_scale: f32,
    pub num_inference_steps: u32,
    pub safety_checker: bool,
}

impl GenerationRequest {
    /// The fixed parameter set every design is generated with.
    pub fn for_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: NEGATIVE_PROMPT.to_string(),
            width: IMAGE_SIZE,
            height: IMAGE_SIZE,
            num_outputs: 1,
            guidance_scale: GUIDANCE_SCALE,
            num_inference_steps: INFERENCE_STEPS,
            safety_checker: true,
        }
    }
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Transient result URLs, in model output order. May be empty.
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>>;
}

#[derive(Debug, Error)]
pub enum ReplicateError {
    #[error("REPLICATE_API_TOKEN is not configured")]
    MissingToken,
    #[error("replicate api returned {status}: {detail}")]
    Api { status: u16, detail: String },
    #[error("prediction {id} {status}: {detail}")]
    PredictionFailed {
        id: String,
        status: String,
        detail: String,
    },
    #[error("prediction {id} still running after {polls} polls")]
    TimedOut { id: String, polls: u32 },
}

#[derive(Debug, Clone)]
pub struct ReplicateConfig {
    pub api_token: Option<String>,
    pub api_base: String,
    pub model_version: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            poll_interval: Duration::from_millis(500),
            max_polls: 240,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            PredictionStatus::Succeeded | PredictionStatus::Failed | PredictionStatus::Canceled
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            PredictionStatus::Starting => "starting",
            PredictionStatus::Processing => "processing",
            PredictionStatus::Succeeded => "succeeded",
            PredictionStatus::Failed => "failed",
            PredictionStatus::Canceled => "canceled",
            PredictionStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PredictionOutput {
    Many(Vec<String>),
    One(String),
    Other(Value),
}

impl PredictionOutput {
    fn into_urls(self) -> Vec<String> {
        match self {
            PredictionOutput::Many(urls) => urls,
            PredictionOutput::One(url) => vec![url],
            PredictionOutput::Other(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: PredictionStatus,
    #[serde(default)]
    output: Option<PredictionOutput>,
    #[serde(default)]
    error: Option<Value>,
}

pub struct ReplicateClient {
    http: Client,
    config: ReplicateConfig,
}

impl ReplicateClient {
    pub fn new(config: ReplicateConfig) -> Self {
        Self::with_http_client(Client::new(), config)
    }

    pub fn with_http_client(http: Client, config: ReplicateConfig) -> Self {
        Self { http, config }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_base.trim_end_matches('/'))
    }

    fn token(&self) -> Result<&str, ReplicateError> {
        self.config
            .api_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ReplicateError::MissingToken)
    }

    async fn create_prediction(&self, token: &str, request: &GenerationRequest) -> Result<Prediction> {
        let body = json!({
            "version": self.config.model_version,
            "input": request,
        });
        let response = self
            .http
            .post(self.api_url("/v1/predictions"))
            .bearer_auth(token)
            .header("Prefer", "wait")
            .json(&body)
            .send()
            .await
            .context("failed to reach replicate")?;
        read_prediction(response).await
    }

    async fn fetch_prediction(&self, token: &str, id: &str) -> Result<Prediction> {
        let response = self
            .http
            .get(self.api_url(&format!("/v1/predictions/{id}")))
            .bearer_auth(token)
            .send()
            .await
            .context("failed to poll replicate prediction")?;
        read_prediction(response).await
    }
}

#[async_trait]
impl ImageGenerator for ReplicateClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>> {
        let token = self.token()?;
        info!(
            model_version = %self.config.model_version,
            prompt = %request.prompt,
            "starting image generation"
        );

        let mut prediction = self.create_prediction(token, request).await?;
        let mut polls = 0;
        while !prediction.status.is_terminal() {
            if polls >= self.config.max_polls {
                warn!(prediction_id = %prediction.id, polls, "prediction did not settle");
                return Err(ReplicateError::TimedOut {
                    id: prediction.id,
                    polls,
                }
                .into());
            }
            tokio::time::sleep(self.config.poll_interval).await;
            polls += 1;
            prediction = self.fetch_prediction(token, &prediction.id).await?;
            debug!(
                prediction_id = %prediction.id,
                status = prediction.status.as_str(),
                "polled prediction"
            );
        }

        if prediction.status != PredictionStatus::Succeeded {
            let detail = prediction
                .error
                .map(render_error)
                .unwrap_or_else(|| "no error detail".to_string());
            return Err(ReplicateError::PredictionFailed {
                id: prediction.id,
                status: prediction.status.as_str().to_string(),
                detail,
            }
            .into());
        }

        let urls = prediction
            .output
            .map(PredictionOutput::into_urls)
            .unwrap_or_default();
        info!(prediction_id = %prediction.id, outputs = urls.len(), "image generation finished");
        Ok(urls)
    }
}

async fn read_prediction(response: Response) -> Result<Prediction> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ReplicateError::Api {
            status: status.as_u16(),
            detail: api_error_detail(&body),
        }
        .into());
    }
    response
        .json::<Prediction>()
        .await
        .context("unexpected prediction payload from replicate")
}

fn api_error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("detail").cloned())
        .map(render_error)
        .unwrap_or_else(|| body.trim().to_string())
}

fn render_error(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
