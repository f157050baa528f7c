//! In-memory stand-ins for the remote collaborators.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use replicate_integration::{GenerationRequest, ImageGenerator};
use shared::domain::{DesignId, GeneratedDesign, NewDesign, UserId};
use storage::{BlobStore, RecordStore, UploadedBlob};
use tokio::sync::Mutex;

use crate::{pipeline::ImageSource, DesignPipeline};

pub const STORE_BASE: &str = "https://proj.supabase.co/storage/v1/object/public/tattogenerator";

#[derive(Default)]
pub struct FakeGenerator {
    pub outputs: Vec<String>,
    pub fail_with: Option<String>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

#[async_trait]
impl ImageGenerator for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>> {
        self.requests.lock().await.push(request.clone());
        if let Some(err) = &self.fail_with {
            return Err(anyhow!(err.clone()));
        }
        Ok(self.outputs.clone())
    }
}

#[derive(Default)]
pub struct FakeImages {
    pub fail_with: Option<String>,
    pub fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageSource for FakeImages {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetched.lock().await.push(url.to_string());
        if let Some(err) = &self.fail_with {
            return Err(anyhow!(err.clone()));
        }
        Ok(b"\x89PNG fake".to_vec())
    }
}

#[derive(Default)]
pub struct FakeBlobs {
    pub fail_with: Option<String>,
    pub uploads: Mutex<Vec<(String, usize, String)>>,
}

#[async_trait]
impl BlobStore for FakeBlobs {
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<UploadedBlob> {
        if let Some(err) = &self.fail_with {
            return Err(anyhow!(err.clone()));
        }
        self.uploads
            .lock()
            .await
            .push((key.to_string(), bytes.len(), content_type.to_string()));
        Ok(UploadedBlob {
            path: key.to_string(),
        })
    }

    fn public_url(&self, path: &str) -> String {
        format!("{STORE_BASE}/{path}")
    }

    async fn list_public_urls(&self, prefix: &str) -> Result<Vec<String>> {
        if let Some(err) = &self.fail_with {
            return Err(anyhow!(err.clone()));
        }
        Ok(self
            .uploads
            .lock()
            .await
            .iter()
            .filter(|(key, _, _)| key.starts_with(&format!("{prefix}/")))
            .map(|(key, _, _)| self.public_url(key))
            .collect())
    }
}

#[derive(Default)]
pub struct FakeRecords {
    pub fail_insert: Option<String>,
    pub fail_select: Option<String>,
    pub return_nothing: bool,
    pub rows: Mutex<Vec<GeneratedDesign>>,
    pub inserts: AtomicUsize,
    pub selects: AtomicUsize,
}

impl FakeRecords {
    /// Seeds `count` rows for `user`, one minute apart, oldest first.
    pub async fn seed(&self, user: &str, count: usize) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut rows = self.rows.lock().await;
        for n in 0..count {
            let at = start + Duration::minutes(n as i64);
            rows.push(GeneratedDesign {
                id: DesignId(format!("{user}-{n}")),
                user_id: UserId::from(user),
                url: format!("{STORE_BASE}/{user}/{n}.png"),
                prompt: format!("seed {n}"),
                created_at: at,
                updated_at: at,
            });
        }
    }
}

#[async_trait]
impl RecordStore for FakeRecords {
    async fn insert_design(&self, design: &NewDesign) -> Result<Option<GeneratedDesign>> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.fail_insert {
            return Err(anyhow!(err.clone()));
        }
        if self.return_nothing {
            return Ok(None);
        }
        let mut rows = self.rows.lock().await;
        let now = Utc::now();
        let row = GeneratedDesign {
            id: DesignId(format!("row-{}", rows.len() + 1)),
            user_id: design.user_id.clone(),
            url: design.url.clone(),
            prompt: design.prompt.clone(),
            created_at: now,
            updated_at: now,
        };
        rows.push(row.clone());
        Ok(Some(row))
    }

    async fn recent_designs(&self, user_id: &UserId, limit: u32) -> Result<Vec<GeneratedDesign>> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.fail_select {
            return Err(anyhow!(err.clone()));
        }
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .await
            .iter()
            .filter(|row| &row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

pub struct Harness {
    pub generator: Arc<FakeGenerator>,
    pub images: Arc<FakeImages>,
    pub blobs: Arc<FakeBlobs>,
    pub records: Arc<FakeRecords>,
}

impl Harness {
    pub fn working() -> Self {
        Self::with(
            FakeGenerator {
                outputs: vec!["https://replicate.delivery/out-0.png".to_string()],
                ..FakeGenerator::default()
            },
            FakeImages::default(),
            FakeBlobs::default(),
            FakeRecords::default(),
        )
    }

    pub fn with(
        generator: FakeGenerator,
        images: FakeImages,
        blobs: FakeBlobs,
        records: FakeRecords,
    ) -> Self {
        Self {
            generator: Arc::new(generator),
            images: Arc::new(images),
            blobs: Arc::new(blobs),
            records: Arc::new(records),
        }
    }

    pub fn pipeline(&self) -> DesignPipeline {
        DesignPipeline::new(
            self.generator.clone(),
            self.images.clone(),
            self.blobs.clone(),
            self.records.clone(),
        )
    }

    pub async fn upload_count(&self) -> usize {
        self.blobs.uploads.lock().await.len()
    }

    pub fn insert_count(&self) -> usize {
        self.records.inserts.load(Ordering::SeqCst)
    }
}
