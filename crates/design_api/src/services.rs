use std::sync::Arc;

use anyhow::Context;
use replicate_integration::ReplicateClient;
use reqwest::Client;
use storage::{RecordStore, Storage};
use supabase_integration::{PostgrestRecordStore, SupabaseAuth, SupabaseBlobStore};
use tracing::info;

use crate::{
    config::{prepare_database_url, RecordBackend, Settings},
    pipeline::{DesignPipeline, HttpImageSource},
};

/// Everything a front end needs, wired from one set of settings.
#[derive(Clone)]
pub struct Services {
    pub pipeline: Arc<DesignPipeline>,
    pub auth: SupabaseAuth,
    /// Present when records live in the local SQLite database.
    pub local_store: Option<Storage>,
}

pub async fn build_services(settings: &Settings) -> anyhow::Result<Services> {
    settings.validate()?;

    let http = Client::new();
    let supabase = settings.supabase();

    let (records, local_store): (Arc<dyn RecordStore>, Option<Storage>) =
        match settings.record_backend {
            RecordBackend::Supabase => (
                Arc::new(PostgrestRecordStore::new(http.clone(), supabase.clone())),
                None,
            ),
            RecordBackend::Sqlite => {
                let database_url = prepare_database_url(&settings.database_url);
                let storage = Storage::new(&database_url)
                    .await
                    .with_context(|| format!("failed to open record store at '{database_url}'"))?;
                (Arc::new(storage.clone()), Some(storage))
            }
        };
    info!(backend = ?settings.record_backend, bucket = %supabase.bucket, "services configured");

    let pipeline = DesignPipeline::new(
        Arc::new(ReplicateClient::with_http_client(
            http.clone(),
            settings.replicate(),
        )),
        Arc::new(HttpImageSource::new(http.clone())),
        Arc::new(SupabaseBlobStore::new(http.clone(), supabase.clone())),
        records,
    );

    Ok(Services {
        pipeline: Arc::new(pipeline),
        auth: SupabaseAuth::new(http, supabase),
        local_store,
    })
}
