use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::domain::{GeneratedDesign, NewDesign, UserId};
use storage::RecordStore;
use tracing::debug;

use crate::{check_response, SupabaseConfig};

/// Record store backed by a Supabase table through PostgREST.
#[derive(Clone)]
pub struct PostgrestRecordStore {
    http: Client,
    config: SupabaseConfig,
}

impl PostgrestRecordStore {
    pub fn new(http: Client, config: SupabaseConfig) -> Self {
        Self { http, config }
    }

    fn table_url(&self) -> String {
        self.config
            .endpoint(&format!("/rest/v1/{}", self.config.table))
    }
}

#[async_trait]
impl RecordStore for PostgrestRecordStore {
    async fn insert_design(&self, design: &NewDesign) -> Result<Option<GeneratedDesign>> {
        let request = self
            .http
            .post(self.table_url())
            .query(&[("select", "*")])
            .header("Prefer", "return=representation")
            .json(design);
        let response = self
            .config
            .authorize(request)
            .send()
            .await
            .context("failed to reach supabase database")?;
        let rows: Vec<GeneratedDesign> = check_response("database", response)
            .await?
            .json()
            .await
            .context("unexpected insert response from supabase database")?;

        debug!(user_id = %design.user_id, returned = rows.len(), "inserted design row");
        Ok(rows.into_iter().next())
    }

    async fn recent_designs(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<GeneratedDesign>> {
        let request = self.http.get(self.table_url()).query(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{user_id}")),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        let response = self
            .config
            .authorize(request)
            .send()
            .await
            .context("failed to reach supabase database")?;
        let rows = check_response("database", response)
            .await?
            .json()
            .await
            .context("unexpected select response from supabase database")?;
        Ok(rows)
    }
}
