use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;
use uuid::Uuid;

use shared::domain::{DesignId, GeneratedDesign, NewDesign, UserId};

/// Where a blob landed after a successful upload, relative to its bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedBlob {
    pub path: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes `bytes` under `key`, overwriting any object already there.
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<UploadedBlob>;

    /// Durable public address of an uploaded object. Pure string assembly.
    fn public_url(&self, path: &str) -> String;

    async fn list_public_urls(&self, prefix: &str) -> Result<Vec<String>>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns `None` when the store accepted the row but sent nothing back.
    async fn insert_design(&self, design: &NewDesign) -> Result<Option<GeneratedDesign>>;

    /// Newest first, at most `limit` rows owned by `user_id`.
    async fn recent_designs(&self, user_id: &UserId, limit: u32)
        -> Result<Vec<GeneratedDesign>>;
}

/// SQLite-backed record store used for local development and tests.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for Storage {
    async fn insert_design(&self, design: &NewDesign) -> Result<Option<GeneratedDesign>> {
        let id = Uuid::new_v4().to_string();
        let now = format_timestamp(Utc::now());
        let row = sqlx::query(
            "INSERT INTO generated_images (id, user_id, url, prompt, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id, user_id, url, prompt, created_at, updated_at",
        )
        .bind(&id)
        .bind(design.user_id.as_str())
        .bind(&design.url)
        .bind(&design.prompt)
        .bind(&now)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await
        .context("failed to insert generated design")?;

        debug!(design_id = %id, user_id = %design.user_id, "stored generated design");
        row.as_ref().map(design_from_row).transpose()
    }

    async fn recent_designs(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<GeneratedDesign>> {
        let rows = sqlx::query(
            "SELECT id, user_id, url, prompt, created_at, updated_at
             FROM generated_images
             WHERE user_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(user_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("failed to list generated designs")?;

        rows.iter().map(design_from_row).collect()
    }
}

fn design_from_row(row: &SqliteRow) -> Result<GeneratedDesign> {
    Ok(GeneratedDesign {
        id: DesignId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        url: row.try_get("url")?,
        prompt: row.try_get("prompt")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

// Fixed-width microsecond stamps keep lexical and chronological order aligned.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| anyhow!("invalid stored timestamp '{raw}': {e}"))
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
