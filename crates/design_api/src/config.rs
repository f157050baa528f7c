use std::{collections::HashMap, fs, io, path::Path, time::Duration};

use anyhow::{bail, Context};
use replicate_integration::{ReplicateConfig, DEFAULT_API_BASE, DEFAULT_MODEL_VERSION};
use supabase_integration::{SupabaseConfig, DEFAULT_BUCKET, DEFAULT_TABLE};
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "designs.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordBackend {
    Supabase,
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_bind: String,
    pub record_backend: RecordBackend,
    pub database_url: String,
    pub supabase_url: String,
    pub supabase_key: String,
    pub supabase_jwt_secret: Option<String>,
    pub storage_bucket: String,
    pub designs_table: String,
    pub replicate_api_token: Option<String>,
    pub replicate_api_base: String,
    pub replicate_model_version: String,
    pub replicate_poll_interval_ms: u64,
    pub replicate_max_polls: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            record_backend: RecordBackend::Supabase,
            database_url: "sqlite://./data/designs.db".into(),
            supabase_url: "http://127.0.0.1:54321".into(),
            supabase_key: String::new(),
            supabase_jwt_secret: None,
            storage_bucket: DEFAULT_BUCKET.into(),
            designs_table: DEFAULT_TABLE.into(),
            replicate_api_token: None,
            replicate_api_base: DEFAULT_API_BASE.into(),
            replicate_model_version: DEFAULT_MODEL_VERSION.into(),
            replicate_poll_interval_ms: 500,
            replicate_max_polls: 240,
        }
    }
}

impl Settings {
    /// Applies a flat `key = "value"` table. Unknown keys are ignored.
    pub fn apply_file(&mut self, file_cfg: &HashMap<String, String>) {
        for (key, value) in file_cfg {
            self.apply(key, value.clone());
        }
    }

    /// Applies environment overrides. Plain names are read first, then the
    /// `APP__` prefixed form, so the latter wins when both are set.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        const VARS: [(&str, &str); 14] = [
            ("SERVER_BIND", "bind_addr"),
            ("RECORD_BACKEND", "record_backend"),
            ("DATABASE_URL", "database_url"),
            ("SUPABASE_URL", "supabase_url"),
            ("NEXT_PUBLIC_SUPABASE_URL", "supabase_url"),
            ("SUPABASE_KEY", "supabase_key"),
            ("SUPABASE_JWT_SECRET", "supabase_jwt_secret"),
            ("STORAGE_BUCKET", "storage_bucket"),
            ("DESIGNS_TABLE", "designs_table"),
            ("REPLICATE_API_TOKEN", "replicate_api_token"),
            ("REPLICATE_API_BASE", "replicate_api_base"),
            ("REPLICATE_MODEL_VERSION", "replicate_model_version"),
            ("REPLICATE_POLL_INTERVAL_MS", "replicate_poll_interval_ms"),
            ("REPLICATE_MAX_POLLS", "replicate_max_polls"),
        ];

        for (name, key) in VARS {
            if let Some(v) = lookup(name) {
                self.apply(key, v);
            }
        }
        for (_, key) in VARS {
            if let Some(v) = lookup(&format!("APP__{}", key.to_ascii_uppercase())) {
                self.apply(key, v);
            }
        }
    }

    fn apply(&mut self, key: &str, value: String) {
        match key {
            "bind_addr" | "server_bind" => self.server_bind = value,
            "record_backend" => match value.trim().to_ascii_lowercase().as_str() {
                "sqlite" => self.record_backend = RecordBackend::Sqlite,
                "supabase" => self.record_backend = RecordBackend::Supabase,
                _ => {}
            },
            "database_url" => self.database_url = value,
            "supabase_url" => self.supabase_url = value,
            "supabase_key" => self.supabase_key = value,
            "supabase_jwt_secret" => self.supabase_jwt_secret = non_empty(value),
            "storage_bucket" => self.storage_bucket = value,
            "designs_table" => self.designs_table = value,
            "replicate_api_token" => self.replicate_api_token = non_empty(value),
            "replicate_api_base" => self.replicate_api_base = value,
            "replicate_model_version" => self.replicate_model_version = value,
            "replicate_poll_interval_ms" => {
                if let Ok(parsed) = value.trim().parse() {
                    self.replicate_poll_interval_ms = parsed;
                }
            }
            "replicate_max_polls" => {
                if let Ok(parsed) = value.trim().parse() {
                    self.replicate_max_polls = parsed;
                }
            }
            _ => {}
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let url = Url::parse(&self.supabase_url)
            .with_context(|| format!("invalid supabase url '{}'", self.supabase_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("supabase url must be http or https, got '{}'", url.scheme());
        }
        if self.supabase_key.trim().is_empty() {
            bail!("SUPABASE_KEY is not configured");
        }
        if self.storage_bucket.trim().is_empty() || self.storage_bucket.contains('/') {
            bail!("invalid storage bucket '{}'", self.storage_bucket);
        }
        Ok(())
    }

    pub fn supabase(&self) -> SupabaseConfig {
        SupabaseConfig {
            url: self.supabase_url.clone(),
            api_key: self.supabase_key.clone(),
            bucket: self.storage_bucket.clone(),
            table: self.designs_table.clone(),
            jwt_secret: self.supabase_jwt_secret.clone(),
        }
    }

    pub fn replicate(&self) -> ReplicateConfig {
        ReplicateConfig {
            api_token: self.replicate_api_token.clone(),
            api_base: self.replicate_api_base.clone(),
            model_version: self.replicate_model_version.clone(),
            poll_interval: Duration::from_millis(self.replicate_poll_interval_ms),
            max_polls: self.replicate_max_polls,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Defaults, then `path` if it exists, then the process environment.
pub fn load_settings_from(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => settings.apply_file(&parse_settings_file(path, &raw)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read '{}'", path.display()));
        }
    }
    settings.apply_env(|name| std::env::var(name).ok());

    Ok(settings)
}

/// Flattens the top-level scalars of a settings file into strings.
fn parse_settings_file(path: &Path, raw: &str) -> anyhow::Result<HashMap<String, String>> {
    let table = toml::from_str::<toml::Table>(raw)
        .with_context(|| format!("failed to parse '{}'", path.display()))?;

    let mut file_cfg = HashMap::new();
    for (key, value) in table {
        let rendered = match value {
            toml::Value::String(text) => text,
            toml::Value::Integer(n) => n.to_string(),
            toml::Value::Float(n) => n.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            other => bail!(
                "'{key}' in '{}' must be a string, number or boolean, got {}",
                path.display(),
                other.type_str()
            ),
        };
        file_cfg.insert(key, rendered);
    }
    Ok(file_cfg)
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(DEFAULT_CONFIG_FILE))
}

/// Accepts bare file paths as well as `sqlite:` URLs. The store creates
/// missing parent directories itself.
pub fn prepare_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite:") {
        return raw_database_url.replace('\\', "/");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
