//! Configuration loader and typed settings.
//!
//! Uses Figment to merge built-in defaults, `config.toml`, `config.<env>.toml`,
//! `APP_*` env vars (`__` separates nesting) and the conventional
//! `DATABASE_URL` / `PORT` variables.
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::Error;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment
            .merge(Env::prefixed("APP_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
            .merge(Env::raw().only(&["PORT"]).map(|_| "server.port".into()));

        tracing::debug!(env = %env_name, "Loaded configuration sources");
        let config = Self { figment };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Typed view of the merged configuration, validated.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to extract settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        match env {
            "prod" | "production" => {
                if self.get::<bool>("embedding.use_fake").unwrap_or(false) {
                    anyhow::bail!(Error::InvalidConfig("fake embeddings are not allowed in production".into()));
                }
            }
            "dev" | "development" | "test" | "testing" => {}
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub server: ServerSettings,
    pub embedding: EmbeddingSettings,
    pub backfill: BackfillSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<(), Error> {
        if self.database.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
            return Err(Error::InvalidConfig("DATABASE_URL is not set".into()));
        }
        if self.database.max_connections == 0 {
            return Err(Error::InvalidConfig("database.max_connections must be > 0".into()));
        }
        if self.backfill.batch_size == 0 {
            return Err(Error::InvalidConfig("backfill.batch_size must be > 0".into()));
        }
        if self.backfill.max_retries == 0 {
            return Err(Error::InvalidConfig("backfill.max_retries must be > 0".into()));
        }
        if self.backfill.persist_concurrency == 0 {
            return Err(Error::InvalidConfig("backfill.persist_concurrency must be > 0".into()));
        }
        if self.embedding.dimension == 0 {
            return Err(Error::InvalidConfig("embedding.dimension must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { url: None, max_connections: 50, acquire_timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 5000 }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Hugging Face repository the weights are fetched from when no local copy exists.
    pub model_id: String,
    pub model_dir: Option<String>,
    pub dimension: usize,
    pub max_len: usize,
    pub use_fake: bool,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            model_dir: None,
            dimension: 384,
            max_len: 256,
            use_fake: false,
        }
    }
}

impl EmbeddingSettings {
    /// Short model name reported to API clients.
    pub fn model_name(&self) -> &str {
        self.model_id.rsplit('/').next().unwrap_or(&self.model_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillSettings {
    pub schema: String,
    pub table: String,
    pub batch_size: usize,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub inter_batch_delay_ms: u64,
    pub persist_concurrency: usize,
    pub max_batches: Option<usize>,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            table: "netflix_shows".to_string(),
            batch_size: 50,
            max_retries: 5,
            retry_delay_ms: 1000,
            inter_batch_delay_ms: 500,
            persist_concurrency: 50,
            max_batches: None,
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
