use crate::import::executor::IMPORT_BATCH_SIZE;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    Duration::from_millis(env_u64(key, default_millis))
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_PREVIEW_ROWS: usize = 20;

/// Settings for the import pipeline and the upload workflow.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub max_upload_bytes: u64,
    pub preview_rows: usize,
    /// JSON mapping document replacing the built-in registry.
    pub mappings_path: Option<PathBuf>,
}

impl ImportConfig {
    pub fn from_env() -> Self {
        Self {
            batch_size: env_usize("FLEET_IMPORT_BATCH_SIZE", IMPORT_BATCH_SIZE).max(1),
            max_upload_bytes: env_u64("FLEET_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            preview_rows: env_usize("FLEET_PREVIEW_ROWS", DEFAULT_PREVIEW_ROWS).max(1),
            mappings_path: env_opt("FLEET_MAPPINGS_PATH").map(PathBuf::from),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: IMPORT_BATCH_SIZE,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            preview_rows: DEFAULT_PREVIEW_ROWS,
            mappings_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    Rest,
    Postgres,
    #[default]
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rest" | "postgrest" => Ok(StoreBackend::Rest),
            "postgres" | "postgresql" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

/// Where imported rows are written.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Base URL of the REST service, or a PostgreSQL URL for the CLI.
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub run_migrations: bool,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let backend = env_opt("FLEET_STORE_BACKEND")
            .map(|value| {
                value.parse().unwrap_or_else(|err: String| {
                    log::warn!("{err}; falling back to the in-memory store");
                    StoreBackend::Memory
                })
            })
            .unwrap_or_default();

        Self {
            backend,
            url: env_opt("FLEET_STORE_URL"),
            api_key: env_opt("FLEET_STORE_API_KEY"),
            request_timeout: env_duration_millis("FLEET_STORE_TIMEOUT_MS", 30_000),
            run_migrations: env_bool("FLEET_RUN_MIGRATIONS", true),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            api_key: None,
            request_timeout: Duration::from_secs(30),
            run_migrations: true,
        }
    }
}
