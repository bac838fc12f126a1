//! Target stores receiving transformed rows.
//!
//! The pipeline only depends on [`TargetStore`]. Three implementations ship
//! with the crate:
//!
//! - [`RestStore`] talks to a hosted PostgREST-style service
//! - [`PgStore`] writes straight into PostgreSQL through sqlx
//! - [`MemoryStore`] keeps tables in process for dry runs and tests

pub mod memory;
pub mod postgres;
pub mod rest;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use rest::RestStore;

use crate::config::{StoreBackend, StoreConfig};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// One row as sent to, or returned by, a target store.
pub type TargetRow = Map<String, Value>;

static IDENTIFIER_REGEX: OnceLock<Regex> = OnceLock::new();

fn identifier_regex() -> &'static Regex {
    IDENTIFIER_REGEX
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid identifier regex"))
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid table or column name '{0}'")]
    InvalidIdentifier(String),
    #[error("store rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("store HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unexpected store response: {0}")]
    UnexpectedResponse(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store configuration error: {0}")]
    Config(String),
}

/// Reject anything that is not a plain SQL identifier.
pub fn validate_identifier(name: &str) -> Result<&str, StoreError> {
    if identifier_regex().is_match(name) {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// A relational store addressed by table name with JSON row payloads.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Short backend name for logs ("rest", "postgres", "memory").
    fn name(&self) -> &'static str;

    /// Insert `rows` and return the stored rows, including generated columns.
    async fn insert(&self, table: &str, rows: Vec<TargetRow>) -> Result<Vec<TargetRow>, StoreError>;

    /// Patch every row whose `key_column` equals `key`; returns the updated rows.
    async fn update(
        &self,
        table: &str,
        key_column: &str,
        key: &str,
        patch: TargetRow,
    ) -> Result<Vec<TargetRow>, StoreError>;

    /// Rows matching every `(column, value)` equality filter.
    async fn select(
        &self,
        table: &str,
        filters: &[(String, Value)],
    ) -> Result<Vec<TargetRow>, StoreError>;

    async fn healthcheck(&self) -> Result<(), StoreError>;
}

/// Build the configured non-postgres store.
///
/// The postgres backend needs the Rocket-managed pool and is wired up in
/// [`crate::rocket`] instead; the CLI connects its own pool.
pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn TargetStore>, StoreError> {
    match config.backend {
        StoreBackend::Rest => Ok(Arc::new(RestStore::new(config)?)),
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Postgres => Err(StoreError::Config(
            "the postgres backend requires a connection pool".into(),
        )),
    }
}

/// Render a value as the text form used in equality filters.
pub(crate) fn filter_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
