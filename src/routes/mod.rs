//! HTTP route handlers grouped by resource domain.
//!
//! Each submodule corresponds to one step of the import workflow and exposes
//! typed Rocket handlers annotated with `#[openapi]` so `rocket_okapi` can
//! derive an OpenAPI document automatically. Handlers share one managed
//! [`ImportContext`].

pub mod health;
pub mod helpers;
pub mod imports;
pub mod mappings;
pub mod uploads;

use crate::config::ImportConfig;
use crate::import::mapping::MappingRegistry;
use crate::import::session::UploadRegistry;
use crate::store::TargetStore;
use std::sync::Arc;

/// State shared by every import handler.
pub struct ImportContext {
    pub store: Arc<dyn TargetStore>,
    pub registry: Arc<MappingRegistry>,
    pub config: ImportConfig,
    pub uploads: Arc<UploadRegistry>,
}

impl ImportContext {
    pub fn new(store: Arc<dyn TargetStore>, registry: Arc<MappingRegistry>, config: ImportConfig) -> Self {
        Self {
            store,
            registry,
            config,
            uploads: Arc::new(UploadRegistry::new()),
        }
    }
}
