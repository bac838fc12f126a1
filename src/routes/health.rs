//! Lightweight service health endpoint used for readiness checks and tests.

use crate::routes::ImportContext;
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

/// Basic response payload describing API health.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the target store is unreachable.
    pub status: String,
    /// Active store backend.
    pub store: String,
    /// Uploads currently held in memory.
    #[serde(rename = "activeUploads")]
    pub active_uploads: usize,
}

/// Health check endpoint reporting store reachability.
#[openapi(tag = "Health")]
#[get("/health")]
pub async fn health_check(context: &State<ImportContext>) -> Json<HealthResponse> {
    let status = match context.store.healthcheck().await {
        Ok(()) => "ok",
        Err(err) => {
            log::warn!("store health check failed: {}", err);
            "degraded"
        }
    };

    Json(HealthResponse {
        status: status.to_string(),
        store: context.store.name().to_string(),
        active_uploads: context.uploads.len(),
    })
}
