//! Starting, polling and cancelling imports for an upload.

use crate::error::ApiError;
use crate::import::executor::BulkImporter;
use crate::import::resolver::resolve_import_order;
use crate::models::{ImportStartedResponse, ImportStatusResponse, MessageResponse, StartImportRequest};
use crate::routes::ImportContext;
use crate::routes::helpers::parse_upload_id;
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::openapi;
use std::sync::Arc;

/// Start importing the selected tables in the background.
///
/// Poll `GET /uploads/<id>/import` for progress and the final result.
#[openapi(tag = "Imports")]
#[post("/uploads/<id>/import", data = "<request>")]
pub async fn start_import(
    id: &str,
    request: Json<StartImportRequest>,
    context: &State<ImportContext>,
) -> Result<Json<ImportStartedResponse>, ApiError> {
    let upload_id = parse_upload_id(id)?;
    let session = context.uploads.get(upload_id)?;
    let source = session.database()?;
    let tables = request.into_inner().tables;

    if tables.is_empty() {
        return Err(ApiError::BadRequest("No tables selected".to_string()));
    }

    let missing: Vec<&str> = tables
        .iter()
        .filter(|table| source.table(table).is_none())
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "Tables not found in upload: {}",
            missing.join(", ")
        )));
    }

    let unmapped: Vec<&str> = tables
        .iter()
        .filter(|table| context.registry.get(table).is_none())
        .map(String::as_str)
        .collect();
    if !unmapped.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "No mapping defined for: {}",
            unmapped.join(", ")
        )));
    }

    let order = resolve_import_order(&context.registry, &tables);
    let rows_total = source.total_rows(order.tables.iter().map(String::as_str));

    let (database, job) = context.uploads.begin_import(upload_id)?;
    let job_id = job.id().await;

    let importer = BulkImporter::new(Arc::clone(&context.store), Arc::clone(&context.registry))
        .with_batch_size(context.config.batch_size);
    let uploads = Arc::clone(&context.uploads);
    let runner = job.clone();
    tokio::spawn(async move {
        importer.run(database, &tables, &runner).await;
        uploads.complete_import(upload_id);
    });

    log::info!("import {} started for upload {}", job_id, upload_id);
    Ok(Json(ImportStartedResponse {
        upload_id: upload_id.to_string(),
        job_id,
        order,
        rows_total,
    }))
}

/// Current progress of the upload's most recent import, with its result once finished.
#[openapi(tag = "Imports")]
#[get("/uploads/<id>/import")]
pub async fn get_import_status(
    id: &str,
    context: &State<ImportContext>,
) -> Result<Json<ImportStatusResponse>, ApiError> {
    let upload_id = parse_upload_id(id)?;
    let session = context.uploads.get(upload_id)?;

    let job = match &session.job {
        Some(job) => Some(job.snapshot().await),
        None => None,
    };

    Ok(Json(ImportStatusResponse {
        upload_id: upload_id.to_string(),
        stage: session.stage,
        job,
    }))
}

/// Request cancellation of the running import; it stops before its next batch.
#[openapi(tag = "Imports")]
#[post("/uploads/<id>/import/cancel")]
pub async fn cancel_import(
    id: &str,
    context: &State<ImportContext>,
) -> Result<Json<MessageResponse>, ApiError> {
    let upload_id = parse_upload_id(id)?;
    let session = context.uploads.get(upload_id)?;

    match &session.job {
        Some(job) if job.is_active().await => {
            job.cancel().await;
            Ok(Json(MessageResponse {
                message: format!("Cancellation requested for upload {upload_id}"),
            }))
        }
        _ => Err(ApiError::Conflict(format!(
            "No import is running for upload {upload_id}"
        ))),
    }
}
