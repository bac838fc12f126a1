//! Upload, inspection, preview and release of source databases.

use crate::error::ApiError;
use crate::import::mapping::TableMapping;
use crate::import::session::load_upload;
use crate::import::transform::{RowOutcome, transform_row};
use crate::import::IdentifierCache;
use crate::models::{MessageResponse, PreviewRow, TablePreview, UploadSummary};
use crate::routes::ImportContext;
use crate::routes::helpers::parse_upload_id;
use rocket::State;
use rocket::data::{Data, ToByteUnit};
use rocket::serde::json::Json;
use rocket_okapi::openapi;
use std::sync::Arc;

const MAX_PREVIEW_ROWS: usize = 500;

/// Upload a SQLite database as the raw request body.
#[openapi(tag = "Uploads")]
#[post("/uploads?<file_name>", data = "<body>")]
pub async fn upload_database(
    file_name: String,
    body: Data<'_>,
    context: &State<ImportContext>,
) -> Result<Json<UploadSummary>, ApiError> {
    let limit = context.config.max_upload_bytes;
    let bytes = body
        .open(limit.bytes())
        .into_bytes()
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to read upload: {e}")))?;

    if !bytes.is_complete() {
        return Err(ApiError::PayloadTooLarge(format!(
            "'{file_name}' exceeds the {limit} byte upload limit"
        )));
    }
    if bytes.is_empty() {
        return Err(ApiError::BadRequest(format!("'{file_name}' is empty")));
    }

    let database = load_upload(file_name, bytes.into_inner()).await?;
    let session = context.uploads.insert(database);
    Ok(Json(UploadSummary::new(&session, &context.registry)))
}

/// Describe an upload: discovered tables, mapping coverage and workflow stage.
#[openapi(tag = "Uploads")]
#[get("/uploads/<id>")]
pub fn get_upload(id: &str, context: &State<ImportContext>) -> Result<Json<UploadSummary>, ApiError> {
    let session = context.uploads.get(parse_upload_id(id)?)?;
    Ok(Json(UploadSummary::new(&session, &context.registry)))
}

/// Discard an upload, cancelling any import still running against it.
#[openapi(tag = "Uploads")]
#[delete("/uploads/<id>")]
pub async fn delete_upload(
    id: &str,
    context: &State<ImportContext>,
) -> Result<Json<MessageResponse>, ApiError> {
    let upload_id = parse_upload_id(id)?;
    context.uploads.release(upload_id).await?;
    Ok(Json(MessageResponse {
        message: format!("Upload {upload_id} released"),
    }))
}

/// Sample rows of a source table alongside their transformed form.
#[openapi(tag = "Uploads")]
#[get("/uploads/<id>/tables/<table>/preview?<limit>")]
pub async fn preview_table(
    id: &str,
    table: &str,
    limit: Option<usize>,
    context: &State<ImportContext>,
) -> Result<Json<TablePreview>, ApiError> {
    let upload_id = parse_upload_id(id)?;
    let session = context.uploads.get(upload_id)?;
    let database = session.database()?;
    let info = database
        .table(table)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("Table '{table}' not found in upload")))?;

    let limit = limit
        .unwrap_or(context.config.preview_rows)
        .clamp(1, MAX_PREVIEW_ROWS);
    let reader = Arc::clone(database);
    let name = info.name.clone();
    let sample = tokio::task::spawn_blocking(move || reader.read_sample(&name, limit))
        .await
        .map_err(|e| ApiError::InternalError(format!("Preview task failed: {e}")))??;

    context.uploads.mark_preview(upload_id)?;

    let mapping = context.registry.get(table).map(without_lookups);
    let empty_cache = IdentifierCache::new();
    let rows = sample
        .into_iter()
        .map(|source| {
            let target = mapping.as_ref().and_then(|mapping| {
                match transform_row(&source, mapping, &empty_cache) {
                    RowOutcome::Accepted(target) => Some(target),
                    RowOutcome::Rejected(_) => None,
                }
            });
            PreviewRow { source, target }
        })
        .collect();

    let registered = context.registry.get(table);
    Ok(Json(TablePreview {
        table: info.name,
        target_table: registered.map(|m| m.target_table.clone()),
        columns: info.columns,
        row_count: info.row_count,
        resolved_at_import: registered
            .map(|m| m.foreign_keys.iter().map(|fk| fk.target_column.clone()).collect())
            .unwrap_or_default(),
        rows,
    }))
}

/// Foreign keys depend on rows inserted during the run, so previews skip them.
fn without_lookups(mapping: &TableMapping) -> TableMapping {
    TableMapping {
        foreign_keys: Vec::new(),
        ..mapping.clone()
    }
}
