use crate::import::loader::SourceRow;
use crate::import::mapping::MappingRegistry;
use crate::import::progress::ImportJobState;
use crate::import::resolver::ImportOrder;
use crate::import::schema::{ColumnInfo, TableInfo};
use crate::import::session::{ImportStage, UploadSession};
use crate::store::TargetRow;
use chrono::{DateTime, Utc};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ===== Generic Wrappers =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DataResponse<T> {
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageResponse {
    pub message: String,
}

// ===== Upload Models =====

/// A discovered source table and how it would be imported.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceTableSummary {
    #[serde(flatten)]
    pub info: TableInfo,
    pub mapped: bool,
    pub target_table: Option<String>,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub id: String,
    pub file_name: String,
    pub size_bytes: u64,
    /// Hex SHA-256 of the uploaded file.
    pub fingerprint: String,
    pub uploaded_at: DateTime<Utc>,
    pub stage: ImportStage,
    pub tables: Vec<SourceTableSummary>,
}

impl UploadSummary {
    pub fn new(session: &UploadSession, registry: &MappingRegistry) -> Self {
        let source = &session.source;
        let tables = source
            .tables
            .iter()
            .map(|info| {
                let mapping = registry.get(&info.name);
                SourceTableSummary {
                    info: info.clone(),
                    mapped: mapping.is_some(),
                    target_table: mapping.map(|m| m.target_table.clone()),
                    depends_on: mapping.map(|m| m.depends_on.clone()).unwrap_or_default(),
                }
            })
            .collect();

        Self {
            id: session.id.to_string(),
            file_name: source.file_name.clone(),
            size_bytes: source.size_bytes,
            fingerprint: source.fingerprint.clone(),
            uploaded_at: session.uploaded_at,
            stage: session.stage,
            tables,
        }
    }
}

// ===== Preview Models =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRow {
    pub source: SourceRow,
    /// Transformed row without foreign keys, which are only known during import.
    pub target: Option<TargetRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TablePreview {
    pub table: String,
    pub target_table: Option<String>,
    pub columns: Vec<ColumnInfo>,
    pub row_count: u64,
    /// Target columns filled from the identifier cache at import time.
    pub resolved_at_import: Vec<String>,
    pub rows: Vec<PreviewRow>,
}

// ===== Import Models =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StartImportRequest {
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportStartedResponse {
    pub upload_id: String,
    pub job_id: String,
    pub order: ImportOrder,
    pub rows_total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportStatusResponse {
    pub upload_id: String,
    pub stage: ImportStage,
    pub job: Option<ImportJobState>,
}
