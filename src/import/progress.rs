use chrono::{DateTime, Utc};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Failure count recorded for a table that raised an unexpected error.
pub const TABLE_ERROR_SENTINEL: i64 = -1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Success,
    Partial,
    NoData,
    Failed,
}

impl TableStatus {
    pub fn classify(imported: i64, failed: i64) -> Self {
        match (imported > 0, failed != 0) {
            (true, false) => TableStatus::Success,
            (true, true) => TableStatus::Partial,
            (false, false) => TableStatus::NoData,
            (false, true) => TableStatus::Failed,
        }
    }
}

/// Outcome of one source table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableImportDetail {
    pub table: String,
    pub target_table: String,
    pub imported: i64,
    /// Rows that failed, or [`TABLE_ERROR_SENTINEL`] when the table errored.
    pub failed: i64,
    pub status: TableStatus,
    pub error: Option<String>,
}

impl TableImportDetail {
    pub fn counted(table: &str, target_table: &str, imported: i64, failed: i64) -> Self {
        Self {
            table: table.to_string(),
            target_table: target_table.to_string(),
            imported,
            failed,
            status: TableStatus::classify(imported, failed),
            error: None,
        }
    }

    pub fn errored(table: &str, target_table: &str, error: impl Into<String>) -> Self {
        Self {
            table: table.to_string(),
            target_table: target_table.to_string(),
            imported: 0,
            failed: TABLE_ERROR_SENTINEL,
            status: TableStatus::Failed,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailedTable {
    pub table: String,
    pub error: String,
}

/// Live progress, updated after every batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    pub current_table: Option<String>,
    /// 1-based position of `current_table` in the resolved order.
    pub current_table_index: usize,
    pub total_tables: usize,
    pub rows_completed: u64,
    pub rows_total: u64,
    pub completed_tables: Vec<String>,
    pub failed_tables: Vec<FailedTable>,
}

/// Terminal outcome of a run. A run always produces one of these.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    pub message: String,
    pub details: Vec<TableImportDetail>,
    pub best_effort_order: bool,
    pub unresolved_tables: Vec<String>,
    pub cancelled: bool,
}

impl ImportResult {
    /// Aggregate per-table details into the terminal result.
    pub fn summarize(
        details: Vec<TableImportDetail>,
        unresolved_tables: Vec<String>,
        cancelled: bool,
    ) -> Self {
        let imported: i64 = details.iter().map(|detail| detail.imported).sum();
        let failed: i64 = details.iter().map(|detail| detail.failed.max(0)).sum();
        let wiped_out: Vec<&str> = details
            .iter()
            .filter(|detail| detail.status == TableStatus::Failed)
            .map(|detail| detail.table.as_str())
            .collect();

        let mut message = format!(
            "Imported {} row(s) from {} table(s); {} row(s) failed",
            imported,
            details.len(),
            failed
        );
        if !wiped_out.is_empty() {
            message.push_str(&format!(
                "; {} table(s) failed entirely: {}",
                wiped_out.len(),
                wiped_out.join(", ")
            ));
        }
        if !unresolved_tables.is_empty() {
            message.push_str(&format!(
                "; dependency order was best-effort for: {}",
                unresolved_tables.join(", ")
            ));
        }
        if cancelled {
            message.push_str("; import was cancelled before completion");
        }

        Self {
            success: wiped_out.is_empty() && !cancelled,
            message,
            best_effort_order: !unresolved_tables.is_empty(),
            unresolved_tables,
            details,
            cancelled,
        }
    }

    pub fn imported(&self) -> i64 {
        self.details.iter().map(|detail| detail.imported).sum()
    }

    pub fn detail(&self, table: &str) -> Option<&TableImportDetail> {
        self.details.iter().find(|detail| detail.table == table)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobState {
    pub id: String,
    pub status: ImportStatus,
    pub progress: ImportProgress,
    pub result: Option<ImportResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Default for ImportJobState {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: ImportStatus::Pending,
            progress: ImportProgress::default(),
            result: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Shared handle on one import run. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct ImportJob {
    pub state: Arc<Mutex<ImportJobState>>,
    pub cancellation_token: CancellationToken,
}

impl ImportJob {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ImportJobState::default())),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub async fn snapshot(&self) -> ImportJobState {
        self.state.lock().await.clone()
    }

    pub async fn id(&self) -> String {
        self.state.lock().await.id.clone()
    }

    pub async fn is_active(&self) -> bool {
        matches!(
            self.state.lock().await.status,
            ImportStatus::Pending | ImportStatus::Running
        )
    }

    pub async fn start(&self, total_tables: usize, rows_total: u64) {
        let mut state = self.state.lock().await;
        state.status = ImportStatus::Running;
        state.started_at = Some(Utc::now());
        state.progress = ImportProgress {
            total_tables,
            rows_total,
            ..ImportProgress::default()
        };
    }

    pub async fn begin_table(&self, index: usize, table: &str) {
        let mut state = self.state.lock().await;
        state.progress.current_table = Some(table.to_string());
        state.progress.current_table_index = index;
    }

    pub async fn advance_rows(&self, rows: u64) {
        let mut state = self.state.lock().await;
        state.progress.rows_completed += rows;
    }

    pub async fn record_table_success(&self, table: &str) {
        let mut state = self.state.lock().await;
        state.progress.completed_tables.push(table.to_string());
    }

    pub async fn record_table_failure(&self, table: &str, error: String) {
        let mut state = self.state.lock().await;
        state.progress.failed_tables.push(FailedTable {
            table: table.to_string(),
            error,
        });
    }

    pub async fn finish(&self, result: ImportResult) {
        let mut state = self.state.lock().await;
        state.status = if result.cancelled {
            ImportStatus::Cancelled
        } else {
            ImportStatus::Completed
        };
        state.progress.current_table = None;
        state.completed_at = Some(Utc::now());
        state.result = Some(result);
    }

    /// Request cooperative cancellation; the run stops at its next check.
    pub async fn cancel(&self) {
        self.cancellation_token.cancel();
        let mut state = self.state.lock().await;
        if state.status == ImportStatus::Pending {
            state.status = ImportStatus::Cancelled;
            state.completed_at = Some(Utc::now());
        }
        log::info!("cancellation requested for import {}", state.id);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

impl Default for ImportJob {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_status_classification() {
        assert_eq!(TableStatus::classify(5, 0), TableStatus::Success);
        assert_eq!(TableStatus::classify(5, 2), TableStatus::Partial);
        assert_eq!(TableStatus::classify(0, 0), TableStatus::NoData);
        assert_eq!(TableStatus::classify(0, 3), TableStatus::Failed);
        assert_eq!(TableStatus::classify(0, TABLE_ERROR_SENTINEL), TableStatus::Failed);
    }

    #[test]
    fn partial_failures_keep_the_run_successful() {
        let result = ImportResult::summarize(
            vec![
                TableImportDetail::counted("cars", "vehicles", 10, 0),
                TableImportDetail::counted("expenses", "expenses", 8, 2),
                TableImportDetail::counted("tracker", "vehicles", 0, 0),
            ],
            Vec::new(),
            false,
        );
        assert!(result.success);
        assert_eq!(
            result.message,
            "Imported 18 row(s) from 3 table(s); 2 row(s) failed"
        );
        assert_eq!(result.imported(), 18);
    }

    #[test]
    fn a_wiped_out_table_fails_the_run() {
        let result = ImportResult::summarize(
            vec![
                TableImportDetail::counted("cars", "vehicles", 10, 0),
                TableImportDetail::counted("expenses", "expenses", 0, 4),
                TableImportDetail::errored("fines", "traffic_fines", "boom"),
            ],
            vec!["fines".into()],
            false,
        );
        assert!(!result.success);
        assert!(result.best_effort_order);
        assert!(result.message.starts_with("Imported 10 row(s) from 3 table(s); 4 row(s) failed"));
        assert!(result.message.contains("2 table(s) failed entirely: expenses, fines"));
        assert!(result.message.contains("best-effort for: fines"));
        assert_eq!(result.detail("fines").unwrap().failed, TABLE_ERROR_SENTINEL);
    }

    #[test]
    fn cancelled_runs_are_unsuccessful() {
        let result = ImportResult::summarize(
            vec![TableImportDetail::counted("cars", "vehicles", 3, 0)],
            Vec::new(),
            true,
        );
        assert!(!result.success);
        assert!(result.cancelled);
        assert!(result.message.ends_with("cancelled before completion"));
    }

    #[tokio::test]
    async fn clones_share_progress() {
        let job = ImportJob::new();
        let poller = job.clone();

        job.start(2, 120).await;
        job.begin_table(1, "cars").await;
        job.advance_rows(50).await;
        assert_eq!(poller.snapshot().await.progress.rows_completed, 50);

        job.advance_rows(50).await;
        job.record_table_success("cars").await;
        let state = poller.snapshot().await;
        assert_eq!(state.status, ImportStatus::Running);
        assert_eq!(state.progress.current_table.as_deref(), Some("cars"));
        assert_eq!(state.progress.rows_completed, 100);
        assert_eq!(state.progress.completed_tables, vec!["cars".to_string()]);

        job.finish(ImportResult::summarize(Vec::new(), Vec::new(), false)).await;
        let state = poller.snapshot().await;
        assert_eq!(state.status, ImportStatus::Completed);
        assert!(state.completed_at.is_some());
        assert!(state.result.is_some());
        assert!(!poller.is_active().await);
    }

    #[tokio::test]
    async fn cancel_is_visible_to_clones() {
        let job = ImportJob::new();
        let runner = job.clone();
        job.cancel().await;
        assert!(runner.is_cancelled());
        assert_eq!(runner.snapshot().await.status, ImportStatus::Cancelled);
    }
}
