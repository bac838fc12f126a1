use super::{StoreError, TargetRow, TargetStore, filter_text, validate_identifier};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Debug, Default)]
struct FailurePlan {
    every_call: bool,
    /// 1-based insert call numbers that fail.
    insert_calls: HashSet<usize>,
}

/// In-process store used for dry runs and tests.
///
/// Rows without an `id` are given a random UUID. Failures can be injected
/// per table, and insert responses can be returned in reverse order to
/// exercise callers that must not rely on response ordering.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<TargetRow>>>,
    failures: Mutex<HashMap<String, FailurePlan>>,
    insert_log: Mutex<HashMap<String, Vec<usize>>>,
    reverse_responses: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every insert and update against `table` fail.
    pub fn fail_table(&self, table: &str) {
        self.failures.lock().entry(table.to_string()).or_default().every_call = true;
    }

    /// Make the given 1-based insert calls against `table` fail.
    pub fn fail_insert_calls(&self, table: &str, calls: &[usize]) {
        self.failures
            .lock()
            .entry(table.to_string())
            .or_default()
            .insert_calls
            .extend(calls.iter().copied());
    }

    pub fn reverse_responses(&self, reverse: bool) {
        self.reverse_responses.store(reverse, Ordering::SeqCst);
    }

    /// Pre-populate a table, assigning ids like a normal insert.
    pub fn seed(&self, table: &str, rows: Vec<TargetRow>) {
        let mut tables = self.tables.lock();
        let stored = tables.entry(table.to_string()).or_default();
        stored.extend(rows.into_iter().map(with_id));
    }

    pub fn rows(&self, table: &str) -> Vec<TargetRow> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    /// Payload sizes of every insert call made against `table`, failed or not.
    pub fn insert_calls(&self, table: &str) -> Vec<usize> {
        self.insert_log.lock().get(table).cloned().unwrap_or_default()
    }

    fn check_failure(&self, table: &str, insert_call: Option<usize>) -> Result<(), StoreError> {
        let failures = self.failures.lock();
        let Some(plan) = failures.get(table) else {
            return Ok(());
        };

        let injected = plan.every_call
            || insert_call.is_some_and(|call| plan.insert_calls.contains(&call));
        if injected {
            return Err(StoreError::Rejected {
                status: 500,
                message: format!("injected failure for table {table}"),
            });
        }
        Ok(())
    }
}

fn with_id(mut row: TargetRow) -> TargetRow {
    if row.get("id").is_none_or(Value::is_null) {
        row.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
    }
    row
}

fn matches_filters(row: &TargetRow, filters: &[(String, Value)]) -> bool {
    filters.iter().all(|(column, expected)| {
        row.get(column)
            .is_some_and(|actual| filter_text(actual) == filter_text(expected))
    })
}

#[async_trait]
impl TargetStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, table: &str, rows: Vec<TargetRow>) -> Result<Vec<TargetRow>, StoreError> {
        validate_identifier(table)?;
        for column in rows.iter().flat_map(|row| row.keys()) {
            validate_identifier(column)?;
        }

        let call = {
            let mut log = self.insert_log.lock();
            let calls = log.entry(table.to_string()).or_default();
            calls.push(rows.len());
            calls.len()
        };
        self.check_failure(table, Some(call))?;

        let inserted: Vec<TargetRow> = rows.into_iter().map(with_id).collect();
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .extend(inserted.iter().cloned());

        let mut response = inserted;
        if self.reverse_responses.load(Ordering::SeqCst) {
            response.reverse();
        }
        Ok(response)
    }

    async fn update(
        &self,
        table: &str,
        key_column: &str,
        key: &str,
        patch: TargetRow,
    ) -> Result<Vec<TargetRow>, StoreError> {
        validate_identifier(table)?;
        validate_identifier(key_column)?;
        for column in patch.keys() {
            validate_identifier(column)?;
        }
        self.check_failure(table, None)?;

        let mut tables = self.tables.lock();
        let mut updated = Vec::new();
        if let Some(rows) = tables.get_mut(table) {
            for row in rows
                .iter_mut()
                .filter(|row| row.get(key_column).is_some_and(|value| filter_text(value) == key))
            {
                for (column, value) in &patch {
                    row.insert(column.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn select(
        &self,
        table: &str,
        filters: &[(String, Value)],
    ) -> Result<Vec<TargetRow>, StoreError> {
        validate_identifier(table)?;
        for (column, _) in filters {
            validate_identifier(column)?;
        }

        Ok(self
            .tables
            .lock()
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_filters(row, filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn healthcheck(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> TargetRow {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_missing_ids() {
        let store = MemoryStore::new();
        let returned = store
            .insert(
                "vehicles",
                vec![row(json!({ "make": "Kia" })), row(json!({ "id": "fixed", "make": "Fiat" }))],
            )
            .await
            .unwrap();

        assert_eq!(returned.len(), 2);
        assert!(returned[0]["id"].as_str().is_some_and(|id| Uuid::parse_str(id).is_ok()));
        assert_eq!(returned[1]["id"], json!("fixed"));
        assert_eq!(store.rows("vehicles").len(), 2);
        assert_eq!(store.insert_calls("vehicles"), vec![2]);
    }

    #[tokio::test]
    async fn injected_failures_apply_to_selected_calls() {
        let store = MemoryStore::new();
        store.fail_insert_calls("expenses", &[2]);

        assert!(store.insert("expenses", vec![row(json!({ "amount": 1 }))]).await.is_ok());
        assert!(store.insert("expenses", vec![row(json!({ "amount": 2 }))]).await.is_err());
        assert!(store.insert("expenses", vec![row(json!({ "amount": 3 }))]).await.is_ok());
        assert_eq!(store.rows("expenses").len(), 2);
        assert_eq!(store.insert_calls("expenses"), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn update_patches_matching_rows() {
        let store = MemoryStore::new();
        store.seed("vehicles", vec![row(json!({ "id": "veh-1", "make": "Kia" }))]);

        let updated = store
            .update("vehicles", "id", "veh-1", row(json!({ "tracker_id": "T-9" })))
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(store.rows("vehicles")[0]["tracker_id"], json!("T-9"));
        assert_eq!(store.rows("vehicles")[0]["make"], json!("Kia"));

        let missing = store
            .update("vehicles", "id", "veh-404", row(json!({ "tracker_id": "T-1" })))
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn select_filters_by_equality() {
        let store = MemoryStore::new();
        store.seed(
            "customers",
            vec![
                row(json!({ "first_name": "John", "year": 1990 })),
                row(json!({ "first_name": "Jane", "year": 1991 })),
            ],
        );
        let found = store
            .select("customers", &[("year".into(), json!("1991"))])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["first_name"], json!("Jane"));

        assert!(matches!(
            store.select("customers; --", &[]).await,
            Err(StoreError::InvalidIdentifier(_))
        ));
    }
}
