//! Import execution for a selected set of source tables.
//!
//! The BulkImporter drives one run end to end:
//! 1. Resolve the dependency order of the selection
//! 2. For each table, read every source row off the async runtime
//! 3. Transform rows and write them in fixed-size batches (or as per-row
//!    merges for tables that patch an existing entity)
//! 4. Feed inserted parent ids into the run's identifier cache
//! 5. Publish progress after every batch and assemble the final result
//!
//! Failures are contained at the narrowest scope: a rejected row never stops
//! its batch, a failed batch never stops its table and a failed table never
//! stops the run.

use crate::import::cache::{IdentifierCache, NaturalKey};
use crate::import::loader::{EmbeddedDatabase, LoaderError, SourceRow};
use crate::import::mapping::{CacheRegistration, MappingRegistry, TableMapping, WriteMode};
use crate::import::progress::{ImportJob, ImportResult, TableImportDetail};
use crate::import::resolver::resolve_import_order;
use crate::import::transform::{RowOutcome, transform_row};
use crate::store::TargetStore;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Rows per insert call.
pub const IMPORT_BATCH_SIZE: usize = 50;

/// Errors that abort a single table. They never abort the run.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read source rows: {0}")]
    Source(#[from] LoaderError),
    #[error("source read task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("no mapping is defined for table '{0}'")]
    Unmapped(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct TableCounts {
    imported: i64,
    failed: i64,
    cancelled: bool,
}

/// Coordinates one import run against a target store.
pub struct BulkImporter {
    store: Arc<dyn TargetStore>,
    registry: Arc<MappingRegistry>,
    batch_size: usize,
}

impl BulkImporter {
    pub fn new(store: Arc<dyn TargetStore>, registry: Arc<MappingRegistry>) -> Self {
        Self {
            store,
            registry,
            batch_size: IMPORT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Import `selected` tables from `source`, reporting through `job`.
    ///
    /// Always resolves to a result, even when every table fails. The job is
    /// finished with the same result before it is returned.
    pub async fn run(
        &self,
        source: Arc<EmbeddedDatabase>,
        selected: &[String],
        job: &ImportJob,
    ) -> ImportResult {
        let order = resolve_import_order(&self.registry, selected);
        if order.best_effort {
            log::warn!(
                "import order is best-effort; foreign keys may be null for: {}",
                order.unresolved.join(", ")
            );
        }

        let rows_total = source.total_rows(order.tables.iter().map(String::as_str));
        job.start(order.tables.len(), rows_total).await;
        log::info!(
            "starting import of {} table(s), {} row(s) from '{}' into {} store",
            order.tables.len(),
            rows_total,
            source.file_name(),
            self.store.name()
        );

        let mut cache = IdentifierCache::new();
        let mut details = Vec::with_capacity(order.tables.len());
        let mut cancelled = false;

        for (idx, table) in order.tables.iter().enumerate() {
            if job.is_cancelled() {
                cancelled = true;
                break;
            }
            job.begin_table(idx + 1, table).await;

            let target_table = self
                .registry
                .get(table)
                .map(|mapping| mapping.target_table.clone())
                .unwrap_or_default();

            let detail = match self.import_table(&source, table, &mut cache, job).await {
                Ok(counts) => {
                    cancelled = counts.cancelled;
                    log::info!(
                        "{} → {}: {} imported, {} failed",
                        table,
                        target_table,
                        counts.imported,
                        counts.failed
                    );
                    TableImportDetail::counted(table, &target_table, counts.imported, counts.failed)
                }
                Err(err) => {
                    log::error!("table {} failed: {}", table, err);
                    let unread = source.table(table).map_or(0, |info| info.row_count);
                    job.advance_rows(unread).await;
                    TableImportDetail::errored(table, &target_table, err.to_string())
                }
            };

            if detail.imported > 0 {
                job.record_table_success(table).await;
            } else if detail.failed != 0 {
                let error = detail
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("all {} row(s) failed", detail.failed));
                job.record_table_failure(table, error).await;
            }
            details.push(detail);

            if cancelled {
                break;
            }
        }

        if cancelled {
            log::warn!("import cancelled after {} table(s)", details.len());
        }

        let result = ImportResult::summarize(details, order.unresolved, cancelled);
        log::info!("{}", result.message);
        job.finish(result.clone()).await;
        result
    }

    async fn import_table(
        &self,
        source: &Arc<EmbeddedDatabase>,
        table: &str,
        cache: &mut IdentifierCache,
        job: &ImportJob,
    ) -> Result<TableCounts, TableError> {
        let mapping = self
            .registry
            .get(table)
            .ok_or_else(|| TableError::Unmapped(table.to_string()))?;

        let reader = Arc::clone(source);
        let source_table = mapping.source_table.clone();
        let rows = tokio::task::spawn_blocking(move || reader.read_rows(&source_table)).await??;
        log::debug!("read {} row(s) from {}", rows.len(), table);

        let counts = match &mapping.write_mode {
            WriteMode::Insert => self.insert_rows(mapping, &rows, cache, job).await,
            WriteMode::MergeIntoParent {
                parent_column,
                key_column,
            } => {
                self.merge_rows(mapping, parent_column, key_column, &rows, cache, job)
                    .await
            }
        };
        Ok(counts)
    }

    async fn insert_rows(
        &self,
        mapping: &TableMapping,
        rows: &[SourceRow],
        cache: &mut IdentifierCache,
        job: &ImportJob,
    ) -> TableCounts {
        let mut counts = TableCounts::default();
        let batches = rows.len().div_ceil(self.batch_size);

        for (batch_idx, chunk) in rows.chunks(self.batch_size).enumerate() {
            if job.is_cancelled() {
                counts.cancelled = true;
                break;
            }

            let mut payload = Vec::with_capacity(chunk.len());
            let mut tokens: Vec<(String, NaturalKey)> = Vec::new();

            for row in chunk {
                match transform_row(row, mapping, cache) {
                    RowOutcome::Accepted(mut target) => {
                        if let Some(registration) = &mapping.registers {
                            let token = Uuid::new_v4().to_string();
                            target.insert(
                                registration.target_key_column.clone(),
                                Value::String(token.clone()),
                            );
                            if let Some(key) = natural_key(registration, row) {
                                tokens.push((token, key));
                            }
                        }
                        payload.push(target);
                    }
                    RowOutcome::Rejected(reason) => {
                        counts.failed += 1;
                        log::debug!("{}: skipped row: {}", mapping.source_table, reason);
                    }
                }
            }

            if !payload.is_empty() {
                let sent = payload.len() as i64;
                match self.store.insert(&mapping.target_table, payload).await {
                    Ok(returned) => {
                        counts.imported += sent;
                        if let Some(registration) = &mapping.registers {
                            register_returned(cache, registration, &returned, tokens);
                        }
                    }
                    Err(err) => {
                        counts.failed += sent;
                        log::warn!(
                            "{}: batch {}/{} of {} row(s) failed: {}",
                            mapping.source_table,
                            batch_idx + 1,
                            batches,
                            sent,
                            err
                        );
                    }
                }
            }

            job.advance_rows(chunk.len() as u64).await;
            log::trace!(
                "{}: batch {}/{} done ({} imported, {} failed so far)",
                mapping.source_table,
                batch_idx + 1,
                batches,
                counts.imported,
                counts.failed
            );
        }

        counts
    }

    async fn merge_rows(
        &self,
        mapping: &TableMapping,
        parent_column: &str,
        key_column: &str,
        rows: &[SourceRow],
        cache: &IdentifierCache,
        job: &ImportJob,
    ) -> TableCounts {
        let mut counts = TableCounts::default();

        for chunk in rows.chunks(self.batch_size) {
            if job.is_cancelled() {
                counts.cancelled = true;
                break;
            }

            for row in chunk {
                let mut patch = match transform_row(row, mapping, cache) {
                    RowOutcome::Accepted(patch) => patch,
                    RowOutcome::Rejected(reason) => {
                        counts.failed += 1;
                        log::debug!("{}: skipped row: {}", mapping.source_table, reason);
                        continue;
                    }
                };

                let Some(Value::String(parent_id)) = patch.remove(parent_column) else {
                    counts.failed += 1;
                    log::debug!(
                        "{}: skipped row without a resolvable {}",
                        mapping.source_table,
                        parent_column
                    );
                    continue;
                };

                match self
                    .store
                    .update(&mapping.target_table, key_column, &parent_id, patch)
                    .await
                {
                    Ok(updated) if !updated.is_empty() => counts.imported += 1,
                    Ok(_) => {
                        counts.failed += 1;
                        log::debug!(
                            "{}: no {} row with {} = {}",
                            mapping.source_table,
                            mapping.target_table,
                            key_column,
                            parent_id
                        );
                    }
                    Err(err) => {
                        counts.failed += 1;
                        log::warn!(
                            "{}: update of {} {} failed: {}",
                            mapping.source_table,
                            mapping.target_table,
                            parent_id,
                            err
                        );
                    }
                }
            }

            job.advance_rows(chunk.len() as u64).await;
        }

        counts
    }
}

fn natural_key(registration: &CacheRegistration, row: &SourceRow) -> Option<NaturalKey> {
    row.get(&registration.natural_key_column)
        .and_then(|value| registration.cache.natural_key(value))
}

/// Cache every returned row whose key column echoes a token we sent.
///
/// Tokens are applied in payload order so a repeated natural key resolves to
/// the row inserted last, whatever order the store responds in.
fn register_returned(
    cache: &mut IdentifierCache,
    registration: &CacheRegistration,
    returned: &[crate::store::TargetRow],
    tokens: Vec<(String, NaturalKey)>,
) {
    let echoed: HashSet<&str> = returned
        .iter()
        .filter_map(|row| row.get(&registration.target_key_column))
        .filter_map(Value::as_str)
        .collect();

    let mut missing = 0usize;
    for (token, key) in tokens {
        if echoed.contains(token.as_str()) {
            cache.insert(registration.cache, key, token);
        } else {
            missing += 1;
        }
    }

    if missing > 0 {
        log::warn!(
            "{} inserted row(s) were not echoed back; they cannot be referenced by later tables",
            missing
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::cache::CacheKind;
    use crate::store::TargetRow;
    use serde_json::json;

    fn row(value: Value) -> TargetRow {
        value.as_object().cloned().unwrap()
    }

    fn vehicles() -> CacheRegistration {
        CacheRegistration {
            cache: CacheKind::Vehicles,
            natural_key_column: "id".into(),
            target_key_column: "id".into(),
        }
    }

    #[test]
    fn registration_matches_tokens_not_positions() {
        let mut cache = IdentifierCache::new();
        let returned = vec![row(json!({ "id": "tok-b" })), row(json!({ "id": "tok-a" }))];
        register_returned(
            &mut cache,
            &vehicles(),
            &returned,
            vec![
                ("tok-a".into(), NaturalKey::Id(1)),
                ("tok-b".into(), NaturalKey::Id(2)),
            ],
        );

        assert_eq!(cache.resolve(CacheKind::Vehicles, &json!(1)), Some("tok-a"));
        assert_eq!(cache.resolve(CacheKind::Vehicles, &json!(2)), Some("tok-b"));
    }

    #[test]
    fn unechoed_rows_stay_uncached() {
        let mut cache = IdentifierCache::new();
        register_returned(
            &mut cache,
            &vehicles(),
            &[row(json!({ "id": "tok-a" }))],
            vec![
                ("tok-a".into(), NaturalKey::Id(1)),
                ("tok-z".into(), NaturalKey::Id(9)),
            ],
        );
        assert_eq!(cache.len(CacheKind::Vehicles), 1);
        assert_eq!(cache.resolve(CacheKind::Vehicles, &json!(9)), None);
    }

    #[test]
    fn repeated_keys_resolve_to_the_last_insert() {
        let mut cache = IdentifierCache::new();
        let registration = CacheRegistration {
            cache: CacheKind::Customers,
            natural_key_column: "name".into(),
            target_key_column: "id".into(),
        };
        let john = NaturalKey::Name("john smith".into());
        register_returned(
            &mut cache,
            &registration,
            &[row(json!({ "id": "second" })), row(json!({ "id": "first" }))],
            vec![("first".into(), john.clone()), ("second".into(), john)],
        );
        assert_eq!(cache.resolve(CacheKind::Customers, &json!("John Smith")), Some("second"));
    }

    #[test]
    fn batch_size_is_never_zero() {
        let importer = BulkImporter::new(
            Arc::new(crate::store::MemoryStore::new()),
            Arc::new(MappingRegistry::builtin()),
        )
        .with_batch_size(0);
        assert_eq!(importer.batch_size(), 1);
    }
}
