//! Dependency ordering for a table selection.

use crate::import::mapping::MappingRegistry;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Resolved table order for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportOrder {
    pub tables: Vec<String>,
    /// Set when a cycle forced the remaining tables to be appended unordered.
    pub best_effort: bool,
    /// Tables appended without their dependencies being satisfied.
    pub unresolved: Vec<String>,
}

/// Order `selected` so every selected dependency precedes its dependents.
///
/// Dependencies outside the selection are treated as satisfied, as are tables
/// with no mapping. Each pass appends every table whose remaining
/// dependencies are already ordered; if a pass appends nothing the leftover
/// tables are appended in input order and the order is marked best-effort.
/// Duplicates in `selected` keep their first occurrence.
pub fn resolve_import_order(registry: &MappingRegistry, selected: &[String]) -> ImportOrder {
    let mut seen = HashSet::new();
    let mut remaining: Vec<&str> = selected
        .iter()
        .map(String::as_str)
        .filter(|table| seen.insert(*table))
        .collect();

    let mut order = ImportOrder::default();

    while !remaining.is_empty() {
        let pending: HashSet<&str> = remaining.iter().copied().collect();
        let (ready, blocked): (Vec<&str>, Vec<&str>) = remaining.iter().copied().partition(|table| {
            registry
                .get(table)
                .map(|mapping| {
                    mapping
                        .depends_on
                        .iter()
                        .all(|dep| dep == *table || !pending.contains(dep.as_str()))
                })
                .unwrap_or(true)
        });

        if ready.is_empty() {
            log::warn!(
                "unresolvable dependencies among {:?}; importing them in selection order",
                blocked
            );
            order.best_effort = true;
            order.unresolved = blocked.iter().map(|table| table.to_string()).collect();
            order.tables.extend(order.unresolved.iter().cloned());
            break;
        }

        order.tables.extend(ready.iter().map(|table| table.to_string()));
        remaining = blocked;
    }

    order
}
