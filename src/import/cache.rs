//! Run-scoped identifier cache.
//!
//! The source database has no foreign keys the target store understands, so
//! parent rows are correlated through natural keys: the numeric source id of a
//! car or rental, and the normalized full name of a renter. As parents are
//! inserted the target-assigned ids are recorded here and later tables resolve
//! their references against it.

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Which of the three lookup maps a key belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    /// Source car id → target vehicle id.
    Vehicles,
    /// Normalized renter name → target customer id.
    Customers,
    /// Source rental id → target rental session id.
    RentalSessions,
}

/// A natural key extracted from a source value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NaturalKey {
    Id(i64),
    Name(String),
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NaturalKey::Id(id) => write!(f, "{id}"),
            NaturalKey::Name(name) => write!(f, "{name:?}"),
        }
    }
}

impl CacheKind {
    /// Extract the natural key this map is indexed by from a raw source value.
    ///
    /// Integer maps accept integers, integral floats and numeric strings.
    /// The customer map accepts any non-blank string.
    pub fn natural_key(self, value: &Value) -> Option<NaturalKey> {
        match self {
            CacheKind::Vehicles | CacheKind::RentalSessions => integer_key(value).map(NaturalKey::Id),
            CacheKind::Customers => match value {
                Value::String(name) => {
                    let normalized = normalize_name(name);
                    (!normalized.is_empty()).then_some(NaturalKey::Name(normalized))
                }
                _ => None,
            },
        }
    }
}

fn integer_key(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.fract() == 0.0)
                .map(|float| float as i64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Lower-case a full name and collapse its whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// The three lookup maps built during a single import run.
#[derive(Debug, Default, Clone)]
pub struct IdentifierCache {
    vehicles: HashMap<i64, String>,
    customers: HashMap<String, String>,
    rental_sessions: HashMap<i64, String>,
}

impl IdentifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a target id; a later insert for the same key replaces it.
    pub fn insert(&mut self, kind: CacheKind, key: NaturalKey, target_id: String) {
        match (kind, key) {
            (CacheKind::Vehicles, NaturalKey::Id(id)) => {
                self.vehicles.insert(id, target_id);
            }
            (CacheKind::RentalSessions, NaturalKey::Id(id)) => {
                self.rental_sessions.insert(id, target_id);
            }
            (CacheKind::Customers, NaturalKey::Name(name)) => {
                self.customers.insert(name, target_id);
            }
            (kind, key) => {
                log::warn!("ignoring cache entry {key} with wrong key type for {kind:?}");
            }
        }
    }

    pub fn get(&self, kind: CacheKind, key: &NaturalKey) -> Option<&str> {
        let target_id = match (kind, key) {
            (CacheKind::Vehicles, NaturalKey::Id(id)) => self.vehicles.get(id),
            (CacheKind::RentalSessions, NaturalKey::Id(id)) => self.rental_sessions.get(id),
            (CacheKind::Customers, NaturalKey::Name(name)) => self.customers.get(name),
            _ => None,
        };
        target_id.map(String::as_str)
    }

    /// Resolve a raw source value straight to a target id.
    pub fn resolve(&self, kind: CacheKind, value: &Value) -> Option<&str> {
        kind.natural_key(value).and_then(|key| self.get(kind, &key))
    }

    pub fn len(&self, kind: CacheKind) -> usize {
        match kind {
            CacheKind::Vehicles => self.vehicles.len(),
            CacheKind::Customers => self.customers.len(),
            CacheKind::RentalSessions => self.rental_sessions.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty() && self.customers.is_empty() && self.rental_sessions.is_empty()
    }
}
