//! Declarative source → target table mappings.
//!
//! Every mapping is plain data: column transforms are [`ValueTransform`]
//! variants rather than closures, foreign keys name the cache map they resolve
//! against, and tables that feed the identifier cache say which natural key
//! they register. The built-in registry describes the legacy fleet database;
//! a JSON file with the same shape can replace it at startup.

use crate::import::cache::CacheKind;
use crate::import::transform::ValueTransform;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Column the executor writes correlation tokens into for registering tables.
pub const DEFAULT_KEY_COLUMN: &str = "id";

const UNKNOWN_NAME: &str = "Unknown";
const PHONE_PLACEHOLDER: &str = "000-000-0000";
const PENDING_REGISTRATION: &str = "PENDING";

fn default_key_column() -> String {
    DEFAULT_KEY_COLUMN.to_string()
}

/// How one source column becomes one target column.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnTransform {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub transform: ValueTransform,
}

/// A reference that must be rebuilt from the identifier cache.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    /// Source column holding the natural key.
    pub source_column: String,
    /// Target column receiving the resolved id.
    pub target_column: String,
    pub cache: CacheKind,
    /// Rows whose reference cannot be resolved are rejected when set;
    /// otherwise the target column is written as null.
    #[serde(default)]
    pub required: bool,
}

/// Declares that inserted rows of this table populate a cache map.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheRegistration {
    pub cache: CacheKind,
    /// Source column the natural key is read from.
    pub natural_key_column: String,
    /// Target primary-key column; carries the correlation token on insert.
    #[serde(default = "default_key_column")]
    pub target_key_column: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Insert,
    /// Patch an existing target row instead of inserting: `parent_column` of
    /// the transformed row names the entity whose `key_column` is updated.
    MergeIntoParent {
        #[serde(rename = "parentColumn")]
        parent_column: String,
        #[serde(rename = "keyColumn", default = "default_key_column")]
        key_column: String,
    },
}

/// How one source table is imported into one target table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableMapping {
    pub source_table: String,
    pub target_table: String,
    pub description: String,
    pub columns: Vec<ColumnTransform>,
    /// Tables that must be imported first when they are part of the selection.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub registers: Option<CacheRegistration>,
    #[serde(default)]
    pub write_mode: WriteMode,
}

impl TableMapping {
    /// Whether rows need identifier-cache lookups before they can be written.
    pub fn requires_lookup(&self) -> bool {
        !self.foreign_keys.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        matches!(self.write_mode, WriteMode::MergeIntoParent { .. })
    }
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to read mapping file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid mapping document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("mapping for source table '{0}' is defined more than once")]
    DuplicateSource(String),
    #[error("mapping #{0} has an empty source or target table name")]
    EmptyName(usize),
    #[error("merge mapping '{table}' has no foreign key targeting '{column}'")]
    MissingParentKey { table: String, column: String },
}

/// Ordered, immutable set of table mappings.
#[derive(Debug, Clone)]
pub struct MappingRegistry {
    mappings: Vec<TableMapping>,
}

impl MappingRegistry {
    pub fn new(mappings: Vec<TableMapping>) -> Result<Self, MappingError> {
        validate(&mappings)?;
        Ok(Self { mappings })
    }

    /// Parse a JSON array of mappings.
    pub fn from_json(document: &str) -> Result<Self, MappingError> {
        let mappings: Vec<TableMapping> = serde_json::from_str(document)?;
        Self::new(mappings)
    }

    pub fn load(path: &Path) -> Result<Self, MappingError> {
        let document = std::fs::read_to_string(path)?;
        let registry = Self::from_json(&document)?;
        log::info!(
            "loaded {} table mappings from {}",
            registry.mappings.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Mapping for an exact source-table name.
    pub fn get(&self, source_table: &str) -> Option<&TableMapping> {
        self.mappings
            .iter()
            .find(|mapping| mapping.source_table == source_table)
    }

    pub fn source_tables(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.mappings
            .iter()
            .map(|mapping| mapping.source_table.as_str())
    }

    pub fn mappings(&self) -> &[TableMapping] {
        &self.mappings
    }

    /// The mappings that describe the legacy fleet database.
    pub fn builtin() -> Self {
        Self {
            mappings: builtin_mappings(),
        }
    }
}

impl Default for MappingRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn validate(mappings: &[TableMapping]) -> Result<(), MappingError> {
    let mut seen = HashSet::new();

    for (idx, mapping) in mappings.iter().enumerate() {
        if mapping.source_table.trim().is_empty() || mapping.target_table.trim().is_empty() {
            return Err(MappingError::EmptyName(idx));
        }

        if !seen.insert(mapping.source_table.as_str()) {
            return Err(MappingError::DuplicateSource(mapping.source_table.clone()));
        }

        if let WriteMode::MergeIntoParent { parent_column, .. } = &mapping.write_mode {
            let has_parent = mapping
                .foreign_keys
                .iter()
                .any(|fk| &fk.target_column == parent_column);
            if !has_parent {
                return Err(MappingError::MissingParentKey {
                    table: mapping.source_table.clone(),
                    column: parent_column.clone(),
                });
            }
        }
    }

    Ok(())
}

fn column(source: &str, target: &str) -> ColumnTransform {
    column_with(source, target, ValueTransform::PassThrough)
}

fn column_with(source: &str, target: &str, transform: ValueTransform) -> ColumnTransform {
    ColumnTransform {
        source: source.to_string(),
        target: target.to_string(),
        transform,
    }
}

fn reference(source: &str, target: &str, cache: CacheKind, required: bool) -> ForeignKey {
    ForeignKey {
        source_column: source.to_string(),
        target_column: target.to_string(),
        cache,
        required,
    }
}

fn vehicle_reference(required: bool) -> ForeignKey {
    reference("car_id", "vehicle_id", CacheKind::Vehicles, required)
}

fn registers(cache: CacheKind, natural_key_column: &str) -> Option<CacheRegistration> {
    Some(CacheRegistration {
        cache,
        natural_key_column: natural_key_column.to_string(),
        target_key_column: default_key_column(),
    })
}

fn depends(tables: &[&str]) -> Vec<String> {
    tables.iter().map(|table| table.to_string()).collect()
}

fn builtin_mappings() -> Vec<TableMapping> {
    vec![
        TableMapping {
            source_table: "cars".into(),
            target_table: "vehicles".into(),
            description: "Fleet vehicles".into(),
            columns: vec![
                column("make", "make"),
                column("model", "model"),
                column("year", "year"),
                column("plate", "license_plate"),
                column("vin", "vin"),
                column("color", "color"),
                column("daily_rate", "daily_rate"),
                column("mileage", "current_mileage"),
                column_with("status", "status", ValueTransform::Lowercase),
                column("purchase_date", "purchase_date"),
                column("purchase_price", "purchase_price"),
            ],
            depends_on: Vec::new(),
            foreign_keys: Vec::new(),
            registers: registers(CacheKind::Vehicles, "id"),
            write_mode: WriteMode::Insert,
        },
        TableMapping {
            source_table: "renters".into(),
            target_table: "customers".into(),
            description: "Customer records; full names are split into first and last name".into(),
            columns: vec![
                column_with(
                    "name",
                    "first_name",
                    ValueTransform::FirstToken {
                        fallback: UNKNOWN_NAME.into(),
                    },
                ),
                column_with(
                    "name",
                    "last_name",
                    ValueTransform::RemainingTokens {
                        fallback: UNKNOWN_NAME.into(),
                    },
                ),
                column_with(
                    "phone",
                    "phone",
                    ValueTransform::DefaultIfBlank {
                        value: Value::from(PHONE_PLACEHOLDER),
                    },
                ),
                column("email", "email"),
                column("license_number", "license_number"),
                column("address", "address"),
                column("notes", "notes"),
            ],
            depends_on: Vec::new(),
            foreign_keys: Vec::new(),
            registers: registers(CacheKind::Customers, "name"),
            write_mode: WriteMode::Insert,
        },
        TableMapping {
            source_table: "rentals".into(),
            target_table: "rental_sessions".into(),
            description: "Rental sessions linked to vehicles and customers".into(),
            columns: vec![
                column("renter_name", "customer_name"),
                column("start_date", "start_date"),
                column("end_date", "end_date"),
                column("daily_rate", "daily_rate"),
                column("total_amount", "total_amount"),
                column("deposit", "deposit"),
                column_with("status", "status", ValueTransform::Lowercase),
                column("start_mileage", "start_mileage"),
                column("end_mileage", "end_mileage"),
                column("notes", "notes"),
            ],
            depends_on: depends(&["cars", "renters"]),
            foreign_keys: vec![
                vehicle_reference(true),
                reference("renter_name", "customer_id", CacheKind::Customers, false),
            ],
            registers: registers(CacheKind::RentalSessions, "id"),
            write_mode: WriteMode::Insert,
        },
        TableMapping {
            source_table: "payments".into(),
            target_table: "payments".into(),
            description: "Payments received against rental sessions".into(),
            columns: vec![
                column("amount", "amount"),
                column("payment_date", "paid_at"),
                column_with("method", "method", ValueTransform::Lowercase),
                column("notes", "notes"),
            ],
            depends_on: depends(&["rentals"]),
            foreign_keys: vec![reference(
                "rental_id",
                "rental_session_id",
                CacheKind::RentalSessions,
                false,
            )],
            registers: None,
            write_mode: WriteMode::Insert,
        },
        TableMapping {
            source_table: "expenses".into(),
            target_table: "expenses".into(),
            description: "Vehicle running costs".into(),
            columns: vec![
                column_with("category", "category", ValueTransform::Lowercase),
                column("amount", "amount"),
                column("expense_date", "expense_date"),
                column("description", "description"),
                column("vendor", "vendor"),
            ],
            depends_on: depends(&["cars"]),
            foreign_keys: vec![vehicle_reference(true)],
            registers: None,
            write_mode: WriteMode::Insert,
        },
        TableMapping {
            source_table: "insurance".into(),
            target_table: "insurance_policies".into(),
            description: "Insurance policies; a missing start date is set one year before expiry".into(),
            columns: vec![
                column("provider", "provider"),
                column("policy_number", "policy_number"),
                column_with(
                    "start_date",
                    "start_date",
                    ValueTransform::YearsBefore {
                        column: "expiry_date".into(),
                        years: 1,
                    },
                ),
                column("expiry_date", "expiry_date"),
                column("premium", "premium"),
            ],
            depends_on: depends(&["cars"]),
            foreign_keys: vec![vehicle_reference(true)],
            registers: None,
            write_mode: WriteMode::Insert,
        },
        TableMapping {
            source_table: "registration".into(),
            target_table: "registrations".into(),
            description: "Vehicle registrations; missing numbers are recorded as PENDING".into(),
            columns: vec![
                column_with(
                    "registration_number",
                    "registration_number",
                    ValueTransform::DefaultIfBlank {
                        value: Value::from(PENDING_REGISTRATION),
                    },
                ),
                column("expiry_date", "expiry_date"),
                column("state", "state"),
                column("fee", "fee"),
            ],
            depends_on: depends(&["cars"]),
            foreign_keys: vec![vehicle_reference(true)],
            registers: None,
            write_mode: WriteMode::Insert,
        },
        TableMapping {
            source_table: "maintenance".into(),
            target_table: "maintenance_tickets".into(),
            description: "Maintenance and repair tickets".into(),
            columns: vec![
                column("description", "description"),
                column("service_date", "service_date"),
                column("cost", "cost"),
                column_with("status", "status", ValueTransform::Lowercase),
            ],
            depends_on: depends(&["cars"]),
            foreign_keys: vec![vehicle_reference(true)],
            registers: None,
            write_mode: WriteMode::Insert,
        },
        TableMapping {
            source_table: "fines".into(),
            target_table: "traffic_fines".into(),
            description: "Traffic fines, linked to the rental in progress when known".into(),
            columns: vec![
                column("amount", "amount"),
                column("violation_date", "violation_date"),
                column("description", "description"),
                column_with("paid", "paid", ValueTransform::IntegerToBool),
            ],
            depends_on: depends(&["cars", "rentals"]),
            foreign_keys: vec![
                vehicle_reference(true),
                reference(
                    "rental_id",
                    "rental_session_id",
                    CacheKind::RentalSessions,
                    false,
                ),
            ],
            registers: None,
            write_mode: WriteMode::Insert,
        },
        TableMapping {
            source_table: "tracker".into(),
            target_table: "vehicles".into(),
            description: "GPS tracker details, merged into the owning vehicle".into(),
            columns: vec![
                column("tracker_id", "tracker_id"),
                column("provider", "tracker_provider"),
                column("sim_number", "tracker_sim"),
                column("installed_date", "tracker_installed_at"),
            ],
            depends_on: depends(&["cars"]),
            foreign_keys: vec![vehicle_reference(false)],
            registers: None,
            write_mode: WriteMode::MergeIntoParent {
                parent_column: "vehicle_id".into(),
                key_column: default_key_column(),
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_is_valid() {
        let registry = MappingRegistry::builtin();
        validate(registry.mappings()).expect("builtin mappings validate");

        let sources: Vec<&str> = registry.source_tables().collect();
        assert_eq!(sources.len(), 10);
        assert_eq!(sources[0], "cars");
        assert!(sources.contains(&"tracker"));
    }

    #[test]
    fn lookup_is_exact() {
        let registry = MappingRegistry::builtin();
        assert_eq!(registry.get("rentals").unwrap().target_table, "rental_sessions");
        assert!(registry.get("Rentals").is_none());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn lookup_flags_follow_foreign_keys() {
        let registry = MappingRegistry::builtin();
        assert!(!registry.get("cars").unwrap().requires_lookup());
        assert!(registry.get("expenses").unwrap().requires_lookup());
        assert!(registry.get("tracker").unwrap().is_merge());
        assert!(!registry.get("payments").unwrap().is_merge());
    }

    #[test]
    fn registry_round_trips_through_json() {
        let registry = MappingRegistry::builtin();
        let document = serde_json::to_string(registry.mappings()).unwrap();
        let reloaded = MappingRegistry::from_json(&document).unwrap();
        assert_eq!(reloaded.mappings(), registry.mappings());
    }

    #[test]
    fn minimal_json_uses_defaults() {
        let document = r#"[{
            "sourceTable": "cars",
            "targetTable": "vehicles",
            "description": "cars",
            "columns": [{"source": "plate", "target": "license_plate"}]
        }]"#;
        let registry = MappingRegistry::from_json(document).unwrap();
        let mapping = registry.get("cars").unwrap();
        assert_eq!(mapping.columns[0].transform, ValueTransform::PassThrough);
        assert_eq!(mapping.write_mode, WriteMode::Insert);
        assert!(mapping.depends_on.is_empty());
    }

    #[test]
    fn merge_documents_use_camel_case_keys() {
        let document = r#"[{
            "sourceTable": "gps",
            "targetTable": "vehicles",
            "description": "gps units",
            "columns": [{"source": "unit", "target": "tracker_id"}],
            "foreignKeys": [{"sourceColumn": "car_id", "targetColumn": "vehicle_id", "cache": "vehicles"}],
            "writeMode": {"mode": "merge_into_parent", "parentColumn": "vehicle_id"}
        }]"#;
        let registry = MappingRegistry::from_json(document).unwrap();
        assert_eq!(
            registry.get("gps").unwrap().write_mode,
            WriteMode::MergeIntoParent {
                parent_column: "vehicle_id".into(),
                key_column: "id".into(),
            }
        );

        let written = serde_json::to_value(&registry.get("gps").unwrap().write_mode).unwrap();
        assert_eq!(written["parentColumn"], "vehicle_id");
        assert_eq!(written["keyColumn"], "id");
    }

    #[test]
    fn duplicate_sources_are_rejected() {
        let mut mappings = builtin_mappings();
        mappings.push(mappings[0].clone());
        assert!(matches!(
            MappingRegistry::new(mappings),
            Err(MappingError::DuplicateSource(name)) if name == "cars"
        ));
    }

    #[test]
    fn merge_without_parent_key_is_rejected() {
        let mut mappings = builtin_mappings();
        let tracker = mappings.iter_mut().find(|m| m.source_table == "tracker").unwrap();
        tracker.foreign_keys.clear();
        assert!(matches!(
            MappingRegistry::new(mappings),
            Err(MappingError::MissingParentKey { .. })
        ));
    }
}
