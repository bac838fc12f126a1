//! Schema metadata discovered from an uploaded database.
//!
//! Column kinds are advisory: they drive display and validation hints in the
//! table-selection step but are never enforced when rows are read.

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Semantic type inferred from a declared SQLite storage type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Number,
    Date,
    Boolean,
    String,
}

/// A single column of a source table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    /// Storage type exactly as declared in the source DDL (may be empty).
    pub declared_type: String,
    pub kind: ColumnKind,
}

/// A table discovered in the source database.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count: u64,
}

impl TableInfo {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column.name == name)
    }
}

const NUMBER_MARKERS: [&str; 6] = ["INT", "REAL", "FLOAT", "DOUBLE", "NUMERIC", "DECIMAL"];
const DATE_MARKERS: [&str; 2] = ["DATE", "TIME"];

/// Map a declared storage type onto a [`ColumnKind`].
///
/// Matching is a case-insensitive substring test applied in a fixed order:
/// numeric markers win over date markers, which win over `BOOL`. Anything
/// else, including an empty declaration, is a string.
pub fn infer_column_kind(declared_type: &str) -> ColumnKind {
    let upper = declared_type.to_ascii_uppercase();

    if NUMBER_MARKERS.iter().any(|marker| upper.contains(marker)) {
        ColumnKind::Number
    } else if DATE_MARKERS.iter().any(|marker| upper.contains(marker)) {
        ColumnKind::Date
    } else if upper.contains("BOOL") {
        ColumnKind::Boolean
    } else {
        ColumnKind::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_types_map_to_number() {
        for declared in ["INTEGER", "int", "BIGINT", "REAL", "Float", "DOUBLE PRECISION", "NUMERIC(10,2)", "decimal"] {
            assert_eq!(infer_column_kind(declared), ColumnKind::Number, "{declared}");
        }
    }

    #[test]
    fn temporal_types_map_to_date() {
        assert_eq!(infer_column_kind("DATE"), ColumnKind::Date);
        assert_eq!(infer_column_kind("datetime"), ColumnKind::Date);
        assert_eq!(infer_column_kind("TIMESTAMP"), ColumnKind::Date);
    }

    #[test]
    fn boolean_and_fallback() {
        assert_eq!(infer_column_kind("BOOLEAN"), ColumnKind::Boolean);
        assert_eq!(infer_column_kind("bool"), ColumnKind::Boolean);
        assert_eq!(infer_column_kind("TEXT"), ColumnKind::String);
        assert_eq!(infer_column_kind("VARCHAR(20)"), ColumnKind::String);
        assert_eq!(infer_column_kind(""), ColumnKind::String);
    }

    #[test]
    fn number_markers_take_precedence() {
        // "POINT" contains "INT".
        assert_eq!(infer_column_kind("POINT"), ColumnKind::Number);
        assert_eq!(infer_column_kind("INTERVAL_TIME"), ColumnKind::Number);
    }
}
