//! Row transformation: source row → target row.
//!
//! Value transforms are pure functions of the source value and its row. The
//! identifier cache is only read here, never written; the executor owns
//! writes after a batch has been persisted.

use crate::import::cache::{CacheKind, IdentifierCache};
use crate::import::loader::SourceRow;
use crate::import::mapping::TableMapping;
use crate::store::TargetRow;
use chrono::{Months, NaiveDate, Utc};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ISO_DATE: &str = "%Y-%m-%d";

/// A per-column value rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueTransform {
    /// Copy the value unchanged; a missing column becomes null.
    #[default]
    PassThrough,
    /// First whitespace-separated token, or `fallback` when there is none.
    FirstToken { fallback: String },
    /// Every token after the first joined by single spaces, or `fallback`.
    RemainingTokens { fallback: String },
    /// Replace null or whitespace-only values.
    DefaultIfBlank { value: Value },
    /// Ignore the source entirely.
    Constant { value: Value },
    /// Keep a present value; otherwise derive a date `years` before the date
    /// held in `column` of the same row.
    YearsBefore { column: String, years: u32 },
    /// 0/1 style flags to JSON booleans.
    IntegerToBool,
    /// Trim and lower-case strings; other values pass through.
    Lowercase,
}

impl ValueTransform {
    pub fn apply(&self, value: Option<&Value>, row: &SourceRow) -> Value {
        let value = value.cloned().unwrap_or(Value::Null);

        match self {
            ValueTransform::PassThrough => value,
            ValueTransform::FirstToken { fallback } => text_of(&value)
                .and_then(|text| text.split_whitespace().next().map(str::to_string))
                .map(Value::String)
                .unwrap_or_else(|| Value::String(fallback.clone())),
            ValueTransform::RemainingTokens { fallback } => {
                let rest = text_of(&value)
                    .map(|text| text.split_whitespace().skip(1).collect::<Vec<_>>().join(" "))
                    .filter(|rest| !rest.is_empty());
                Value::String(rest.unwrap_or_else(|| fallback.clone()))
            }
            ValueTransform::DefaultIfBlank { value: default } => {
                if is_blank(&value) {
                    default.clone()
                } else {
                    value
                }
            }
            ValueTransform::Constant { value: constant } => constant.clone(),
            ValueTransform::YearsBefore { column, years } => {
                if !is_blank(&value) {
                    return value;
                }
                row.get(column)
                    .and_then(parse_date)
                    .and_then(|date| date.checked_sub_months(Months::new(years.saturating_mul(12))))
                    .map(|date| Value::String(date.format(ISO_DATE).to_string()))
                    .unwrap_or(Value::Null)
            }
            ValueTransform::IntegerToBool => to_bool(&value),
            ValueTransform::Lowercase => match value {
                Value::String(text) => Value::String(text.trim().to_lowercase()),
                other => other,
            },
        }
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn to_bool(value: &Value) -> Value {
    match value {
        Value::Bool(flag) => Value::Bool(*flag),
        Value::Number(number) => Value::Bool(number.as_f64().is_some_and(|n| n != 0.0)),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "t" => Value::Bool(true),
            "0" | "false" | "no" | "n" | "f" => Value::Bool(false),
            other => other
                .parse::<f64>()
                .map(|n| Value::Bool(n != 0.0))
                .unwrap_or(Value::Null),
        },
        _ => Value::Null,
    }
}

/// Parse a source date: ISO first, then the leading date of an ISO
/// timestamp, then anything `dateparser` understands.
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    let text = value.as_str()?.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, ISO_DATE) {
        return Some(date);
    }

    if let Some(date) = text
        .get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, ISO_DATE).ok())
    {
        return Some(date);
    }

    dateparser::parse_with_timezone(text, &Utc)
        .ok()
        .map(|datetime| datetime.date_naive())
}

/// Why a source row did not produce a target row.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// A required reference had no entry in the identifier cache.
    UnresolvedReference {
        column: String,
        cache: CacheKind,
        value: Value,
    },
    /// A merge row whose parent could not be identified.
    MissingMergeTarget { column: String },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::UnresolvedReference { column, cache, value } => {
                write!(f, "{column}={value} has no match in the {cache:?} cache")
            }
            RejectReason::MissingMergeTarget { column } => {
                write!(f, "no parent row resolved for '{column}'")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Accepted(TargetRow),
    Rejected(RejectReason),
}

/// Apply a mapping to one source row.
///
/// Every declared target column is present in the output, null when the
/// source lacked it. Foreign keys are resolved against `cache`: a miss on a
/// required key rejects the row; a miss on an optional key writes null.
pub fn transform_row(row: &SourceRow, mapping: &TableMapping, cache: &IdentifierCache) -> RowOutcome {
    let mut target = TargetRow::new();

    for column in &mapping.columns {
        let value = column.transform.apply(row.get(&column.source), row);
        target.insert(column.target.clone(), value);
    }

    for fk in &mapping.foreign_keys {
        let raw = row.get(&fk.source_column).unwrap_or(&Value::Null);
        match cache.resolve(fk.cache, raw) {
            Some(target_id) => {
                target.insert(fk.target_column.clone(), Value::String(target_id.to_string()));
            }
            None if fk.required => {
                return RowOutcome::Rejected(RejectReason::UnresolvedReference {
                    column: fk.source_column.clone(),
                    cache: fk.cache,
                    value: raw.clone(),
                });
            }
            None => {
                target.insert(fk.target_column.clone(), Value::Null);
            }
        }
    }

    RowOutcome::Accepted(target)
}
