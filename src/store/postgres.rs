use super::{StoreError, TargetRow, TargetStore, filter_text, validate_identifier};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::types::Json;
use std::collections::BTreeSet;

/// Writes straight into the fleet schema in PostgreSQL.
///
/// Row payloads travel as one JSONB parameter and are expanded server-side
/// with `jsonb_populate_recordset`, so column types are coerced by the
/// target table definition. Only columns present in the payload are listed
/// in the insert; everything else takes its column default.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn quote(identifier: &str) -> Result<String, StoreError> {
    Ok(format!("\"{}\"", validate_identifier(identifier)?))
}

fn into_rows(values: Vec<(Json<Value>,)>) -> Result<Vec<TargetRow>, StoreError> {
    values
        .into_iter()
        .map(|(Json(value),)| match value {
            Value::Object(row) => Ok(row),
            other => Err(StoreError::UnexpectedResponse(format!(
                "expected a row object, got {other}"
            ))),
        })
        .collect()
}

fn insert_sql(table: &str, rows: &[TargetRow]) -> Result<String, StoreError> {
    let table = quote(table)?;
    let columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();
    if columns.is_empty() {
        return Err(StoreError::UnexpectedResponse(
            "insert payload has no columns".into(),
        ));
    }

    let column_list = columns
        .into_iter()
        .map(quote)
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");

    Ok(format!(
        "INSERT INTO {table} AS target ({column_list}) \
         SELECT {column_list} FROM jsonb_populate_recordset(NULL::{table}, $1) \
         RETURNING to_jsonb(target)"
    ))
}

fn update_sql(table: &str, key_column: &str, patch: &TargetRow) -> Result<String, StoreError> {
    let table = quote(table)?;
    let key_column = quote(key_column)?;
    let assignments = patch
        .keys()
        .map(|column| quote(column).map(|quoted| format!("{quoted} = patch.{quoted}")))
        .collect::<Result<Vec<_>, _>>()?;
    if assignments.is_empty() {
        return Err(StoreError::UnexpectedResponse("update patch is empty".into()));
    }

    Ok(format!(
        "UPDATE {table} AS target SET {} \
         FROM jsonb_populate_record(NULL::{table}, $1) AS patch \
         WHERE target.{key_column}::text = $2 \
         RETURNING to_jsonb(target)",
        assignments.join(", ")
    ))
}

fn select_sql(table: &str, filters: &[(String, Value)]) -> Result<String, StoreError> {
    let table = quote(table)?;
    let conditions = filters
        .iter()
        .enumerate()
        .map(|(idx, (column, _))| {
            quote(column).map(|quoted| format!("target.{quoted}::text = ${}", idx + 1))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut sql = format!("SELECT to_jsonb(target) FROM {table} AS target");
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    Ok(sql)
}

#[async_trait]
impl TargetStore for PgStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, table: &str, rows: Vec<TargetRow>) -> Result<Vec<TargetRow>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let sql = insert_sql(table, &rows)?;
        let returned: Vec<(Json<Value>,)> = sqlx::query_as(&sql)
            .bind(Json(&rows))
            .fetch_all(&self.pool)
            .await?;
        into_rows(returned)
    }

    async fn update(
        &self,
        table: &str,
        key_column: &str,
        key: &str,
        patch: TargetRow,
    ) -> Result<Vec<TargetRow>, StoreError> {
        let sql = update_sql(table, key_column, &patch)?;
        let returned: Vec<(Json<Value>,)> = sqlx::query_as(&sql)
            .bind(Json(&patch))
            .bind(key)
            .fetch_all(&self.pool)
            .await?;
        into_rows(returned)
    }

    async fn select(
        &self,
        table: &str,
        filters: &[(String, Value)],
    ) -> Result<Vec<TargetRow>, StoreError> {
        let sql = select_sql(table, filters)?;
        let mut query = sqlx::query_as::<_, (Json<Value>,)>(&sql);
        for (_, value) in filters {
            query = query.bind(filter_text(value));
        }
        into_rows(query.fetch_all(&self.pool).await?)
    }

    async fn healthcheck(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
