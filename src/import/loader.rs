//! Loading uploaded SQLite files into an in-memory engine.
//!
//! The uploaded bytes are staged in a temporary file, restored into an
//! in-memory connection through the SQLite backup API and the staging file is
//! removed immediately. Everything after that point reads from memory.

use crate::import::schema::{ColumnInfo, TableInfo, infer_column_kind};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, DatabaseName};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// File extensions accepted for upload (compared case-insensitively).
pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["db", "sqlite", "sqlite3"];

const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";

/// One source row: column name to JSON value.
pub type SourceRow = Map<String, Value>;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("unsupported file type for '{file_name}': expected a .db, .sqlite or .sqlite3 file")]
    UnsupportedExtension { file_name: String },
    #[error("'{file_name}' is not a readable SQLite database: {reason}")]
    Corrupt { file_name: String, reason: String },
    #[error("'{file_name}' does not contain any tables")]
    NoTables { file_name: String },
    #[error("table '{0}' does not exist in the uploaded database")]
    UnknownTable(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn corrupt(file_name: &str, reason: impl ToString) -> LoaderError {
    LoaderError::Corrupt {
        file_name: file_name.to_string(),
        reason: reason.to_string(),
    }
}

/// An uploaded database held open for the lifetime of one upload session.
///
/// Dropping the value releases the engine; [`EmbeddedDatabase::close`] does
/// the same but reports any error SQLite raises while closing.
pub struct EmbeddedDatabase {
    conn: Mutex<Connection>,
    file_name: String,
    tables: Vec<TableInfo>,
    size_bytes: u64,
    fingerprint: String,
}

impl EmbeddedDatabase {
    /// Validate and load an uploaded payload.
    ///
    /// # Errors
    /// - [`LoaderError::UnsupportedExtension`] for names outside [`ACCEPTED_EXTENSIONS`]
    /// - [`LoaderError::Corrupt`] when the bytes cannot be read as SQLite
    /// - [`LoaderError::NoTables`] when schema discovery finds nothing
    pub fn from_bytes(file_name: &str, bytes: &[u8]) -> Result<Self, LoaderError> {
        if !has_accepted_extension(file_name) {
            return Err(LoaderError::UnsupportedExtension {
                file_name: file_name.to_string(),
            });
        }

        if !bytes.starts_with(SQLITE_HEADER) {
            return Err(corrupt(file_name, "missing SQLite file header"));
        }

        let conn = restore_into_memory(file_name, bytes)?;
        let tables = discover_tables(&conn).map_err(|err| corrupt(file_name, err))?;

        if tables.is_empty() {
            return Err(LoaderError::NoTables {
                file_name: file_name.to_string(),
            });
        }

        let fingerprint = format!("{:x}", Sha256::digest(bytes));

        log::info!(
            "loaded '{}' ({} bytes, {} tables, sha256 {})",
            file_name,
            bytes.len(),
            tables.len(),
            &fingerprint[..12]
        );

        Ok(Self {
            conn: Mutex::new(conn),
            file_name: file_name.to_string(),
            tables,
            size_bytes: bytes.len() as u64,
            fingerprint,
        })
    }

    /// Read a database file from disk and load it like an upload.
    pub fn open(path: &Path) -> Result<Self, LoaderError> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_bytes(&file_name, &bytes)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|table| table.name == name)
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Hex-encoded SHA-256 of the uploaded payload.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Sum of the discovered row counts for the named tables.
    ///
    /// Names that were not discovered contribute zero.
    pub fn total_rows<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> u64 {
        names
            .into_iter()
            .filter_map(|name| self.table(name))
            .map(|table| table.row_count)
            .sum()
    }

    /// Full scan of a discovered table.
    pub fn read_rows(&self, table: &str) -> Result<Vec<SourceRow>, LoaderError> {
        self.query_rows(table, None)
    }

    /// First `limit` rows of a discovered table, in storage order.
    pub fn read_sample(&self, table: &str, limit: usize) -> Result<Vec<SourceRow>, LoaderError> {
        self.query_rows(table, Some(limit))
    }

    fn query_rows(&self, table: &str, limit: Option<usize>) -> Result<Vec<SourceRow>, LoaderError> {
        let info = self
            .table(table)
            .ok_or_else(|| LoaderError::UnknownTable(table.to_string()))?;

        let mut sql = format!("SELECT * FROM {}", quote_ident(&info.name));
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut rows = stmt.query([])?;
        let mut records = Vec::with_capacity(info.row_count as usize);
        while let Some(row) = rows.next()? {
            let mut record = SourceRow::new();
            for (idx, name) in names.iter().enumerate() {
                record.insert(name.clone(), sql_to_json(row.get_ref(idx)?));
            }
            records.push(record);
        }

        log::trace!("read {} rows from '{}'", records.len(), table);
        Ok(records)
    }

    /// Release the engine, surfacing close errors instead of ignoring them.
    pub fn close(self) -> Result<(), LoaderError> {
        let file_name = self.file_name;
        self.conn
            .into_inner()
            .close()
            .map_err(|(_, err)| LoaderError::Sqlite(err))?;
        log::debug!("released embedded database '{}'", file_name);
        Ok(())
    }
}

impl std::fmt::Debug for EmbeddedDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedDatabase")
            .field("file_name", &self.file_name)
            .field("tables", &self.tables.len())
            .field("size_bytes", &self.size_bytes)
            .finish()
    }
}

pub fn has_accepted_extension(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            ACCEPTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn restore_into_memory(file_name: &str, bytes: &[u8]) -> Result<Connection, LoaderError> {
    let mut staged = tempfile::Builder::new()
        .prefix("fleet-upload-")
        .suffix(".sqlite")
        .tempfile()?;
    staged.write_all(bytes)?;
    staged.flush()?;

    let mut conn = Connection::open_in_memory()?;
    conn.restore(
        DatabaseName::Main,
        staged.path(),
        None::<fn(rusqlite::backup::Progress)>,
    )
    .map_err(|err| corrupt(file_name, err))?;

    Ok(conn)
}

fn discover_tables(conn: &Connection) -> rusqlite::Result<Vec<TableInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let columns = table_columns(conn, &name)?;
        let row_count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(&name)),
            [],
            |row| row.get(0),
        )?;

        tables.push(TableInfo {
            name,
            columns,
            row_count: row_count.max(0) as u64,
        });
    }

    Ok(tables)
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let declared_type: Option<String> = row.get(2)?;
            let declared_type = declared_type.unwrap_or_default();
            Ok(ColumnInfo {
                kind: infer_column_kind(&declared_type),
                name,
                declared_type,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>();
    columns
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(int) => Value::from(int),
        ValueRef::Real(real) => Number::from_f64(real)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(BASE64.encode(bytes)),
    }
}
