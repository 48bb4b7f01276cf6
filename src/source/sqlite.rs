//! SQLite source backend
//!
//! Opens a fresh connection per read, like a short-lived cursor session,
//! and streams rows straight off the statement.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, OpenFlags, ToSql};
use serde_json::{Number, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::query::{ParamValue, QueryParam};
use super::{SourceDatabase, SourceRow};
use crate::error::{Result, SyncError};

impl ToSql for ParamValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            ParamValue::Integer(i) => i.to_sql(),
            ParamValue::Text(s) => s.to_sql(),
        }
    }
}

/// Read-only SQLite source
#[derive(Debug, Clone)]
pub struct SqliteSource {
    db_path: PathBuf,
    busy_timeout: Option<Duration>,
}

impl SqliteSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            db_path: path.as_ref().to_path_buf(),
            busy_timeout: None,
        }
    }

    /// Wait up to `timeout` on a locked database instead of failing at once
    pub fn with_busy_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn connect(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.db_path, flags)?;
        if let Some(timeout) = self.busy_timeout {
            conn.busy_timeout(timeout)?;
        }
        Ok(conn)
    }
}

impl SourceDatabase for SqliteSource {
    fn for_each_row(
        &self,
        sql: &str,
        params: &[QueryParam],
        visit: &mut dyn FnMut(&[String], SourceRow) -> Result<()>,
    ) -> Result<()> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        if columns.is_empty() {
            return Err(SyncError::InvalidRow(
                "query returns no columns, expected a leading timestamp".to_string(),
            ));
        }

        let names: Vec<String> = params.iter().map(|p| format!(":{}", p.name)).collect();
        let bound: Vec<(&str, &dyn ToSql)> = names
            .iter()
            .zip(params)
            .map(|(name, param)| (name.as_str(), &param.value as &dyn ToSql))
            .collect();

        let mut rows = stmt.query(bound.as_slice())?;
        while let Some(row) = rows.next()? {
            let event_timestamp = parse_timestamp(row.get_ref(0)?)?;
            let fields = (1..columns.len())
                .map(|i| row.get_ref(i).map(json_value))
                .collect::<rusqlite::Result<Vec<_>>>()?;

            visit(&columns, SourceRow { event_timestamp, fields })?;
        }

        Ok(())
    }
}

/// Decode the timestamp column.
///
/// Text is RFC 3339 or `YYYY-MM-DD HH:MM:SS[.fff]` taken as UTC; integers
/// are epoch seconds.
pub fn parse_timestamp(value: ValueRef<'_>) -> Result<DateTime<Utc>> {
    match value {
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| SyncError::InvalidRow(format!("timestamp is not UTF-8: {}", e)))?
                .trim();

            if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
                return Ok(ts.with_timezone(&Utc));
            }
            ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
                .ok_or_else(|| SyncError::InvalidRow(format!("unrecognized timestamp '{}'", text)))
        }
        ValueRef::Integer(secs) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| SyncError::InvalidRow(format!("timestamp {} out of range", secs))),
        other => Err(SyncError::InvalidRow(format!(
            "first column must be a timestamp, got {:?}",
            other.data_type()
        ))),
    }
}

/// Measures and dimensions are published verbatim
fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}
