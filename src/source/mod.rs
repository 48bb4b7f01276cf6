//! Source Database Reading
//!
//! Runs the configured statement against the source database and turns
//! accepted rows into publish records.
//!
//! ## Row layout
//!
//! ```text
//! column:  0          1 .. k           k+1 ..
//!          timestamp  filter dims      measures
//! ```
//!
//! Every column after the timestamp is published under its title-cased
//! column name, dimension columns included.

pub mod query;
pub mod sqlite;

pub use query::{has_interval_placeholder, BoundQuery, ParamValue, QueryParam};
pub use sqlite::SqliteSource;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::Result;
use crate::filters::FilterSpec;
use crate::index::ExistingDataIndex;

/// Timestamp format expected by the events API (second precision, UTC)
pub const EVENT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One row from the source: the event timestamp followed by every other column
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub event_timestamp: DateTime<Utc>,
    /// Columns 1.. of the result set
    pub fields: Vec<Value>,
}

/// Event ready to publish
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishRecord {
    #[serde(rename = "eventTimestamp")]
    pub event_timestamp: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl PublishRecord {
    /// Build from a row and the names of columns 1.. of its result set
    pub fn from_row(row: SourceRow, field_names: &[String]) -> Self {
        let fields = field_names
            .iter()
            .cloned()
            .zip(row.fields)
            .collect::<Map<String, Value>>();

        Self {
            event_timestamp: row.event_timestamp.format(EVENT_TIMESTAMP_FORMAT).to_string(),
            fields,
        }
    }
}

/// Title-case a column name: first letter of each word upper, rest lower.
///
/// Words are runs of letters, so `REGION_NAME` becomes `Region_Name` and
/// `cpu2load` becomes `Cpu2Load`.
pub fn title_case(column: &str) -> String {
    let mut out = String::with_capacity(column.len());
    let mut in_word = false;

    for c in column.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }

    out
}

/// Backend able to stream the rows of one parameterized statement.
///
/// `visit` receives the result column names (all of them, timestamp first)
/// and each row in cursor order. An error from `visit` or the backend ends
/// the read.
pub trait SourceDatabase {
    fn for_each_row(
        &self,
        sql: &str,
        params: &[QueryParam],
        visit: &mut dyn FnMut(&[String], SourceRow) -> Result<()>,
    ) -> Result<()>;
}

/// Outcome of one source read
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    /// Records accepted for publishing, in cursor order
    pub records: Vec<PublishRecord>,
    /// Rows returned by the database
    pub rows_read: usize,
    /// Rows rejected as already published
    pub rows_skipped: usize,
}

/// Reads new rows from the source database
pub struct SourceReader<D> {
    database: D,
    query: BoundQuery,
}

impl<D: SourceDatabase> SourceReader<D> {
    /// Prepare the configured query against the filters once
    pub fn new(database: D, query_template: &str, filters: &FilterSpec) -> Self {
        Self {
            database,
            query: BoundQuery::prepare(query_template, filters),
        }
    }

    /// Run the query with `interval_minutes` lookback.
    ///
    /// With an index, only rows it reports as new are kept; without one
    /// every row is kept.
    pub fn read(
        &self,
        interval_minutes: u32,
        index: Option<&ExistingDataIndex>,
    ) -> Result<SourceBatch> {
        info!("Reading data from database");

        let params = self.query.params(interval_minutes);
        let mut batch = SourceBatch::default();
        let mut field_names: Option<Vec<String>> = None;

        self.database.for_each_row(self.query.sql(), &params, &mut |columns, row| {
            batch.rows_read += 1;

            if let Some(index) = index {
                if !index.is_new(&row) {
                    batch.rows_skipped += 1;
                    return Ok(());
                }
            }

            let names = field_names
                .get_or_insert_with(|| columns.iter().skip(1).map(|c| title_case(c)).collect());
            batch.records.push(PublishRecord::from_row(row, names));
            Ok(())
        })?;

        debug!("DB response: {:?}", batch.records);
        info!(
            "Received {} rows from database ({} new, {} already published)",
            batch.rows_read,
            batch.records.len(),
            batch.rows_skipped
        );

        Ok(batch)
    }
}
