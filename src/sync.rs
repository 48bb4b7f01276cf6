//! Sync Orchestrator
//!
//! Runs one sync cycle per tick in one of two modes, picked once at
//! startup from the configured query text:
//!
//! ```text
//!  Backfill (no :interval)          Incremental (:interval present)
//!  ┌──────────────────────┐         ┌──────────────────────┐
//!  │ query events store   │         │ read source, 1 min   │
//!  │ build existing index │         │ publish everything   │
//!  │ read source, window  │         └──────────────────────┘
//!  │ drop published rows  │
//!  │ publish the rest     │
//!  └──────────────────────┘
//! ```
//!
//! A cycle either completes or fails as a whole before publishing; only
//! individual publish batches can fail without failing the cycle.

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::events_api::EventStore;
use crate::filters::FilterSpec;
use crate::index::ExistingDataIndex;
use crate::publisher::{PublishReport, Publisher};
use crate::source::{has_interval_placeholder, SourceDatabase, SourceReader, EVENT_TIMESTAMP_FORMAT};

/// Lookback passed to the source query in incremental mode
pub const INCREMENTAL_LOOKBACK_MINUTES: u32 = 1;

/// How each cycle decides what is new
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Deduplicate against the events store over `window_minutes`
    Backfill { window_minutes: u32 },
    /// Trust the narrow query window, publish everything
    Incremental,
}

impl SyncMode {
    /// Pick the mode from the query text
    pub fn detect(query: &str, window_minutes: u32) -> Self {
        if has_interval_placeholder(query) {
            SyncMode::Incremental
        } else {
            SyncMode::Backfill { window_minutes }
        }
    }

    /// Interval bound to the source query
    pub fn lookback_minutes(&self) -> u32 {
        match self {
            SyncMode::Backfill { window_minutes } => *window_minutes,
            SyncMode::Incremental => INCREMENTAL_LOOKBACK_MINUTES,
        }
    }

    /// Whether cycles build the existing-data index
    pub fn builds_index(&self) -> bool {
        matches!(self, SyncMode::Backfill { .. })
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Backfill { window_minutes } => write!(f, "backfill ({} min window)", window_minutes),
            SyncMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Statistics about sync cycles
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles started
    pub total_cycles: u64,
    /// Cycles aborted by an error
    pub failed_cycles: u64,
    /// Records accepted by the events store
    pub rows_published: u64,
    /// Publish batches that failed
    pub failed_batches: u64,
    /// End of the last cycle
    pub last_cycle: Option<DateTime<Utc>>,
    /// Last cycle error
    pub last_error: Option<String>,
}

/// Result of one completed cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub mode: SyncMode,
    /// Leaves in the existing-data index, backfill only
    pub index_entries: Option<usize>,
    pub rows_read: usize,
    pub rows_skipped: usize,
    pub publish: PublishReport,
    pub duration: Duration,
}

/// Start of the existing-data window, truncated to the minute
pub fn window_start(now: DateTime<Utc>, window_minutes: u32) -> DateTime<Utc> {
    let start = now - ChronoDuration::minutes(i64::from(window_minutes));
    start
        .duration_trunc(ChronoDuration::minutes(1))
        .unwrap_or(start)
}

/// Grouped latest-timestamp query over what is already published
pub fn existing_data_query(schema: &str, filters: &FilterSpec, since: DateTime<Utc>) -> String {
    let mut columns = filters.names();
    columns.push("max(eventTimestamp)");

    format!(
        "SELECT {} FROM {} WHERE eventTimestamp >= \"{}\"",
        columns.join(", "),
        schema,
        since.format(EVENT_TIMESTAMP_FORMAT)
    )
}

/// Drives source reads, deduplication and publishing
pub struct SyncOrchestrator<D, E> {
    mode: SyncMode,
    filters: FilterSpec,
    schema: String,
    reader: SourceReader<D>,
    store: E,
    publisher: Publisher,
    stats: RwLock<SyncStats>,
}

impl<D: SourceDatabase, E: EventStore> SyncOrchestrator<D, E> {
    /// Build from validated configuration. The mode is fixed here.
    pub fn new(config: &SyncConfig, database: D, store: E) -> Self {
        let mode = SyncMode::detect(
            &config.database.query,
            config.app.timerange_historial_data_in_min,
        );

        Self {
            mode,
            filters: config.app.filters.clone(),
            schema: config.events_api.schema.clone(),
            reader: SourceReader::new(database, &config.database.query, &config.app.filters),
            store,
            publisher: Publisher::new(config.app.batch_size),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Replace the publisher (dry runs, custom batch sizes)
    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// The events store cycles publish to
    pub fn store(&self) -> &E {
        &self.store
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Scheduler entry point: run a cycle and log its outcome
    pub fn tick(&self) {
        match self.run_cycle() {
            Ok(report) => info!(
                "Sync cycle done in {:?}: {} published, {} failed batches",
                report.duration, report.publish.records_published, report.publish.failed_batches
            ),
            Err(e) if e.is_source_error() => error!("Sync cycle aborted, source read failed: {}", e),
            Err(e) => error!("Sync cycle aborted: {}", e),
        }

        let stats = self.stats.read();
        debug!(
            "Totals: {} cycles ({} failed), {} rows published, {} failed batches",
            stats.total_cycles, stats.failed_cycles, stats.rows_published, stats.failed_batches
        );
    }

    /// Run one cycle now
    pub fn run_cycle(&self) -> Result<CycleReport> {
        self.run_cycle_at(Utc::now())
    }

    /// Run one cycle as if the clock read `now`
    pub fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let result = self.cycle(now);

        let mut stats = self.stats.write();
        stats.total_cycles += 1;
        stats.last_cycle = Some(Utc::now());
        match &result {
            Ok(report) => {
                stats.rows_published += report.publish.records_published as u64;
                stats.failed_batches += report.publish.failed_batches as u64;
            }
            Err(e) => {
                stats.failed_cycles += 1;
                stats.last_error = Some(e.to_string());
            }
        }

        result
    }

    fn cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let start = Instant::now();
        info!("Starting {} sync cycle", self.mode);

        let index = if self.mode.builds_index() {
            Some(self.fetch_existing_index(now, self.mode.lookback_minutes())?)
        } else {
            None
        };

        let batch = self.reader.read(self.mode.lookback_minutes(), index.as_ref())?;
        let publish = self.publisher.publish(&self.store, &batch.records);

        Ok(CycleReport {
            mode: self.mode,
            index_entries: index.as_ref().map(ExistingDataIndex::len),
            rows_read: batch.rows_read,
            rows_skipped: batch.rows_skipped,
            publish,
            duration: start.elapsed(),
        })
    }

    /// Query the events store and index what it already holds
    fn fetch_existing_index(&self, now: DateTime<Utc>, window_minutes: u32) -> Result<ExistingDataIndex> {
        if self.filters.is_empty() {
            info!("No filters configured, every source row counts as new");
            return Ok(ExistingDataIndex::build(&[], &self.filters));
        }

        info!("Querying events API for last data");
        let query = existing_data_query(&self.schema, &self.filters, window_start(now, window_minutes));
        info!("query: {}", query);

        let result_sets = self
            .store
            .query(&query)
            .map_err(|e| SyncError::RemoteIndexFetch(e.to_string()))?;
        let first = result_sets.into_iter().next().ok_or_else(|| {
            SyncError::RemoteIndexFetch("response contained no result sets".to_string())
        })?;

        let index = ExistingDataIndex::build(&first.results, &self.filters);
        debug!(
            "existing_data: {} of {} rows indexed",
            index.len(),
            first.results.len()
        );
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterDimension;
    use chrono::TimeZone;

    #[test]
    fn test_mode_detection() {
        assert_eq!(
            SyncMode::detect("SELECT * FROM t WHERE ts > :interval", 1440),
            SyncMode::Incremental
        );
        assert_eq!(
            SyncMode::detect("SELECT * FROM t WHERE ts > '2024-01-01'", 1440),
            SyncMode::Backfill { window_minutes: 1440 }
        );
        assert_eq!(SyncMode::Incremental.lookback_minutes(), 1);
        assert_eq!(SyncMode::Backfill { window_minutes: 90 }.lookback_minutes(), 90);
        assert!(!SyncMode::Incremental.builds_index());
    }

    #[test]
    fn test_window_start_truncates_to_minute() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 10, 30, 45).unwrap();
        assert_eq!(
            window_start(now, 1440),
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_existing_data_query() {
        let filters = FilterSpec::new(vec![
            FilterDimension::new("Region", ["eu"]),
            FilterDimension::new("Service", ["api"]),
        ]);
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap();

        assert_eq!(
            existing_data_query("db_metrics", &filters, since),
            r#"SELECT Region, Service, max(eventTimestamp) FROM db_metrics WHERE eventTimestamp >= "2024-05-01T10:30:00Z""#
        );
    }
}
