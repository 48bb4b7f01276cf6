//! Batched publishing to the events store
//!
//! Records go out in fixed-size chunks, in order. Each chunk is one
//! independent attempt: a failure is logged and the next chunk is still
//! sent. Nothing is retried or rolled back.

use tracing::{info, warn};

use crate::events_api::EventStore;
use crate::source::PublishRecord;

/// Maximum records per publish call accepted by the events API
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Summary of one publish run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Batches attempted
    pub batches: usize,
    /// Batches that failed
    pub failed_batches: usize,
    /// Records in batches that were accepted
    pub records_published: usize,
}

/// Splits records into batches and sends them
#[derive(Debug, Clone)]
pub struct Publisher {
    batch_size: usize,
    dry_run: bool,
}

impl Publisher {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            dry_run: false,
        }
    }

    /// Log batches instead of sending them
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Ordered batches for `records`
    pub fn batches<'a>(&self, records: &'a [PublishRecord]) -> std::slice::Chunks<'a, PublishRecord> {
        records.chunks(self.batch_size)
    }

    /// Send every batch to `store`
    pub fn publish<E: EventStore + ?Sized>(&self, store: &E, records: &[PublishRecord]) -> PublishReport {
        let mut report = PublishReport::default();

        for (number, batch) in self.batches(records).enumerate() {
            report.batches += 1;

            if self.dry_run {
                info!("Dry run: would publish {} rows (batch {})", batch.len(), number + 1);
                report.records_published += batch.len();
                continue;
            }

            info!("Publishing {} rows to events API", batch.len());
            match store.publish(batch) {
                Ok(status) => {
                    info!("Published {} rows to events API. StatusCode: {}", batch.len(), status);
                    report.records_published += batch.len();
                }
                Err(e) => {
                    warn!("Publishing batch {} of {} rows failed: {}", number + 1, batch.len(), e);
                    report.failed_batches += 1;
                }
            }
        }

        report
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SyncError};
    use crate::events_api::QueryResultSet;
    use parking_lot::Mutex;
    use serde_json::{json, Map};

    /// Records every batch; fails the batch numbers listed in `fail_on`
    #[derive(Default)]
    struct RecordingStore {
        batches: Mutex<Vec<Vec<PublishRecord>>>,
        fail_on: Vec<usize>,
    }

    impl EventStore for RecordingStore {
        fn query(&self, _query: &str) -> Result<Vec<QueryResultSet>> {
            Ok(Vec::new())
        }

        fn publish(&self, records: &[PublishRecord]) -> Result<u16> {
            let mut batches = self.batches.lock();
            batches.push(records.to_vec());
            if self.fail_on.contains(&batches.len()) {
                return Err(SyncError::ApiRequest { status: 503, message: "unavailable".into() });
            }
            Ok(200)
        }
    }

    fn records(n: usize) -> Vec<PublishRecord> {
        (0..n)
            .map(|i| {
                let mut fields = Map::new();
                fields.insert("Seq".to_string(), json!(i));
                PublishRecord {
                    event_timestamp: "2024-01-01T00:00:00Z".to_string(),
                    fields,
                }
            })
            .collect()
    }

    #[test]
    fn test_partitions_in_order() {
        let store = RecordingStore::default();
        let report = Publisher::default().publish(&store, &records(12001));

        let batches = store.batches.lock();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![5000, 5000, 2001]);
        assert_eq!(batches[1][0].fields["Seq"], json!(5000));
        assert_eq!(batches[2][2000].fields["Seq"], json!(12000));
        assert_eq!(report, PublishReport { batches: 3, failed_batches: 0, records_published: 12001 });
    }

    #[test]
    fn test_failed_batch_does_not_stop_others() {
        let store = RecordingStore {
            fail_on: vec![1],
            ..Default::default()
        };
        let report = Publisher::new(2).publish(&store, &records(5));

        assert_eq!(store.batches.lock().len(), 3);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.records_published, 3);
    }

    #[test]
    fn test_empty_input_sends_nothing() {
        let store = RecordingStore::default();
        let report = Publisher::default().publish(&store, &[]);

        assert!(store.batches.lock().is_empty());
        assert_eq!(report, PublishReport::default());
    }

    #[test]
    fn test_dry_run_sends_nothing() {
        let store = RecordingStore::default();
        let report = Publisher::new(10).dry_run(true).publish(&store, &records(25));

        assert!(store.batches.lock().is_empty());
        assert_eq!(report.batches, 3);
    }
}
