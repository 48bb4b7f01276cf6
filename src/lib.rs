//! db-custom-metrics library
//!
//! Periodically copies rows from a SQL source into an events analytics
//! store without republishing what the store already has.

pub mod config;
pub mod error;
pub mod events_api;
pub mod filters;
pub mod index;
pub mod publisher;
pub mod scheduler;
pub mod source;
pub mod sync;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use events_api::{EventStore, EventsApiClient, QueryResultSet};
pub use filters::{FilterDimension, FilterSpec};
pub use index::ExistingDataIndex;
pub use publisher::{PublishReport, Publisher};
pub use source::{PublishRecord, SourceDatabase, SourceReader, SourceRow, SqliteSource};
pub use sync::{CycleReport, SyncMode, SyncOrchestrator, SyncStats};
