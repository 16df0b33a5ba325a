//! Event Log Indexer
//!
//! A change-data-capture feed that walks a persisted event log and hands
//! each change to an indexer, resuming from a stored watermark after a
//! restart.
//!
//! # Features
//!
//! - **Four loaders**: persistent watermark, whole-log scan, domain-table
//!   walk, and a windowed deduplicating queue
//! - **Backlog**: failed records and out-of-band reindex requests are
//!   retried ahead of the log without starving it
//! - **Typed notifications**: reindex requests and failure reports travel
//!   on their own channels, correlated by loader id
//! - **Pluggable storage**: in-memory and JSONL/JSON file backends
//!
//! # Modules
//!
//! - `types`: Event log records, actions, entity identity
//! - `backlog`: Deduplicating add/drain buffer shared by loaders
//! - `loader`: Batch state machine and the loader variants
//! - `storage`: Collaborator traits and backends
//! - `notify`: Reindex and failure channels
//! - `indexer`: Driver task and index sinks
//! - `config`: Settings from JSON and environment
//! - `telemetry`: Tracing setup
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use eventlog_indexer::{EventBacklog, PersistentEventLogLoader, PersistentLogQuery};
//! use eventlog_indexer::storage::{FileConfigStore, FileEventLog};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let log = Arc::new(FileEventLog::new("data/events.jsonl"));
//!     let store = Arc::new(FileConfigStore::new("data/config.json"));
//!     let query = PersistentLogQuery::new(log, store);
//!     let mut loader = PersistentEventLogLoader::new(query, Arc::new(EventBacklog::new()));
//!
//!     while loader.has_next()? {
//!         let record = loader.next()?;
//!         println!("{record}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod backlog;
pub mod config;
pub mod error;
pub mod indexer;
pub mod loader;
pub mod notify;
pub mod storage;
pub mod telemetry;
pub mod types;

// Re-export commonly used items at crate root
pub use backlog::EventBacklog;
pub use config::{IndexerConfig, LoaderMode, QueueConfig};
pub use error::{LoaderError, LoaderResult};
pub use indexer::{build_feed, Feed, IndexSink, IndexerDriver, TextIndex};
pub use loader::{
    AllEntitiesPseudoLogLoader, AllEventsLogLoader, EventLogLoader, EventLogQueue, LogQuery,
    PersistentEventLogLoader, PersistentLogQuery,
};
pub use notify::{channels, LoaderId, Notifications, Notifier, ProcessingFailed, ReindexRequest};
pub use types::{Action, EntityRef, EntityType, EventLogRecord, LogRow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
