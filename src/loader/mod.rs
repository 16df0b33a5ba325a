//! Event log loaders
//!
//! A loader is the pull-based driver the indexing loop calls repeatedly:
//!
//! ```text
//! while loader.has_next()? {
//!     let record = loader.next()?;
//!     index(record);
//! }
//! ```
//!
//! `has_next()` returning false does not mean the log is exhausted, only that
//! the current batch is over. The caller re-polls on its own schedule.
//!
//! # Pieces
//!
//! - `EventLogLoader<Q>`: batch/backlog state machine shared by all loaders
//! - `LogQuery`: where fresh records come from
//!   - `PersistentLogQuery`: next record after a persisted watermark
//!   - `AllEventsQuery`: whole log, bounded by a per-scan ceiling
//!   - `AllEntitiesPseudoQuery`: walks domain tables when no log exists
//! - `EventLogQueue`: windowed, deduplicating loader with priority,
//!   regular and failure queues

mod all_entities;
mod all_events;
mod persistent;
mod queue;

pub use all_entities::AllEntitiesPseudoQuery;
pub use all_events::AllEventsQuery;
pub use persistent::{InitialPosition, InitializeHook, PersistentLogQuery, DEFAULT_LOADER_KEY};
pub use queue::{
    available_memory_bytes, scale_window, Entry, EntryState, EventLogQueue, QueueKind, QueueStats,
    DEFAULT_QUEUE_KEY, DEFAULT_WINDOW, ENTRY_BYTES, MAX_MEMORY_FRACTION,
};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::backlog::EventBacklog;
use crate::error::{LoaderError, LoaderResult};
use crate::notify::{LoaderId, ProcessingFailed, ReindexRequest};
use crate::types::EventLogRecord;

/// Records handed out per batch unless configured otherwise
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Loader over the persisted log with a durable watermark
pub type PersistentEventLogLoader = EventLogLoader<PersistentLogQuery>;

/// Loader over the whole log, from a start position up to a per-scan ceiling
pub type AllEventsLogLoader = EventLogLoader<AllEventsQuery>;

/// Loader that synthesizes UPDATE records from domain tables
pub type AllEntitiesPseudoLogLoader = EventLogLoader<AllEntitiesPseudoQuery>;

/// Source of fresh records for an [`EventLogLoader`]
pub trait LogQuery: Send {
    /// Next fresh record, or `None` when nothing is available right now
    fn query(&mut self) -> LoaderResult<Option<EventLogRecord>>;

    /// Estimate of remaining work: 0 for none, 1 for unknown but nonzero,
    /// otherwise a count
    fn more(&mut self) -> LoaderResult<i64>;
}

/// Shared pause flag; cloning yields a handle to the same flag
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, stop: bool) {
        self.0.store(stop, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Batch/backlog state machine around a [`LogQuery`]
pub struct EventLogLoader<Q> {
    id: LoaderId,
    query: Q,
    backlog: Arc<EventBacklog>,
    batch_size: usize,
    /// `has_next()` polls in the current batch
    count: usize,
    /// Loaded by `has_next()`, not yet taken by `next()`
    buffered: Option<EventLogRecord>,
    stop: StopHandle,
    excludes: HashSet<String>,
}

impl<Q: LogQuery> EventLogLoader<Q> {
    /// Create a loader over `query` sharing `backlog`
    pub fn new(query: Q, backlog: Arc<EventBacklog>) -> Self {
        Self {
            id: LoaderId::next(),
            query,
            backlog,
            batch_size: DEFAULT_BATCH_SIZE,
            count: 0,
            buffered: None,
            stop: StopHandle::new(),
            excludes: HashSet::new(),
        }
    }

    /// Set the batch size (minimum 1)
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Entity types never put into the backlog
    pub fn with_excludes<I, S>(mut self, excludes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes = excludes.into_iter().map(Into::into).collect();
        self
    }

    pub fn id(&self) -> LoaderId {
        self.id
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn backlog(&self) -> &Arc<EventBacklog> {
        &self.backlog
    }

    pub fn query(&self) -> &Q {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut Q {
        &mut self.query
    }

    /// Load the next record of this batch if there is one.
    ///
    /// Every poll counts toward the batch; the `batch_size`-th poll ends the
    /// batch and resets the counter. The first poll of a batch flips the
    /// backlog: a non-empty backlog is drained for the whole batch, an
    /// empty one lets the query run.
    pub fn has_next(&mut self) -> LoaderResult<bool> {
        if self.is_stop_set() {
            return Ok(false);
        }

        if self.count == 0 {
            self.backlog.flip_state();
        }

        self.count += 1;
        if self.count >= self.batch_size {
            self.count = 0;
            return Ok(false);
        }

        if self.buffered.is_some() {
            return Ok(true);
        }

        let candidate = if self.backlog.removing_only() {
            self.backlog.remove()
        } else {
            self.query.query()?
        };

        match candidate {
            Some(record) => {
                self.buffered = Some(record);
                Ok(true)
            }
            None => {
                self.count = 0;
                Ok(false)
            }
        }
    }

    /// Take the record loaded by the last successful `has_next()`
    pub fn next(&mut self) -> LoaderResult<EventLogRecord> {
        self.buffered.take().ok_or(LoaderError::NoSuchElement)
    }

    /// Iterate the rest of the current batch
    pub fn batch(&mut self) -> Batch<'_, Q> {
        Batch {
            loader: self,
            done: false,
        }
    }

    /// Requeue a record whose processing failed.
    ///
    /// While the backlog is draining the record is parked and served from
    /// the next batch on. Returns whether the record will be retried.
    pub fn rollback(&mut self, record: &EventLogRecord) -> LoaderResult<bool> {
        if self.excludes.contains(&record.entity_type) {
            debug!(record = %record, "excluded type, not rolled back");
            return Ok(false);
        }

        if self.backlog.add(record)? {
            return Ok(true);
        }
        if !self.backlog.removing_only() {
            // Already pending
            return Ok(false);
        }
        let deferred = self.backlog.defer(record)?;
        if deferred {
            debug!(record = %record, "backlog is draining, rollback deferred");
        }
        Ok(deferred)
    }

    /// Pause (`true`) or resume (`false`) iteration without losing state
    pub fn stop(&self, stop: bool) {
        self.stop.set(stop);
    }

    pub fn is_stop_set(&self) -> bool {
        self.stop.is_set()
    }

    /// Handle to pause this loader from another thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Estimate of remaining work
    pub fn more(&mut self) -> LoaderResult<i64> {
        self.query.more()
    }

    /// Queue a synthetic REINDEX record for an entity changed out of band
    pub fn add_event_log(&self, entity_type: &str, entity_id: i64) -> LoaderResult<bool> {
        if self.excludes.contains(entity_type) {
            debug!(entity_type, entity_id, "excluded type, reindex ignored");
            return Ok(false);
        }
        self.backlog.add(&EventLogRecord::reindex(entity_type, entity_id))
    }

    /// Queue every object named in a reindex request. Returns how many were added.
    pub fn on_reindex(&self, request: &ReindexRequest) -> LoaderResult<usize> {
        let mut added = 0;
        for target in &request.targets {
            if self.add_event_log(&target.entity_type, target.entity_id)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Roll back a failed record if this loader handed it out
    pub fn on_failure(&mut self, report: &ProcessingFailed) -> LoaderResult<bool> {
        if report.loader != self.id {
            return Ok(false);
        }
        self.rollback(&report.record)
    }
}

/// Iterator over one batch of an [`EventLogLoader`]
pub struct Batch<'a, Q> {
    loader: &'a mut EventLogLoader<Q>,
    done: bool,
}

impl<Q: LogQuery> Iterator for Batch<'_, Q> {
    type Item = LoaderResult<EventLogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.loader.has_next() {
            Ok(true) => Some(self.loader.next()),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
