//! Typed notification channels
//!
//! Two kinds of signal reach a loader from outside its own loop:
//!
//! - [`ReindexRequest`]: "these objects changed out of band, index them"
//! - [`ProcessingFailed`]: "indexing this record, handed out by loader X, failed"
//!
//! Each travels on its own channel. A failure report names the loader that
//! handed the record out by [`LoaderId`], so only that loader reacts.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::types::{EntityRef, EntityType, EventLogRecord};

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a loader instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderId(u64);

impl LoaderId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for LoaderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "loader-{}", self.0)
    }
}

/// Request to index specific objects ahead of the log scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexRequest {
    pub targets: Vec<EntityRef>,
}

impl ReindexRequest {
    /// Build from domain objects, using each object's canonical type
    pub fn new(objects: &[&dyn EntityType]) -> Self {
        Self {
            targets: objects.iter().map(|o| EntityRef::of(*o)).collect(),
        }
    }

    pub fn single(entity_type: impl Into<String>, entity_id: i64) -> Self {
        Self {
            targets: vec![EntityRef::new(entity_type, entity_id)],
        }
    }
}

impl From<Vec<EntityRef>> for ReindexRequest {
    fn from(targets: Vec<EntityRef>) -> Self {
        Self { targets }
    }
}

/// Report that processing a handed-out record failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingFailed {
    /// Loader that handed the record out
    pub loader: LoaderId,
    pub record: EventLogRecord,
}

/// Create a connected sender/receiver pair
pub fn channels() -> (Notifier, Notifications) {
    let (reindex_tx, reindex_rx) = mpsc::unbounded_channel();
    let (failed_tx, failed_rx) = mpsc::unbounded_channel();
    (
        Notifier {
            reindex: reindex_tx,
            failed: failed_tx,
        },
        Notifications {
            reindex: reindex_rx,
            failed: failed_rx,
        },
    )
}

/// Sending half, cloneable across producer threads and tasks
#[derive(Debug, Clone)]
pub struct Notifier {
    reindex: mpsc::UnboundedSender<ReindexRequest>,
    failed: mpsc::UnboundedSender<ProcessingFailed>,
}

impl Notifier {
    /// Ask for objects to be reindexed. Returns false if the receiver is gone.
    pub fn request_reindex(&self, request: ReindexRequest) -> bool {
        self.reindex.send(request).is_ok()
    }

    /// Report a failed record. Returns false if the receiver is gone.
    pub fn report_failure(&self, loader: LoaderId, record: EventLogRecord) -> bool {
        self.failed.send(ProcessingFailed { loader, record }).is_ok()
    }
}

/// Receiving half, owned by the loop that drives a loader
#[derive(Debug)]
pub struct Notifications {
    reindex: mpsc::UnboundedReceiver<ReindexRequest>,
    failed: mpsc::UnboundedReceiver<ProcessingFailed>,
}

impl Notifications {
    /// Take every reindex request queued so far without waiting
    pub fn drain_reindex(&mut self) -> Vec<ReindexRequest> {
        let mut out = Vec::new();
        while let Ok(request) = self.reindex.try_recv() {
            out.push(request);
        }
        out
    }

    /// Take every failure report queued so far without waiting
    pub fn drain_failures(&mut self) -> Vec<ProcessingFailed> {
        let mut out = Vec::new();
        while let Ok(report) = self.failed.try_recv() {
            out.push(report);
        }
        out
    }
}
