//! Event backlog
//!
//! Deduplicating FIFO of records that must be (re-)indexed outside normal
//! scan order: rollbacks after a failed indexing attempt and explicit
//! reindex requests.
//!
//! The backlog is either *adding* or *removing-only*. [`EventBacklog::flip_state`]
//! is called once per batch: a batch that starts with a non-empty backlog
//! only drains it, a batch that starts empty only accepts new records. This
//! keeps a record added mid-batch from being handed out before the current
//! scan of the persisted log has finished.
//!
//! A rollback that arrives while the backlog is draining is parked with
//! [`EventBacklog::defer`] and merged in at the next flip.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::LoaderResult;
use crate::types::{Action, EventLogRecord};

#[derive(Debug)]
struct BacklogState {
    adding: bool,
    /// Pending records in arrival order
    log: VecDeque<EventLogRecord>,
    /// entity id → entity type → actions already queued
    index: HashMap<i64, HashMap<String, HashSet<Action>>>,
    /// Rejected while draining, merged at the next flip
    deferred: Vec<EventLogRecord>,
}

impl BacklogState {
    fn insert(&mut self, record: &EventLogRecord) -> bool {
        let inserted = self
            .index
            .entry(record.entity_id)
            .or_default()
            .entry(record.entity_type.clone())
            .or_default()
            .insert(record.action);
        if inserted {
            self.log.push_back(record.clone());
        }
        inserted
    }
}

/// Thread-safe deduplicating backlog shared by a loader and its producers
#[derive(Debug)]
pub struct EventBacklog {
    state: Mutex<BacklogState>,
}

impl EventBacklog {
    /// Create an empty backlog in adding mode
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BacklogState {
                adding: true,
                log: VecDeque::new(),
                index: HashMap::new(),
                deferred: Vec::new(),
            }),
        }
    }

    /// Queue a record.
    ///
    /// Returns `Ok(false)` without side effects when the backlog is
    /// removing-only or the same (entity id, entity type, action) is already
    /// pending. Records without an entity type are rejected.
    pub fn add(&self, record: &EventLogRecord) -> LoaderResult<bool> {
        record.validate()?;

        let mut state = self.state.lock();
        if !state.adding {
            debug!(
                entity_type = %record.entity_type,
                entity_id = record.entity_id,
                "backlog is removing-only, record not added"
            );
            return Ok(false);
        }

        Ok(state.insert(record))
    }

    /// Park a record until the next [`flip_state`](Self::flip_state).
    ///
    /// Unlike [`add`](Self::add) this works in removing-only mode. Returns
    /// `Ok(false)` if the same identity is already parked.
    pub fn defer(&self, record: &EventLogRecord) -> LoaderResult<bool> {
        record.validate()?;

        let mut state = self.state.lock();
        let parked = state.deferred.iter().any(|r| {
            r.entity_id == record.entity_id
                && r.action == record.action
                && r.entity_type == record.entity_type
        });
        if parked {
            return Ok(false);
        }
        state.deferred.push(record.clone());
        Ok(true)
    }

    /// Pop the oldest record.
    ///
    /// `None` means the backlog is drained; the next [`flip_state`](Self::flip_state)
    /// will switch back to adding mode.
    pub fn remove(&self) -> Option<EventLogRecord> {
        let mut state = self.state.lock();

        let Some(record) = state.log.pop_front() else {
            state.index.clear();
            return None;
        };

        if let Some(types) = state.index.get_mut(&record.entity_id) {
            if let Some(actions) = types.get_mut(&record.entity_type) {
                actions.remove(&record.action);
                if actions.is_empty() {
                    types.remove(&record.entity_type);
                }
            }
            if types.is_empty() {
                state.index.remove(&record.entity_id);
            }
        }

        Some(record)
    }

    /// Merge parked records, then adding mode if empty, removing-only otherwise
    pub fn flip_state(&self) {
        let mut state = self.state.lock();
        let deferred = std::mem::take(&mut state.deferred);
        for record in &deferred {
            state.insert(record);
        }
        state.adding = state.log.is_empty();
    }

    /// True while the backlog only hands records out
    pub fn removing_only(&self) -> bool {
        !self.state.lock().adding
    }

    /// Whether a record with this identity is pending
    pub fn contains(&self, entity_type: &str, entity_id: i64, action: Action) -> bool {
        let state = self.state.lock();
        state
            .index
            .get(&entity_id)
            .and_then(|types| types.get(entity_type))
            .map(|actions| actions.contains(&action))
            .unwrap_or(false)
    }

    /// Records parked by [`defer`](Self::defer)
    pub fn deferred_len(&self) -> usize {
        self.state.lock().deferred.len()
    }

    /// Number of pending records
    pub fn len(&self) -> usize {
        self.state.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().log.is_empty()
    }
}

impl Default for EventBacklog {
    fn default() -> Self {
        Self::new()
    }
}
