//! Windowed, deduplicating event log queue
//!
//! Instead of one storage round-trip per record, `EventLogQueue` pulls a
//! whole window of log rows in one partition fetch and folds them per entity:
//! however many times an entity changed inside the window, the indexer sees
//! it once, with the latest log id and action.
//!
//! Every pending entity has exactly one [`Entry`], living in one of three
//! queues:
//!
//! ```text
//!   add_event_log ──► priority ─┐
//!                               ├──► next() ──► PASS (forgotten, watermark advances)
//!   window rows ────► regular ──┘        │
//!                                        └──► on_failure ──► failure ──► retry_failures()
//! ```
//!
//! Priority is always drained before regular. Failed entries wait in the
//! failure queue until retried explicitly, re-requested, or seen again in a
//! later window.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::LoaderResult;
use crate::notify::{LoaderId, ProcessingFailed, ReindexRequest};
use crate::storage::{ConfigStore, PartitionSource};
use crate::types::{Action, EventLogRecord, LogRow, UNSET_LOG_ID};

use super::{StopHandle, DEFAULT_BATCH_SIZE};

/// Default cap on rows fetched per window
pub const DEFAULT_WINDOW: usize = 1_000_000;

/// Approximate memory held per buffered entry
pub const ENTRY_BYTES: u64 = 100;

/// Share of available memory a window may use
pub const MAX_MEMORY_FRACTION: f64 = 0.25;

/// Default key for the persisted watermark
pub const DEFAULT_QUEUE_KEY: &str = "EventLogQueue.v1.current_id";

/// Lifecycle of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Open,
    Pass,
    Fail,
}

/// Which queue an entry waits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Priority,
    Regular,
    Failure,
}

/// Latest known pending activity for one entity
#[derive(Debug, Clone)]
pub struct Entry {
    /// Log id of the latest row folded in; `None` for reindex requests
    pub log_id: Option<i64>,
    pub action: Action,
    /// Rows and requests folded into this entry
    pub skipped: u64,
    pub state: EntryState,
    /// `None` while handed out to the consumer
    pub queue: Option<QueueKind>,
    /// Reindex requested while handed out
    requeue: bool,
    /// Matches the one live slot for this entry
    ticket: u64,
}

impl Entry {
    fn open(log_id: Option<i64>, action: Action, skipped: u64) -> Self {
        Self {
            log_id,
            action,
            skipped,
            state: EntryState::Open,
            queue: None,
            requeue: false,
            ticket: 0,
        }
    }
}

/// Counters for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub open: usize,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub priority_len: usize,
    pub regular_len: usize,
    pub failure_len: usize,
    pub windows_loaded: u64,
}

/// Queue slot. Moving an entry leaves its old slot behind; slots whose
/// ticket no longer matches are dropped when reached.
#[derive(Debug, Clone)]
struct Slot {
    entity_type: String,
    entity_id: i64,
    ticket: u64,
}

type EntryIndex = HashMap<String, HashMap<i64, Entry>>;

/// Cap `window` so its entries fit in a fraction of available memory
pub fn scale_window(
    window: usize,
    available_bytes: Option<u64>,
    fraction: f64,
    entry_bytes: u64,
) -> usize {
    let Some(available) = available_bytes else {
        return window;
    };

    let budget = (available as f64 * fraction.clamp(0.0, 1.0)) as u64;
    let cap = (budget / entry_bytes.max(1)).max(1);
    let cap = usize::try_from(cap).unwrap_or(usize::MAX);

    if window > cap {
        warn!(
            requested = window,
            scaled = cap,
            available_bytes = available,
            "event log window scaled down to fit memory"
        );
        cap
    } else {
        window
    }
}

/// Available memory as reported by `/proc/meminfo`, where present
pub fn available_memory_bytes() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("MemAvailable:")?;
        let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
        Some(kb * 1024)
    })
}

pub struct EventLogQueue {
    id: LoaderId,
    source: Arc<dyn PartitionSource>,
    store: Arc<dyn ConfigStore>,
    key: String,
    types: Vec<String>,
    actions: Vec<Action>,
    window: usize,
    batch_size: usize,
    count: usize,
    entries: EntryIndex,
    priority: VecDeque<Slot>,
    regular: VecDeque<Slot>,
    failure: VecDeque<Slot>,
    next_ticket: u64,
    /// Entry handed out by the last `next()`
    current: Option<(String, i64)>,
    /// Highest log id fetched so far
    loaded_up_to: Option<i64>,
    /// Cached persisted watermark
    watermark: Option<i64>,
    stop: StopHandle,
    excludes: HashSet<String>,
    passed: u64,
    failed: u64,
    skipped: u64,
    windows_loaded: u64,
}

impl EventLogQueue {
    /// Queue over `types`/`actions` with the default, memory-scaled window
    pub fn new<T, S>(
        source: Arc<dyn PartitionSource>,
        store: Arc<dyn ConfigStore>,
        types: T,
        actions: &[Action],
    ) -> Self
    where
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let window = scale_window(
            DEFAULT_WINDOW,
            available_memory_bytes(),
            MAX_MEMORY_FRACTION,
            ENTRY_BYTES,
        );

        Self {
            id: LoaderId::next(),
            source,
            store,
            key: DEFAULT_QUEUE_KEY.to_string(),
            types: types.into_iter().map(Into::into).collect(),
            actions: actions.to_vec(),
            window,
            batch_size: DEFAULT_BATCH_SIZE,
            count: 0,
            entries: HashMap::new(),
            priority: VecDeque::new(),
            regular: VecDeque::new(),
            failure: VecDeque::new(),
            next_ticket: 0,
            current: None,
            loaded_up_to: None,
            watermark: None,
            stop: StopHandle::new(),
            excludes: HashSet::new(),
            passed: 0,
            failed: 0,
            skipped: 0,
            windows_loaded: 0,
        }
    }

    /// Rows per window, used as given (minimum 1)
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self.watermark = None;
        self
    }

    /// Entity types dropped from windows and reindex requests
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

    /// Effective rows-per-window cap
    pub fn window(&self) -> usize {
        self.window
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Pending entry for an entity, if any
    pub fn entry(&self, entity_type: &str, entity_id: i64) -> Option<&Entry> {
        self.entries.get(entity_type)?.get(&entity_id)
    }

    /// True while there is an open entry to hand out, loading a new window
    /// if the queues are empty. Each batch yields at most `batch_size` entries.
    pub fn has_next(&mut self) -> LoaderResult<bool> {
        if self.is_stop_set() {
            return Ok(false);
        }

        if self.count >= self.batch_size {
            self.count = 0;
            return Ok(false);
        }

        if !self.has_pending() {
            self.load_window()?;
            if !self.has_pending() {
                self.count = 0;
                return Ok(false);
            }
        }

        self.count += 1;
        Ok(true)
    }

    /// Settle the previous entry and hand out the next one.
    ///
    /// `Ok(None)` when nothing is pending or the next entry is not open;
    /// callers must tolerate it.
    pub fn next(&mut self) -> LoaderResult<Option<EventLogRecord>> {
        self.offer()
    }

    /// Queue a reindex request for an entity ahead of the regular queue.
    ///
    /// An entity already pending in the priority or regular queue keeps its
    /// place; the request is only counted as skipped. Returns whether the
    /// entity was (re)queued.
    pub fn add_event_log(&mut self, entity_type: &str, entity_id: i64) -> bool {
        if self.excludes.contains(entity_type) {
            debug!(entity_type, entity_id, "excluded type, reindex ignored");
            return false;
        }

        let Some(entry) = self
            .entries
            .get_mut(entity_type)
            .and_then(|by_id| by_id.get_mut(&entity_id))
        else {
            self.entries
                .entry(entity_type.to_string())
                .or_default()
                .insert(entity_id, Entry::open(None, Action::Reindex, 0));
            self.enqueue(entity_type, entity_id, QueueKind::Priority);
            return true;
        };

        match entry.queue {
            Some(QueueKind::Priority) | Some(QueueKind::Regular) => {
                entry.skipped += 1;
                self.skipped += 1;
                false
            }
            Some(QueueKind::Failure) => {
                entry.state = EntryState::Open;
                self.enqueue(entity_type, entity_id, QueueKind::Priority);
                true
            }
            None => {
                entry.requeue = true;
                true
            }
        }
    }

    /// Queue every object named in a reindex request. Returns how many were queued.
    pub fn on_reindex(&mut self, request: &ReindexRequest) -> usize {
        request
            .targets
            .iter()
            .filter(|t| self.add_event_log(&t.entity_type, t.entity_id))
            .count()
    }

    /// Mark the entry most recently handed out as failed.
    ///
    /// Ignored unless the report comes from this queue and names that entry.
    /// The watermark does not advance for a failed entry.
    pub fn on_failure(&mut self, report: &ProcessingFailed) -> bool {
        if report.loader != self.id {
            return false;
        }

        let matches = self.current.as_ref().is_some_and(|(t, id)| {
            *t == report.record.entity_type && *id == report.record.entity_id
        });
        if !matches {
            debug!(record = %report.record, "failure report does not match current entry");
            return false;
        }

        let Some((entity_type, entity_id)) = self.current.take() else {
            return false;
        };
        if let Some(entry) = self.entry_mut(&entity_type, entity_id) {
            entry.state = EntryState::Fail;
            entry.requeue = false;
        }
        self.failed += 1;
        self.enqueue(&entity_type, entity_id, QueueKind::Failure);
        warn!(entity_type = %entity_type, entity_id, "entry moved to failure queue");
        true
    }

    /// Move every failed entry back to the regular queue. Returns the count.
    pub fn retry_failures(&mut self) -> usize {
        let mut retried = 0;
        while let Some((entity_type, entity_id)) = self.pop_live(QueueKind::Failure) {
            if let Some(entry) = self.entry_mut(&entity_type, entity_id) {
                entry.state = EntryState::Open;
            }
            self.enqueue(&entity_type, entity_id, QueueKind::Regular);
            retried += 1;
        }
        if retried > 0 {
            info!(retried, "failed entries requeued");
        }
        retried
    }

    /// Always 0: window loading, not the remaining-work estimate, paces this loader
    pub fn more(&self) -> i64 {
        0
    }

    pub fn stop(&self, stop: bool) {
        self.stop.set(stop);
    }

    pub fn is_stop_set(&self) -> bool {
        self.stop.is_set()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Persisted watermark; `-1` is stored on first use
    pub fn current_id(&mut self) -> LoaderResult<i64> {
        if let Some(id) = self.watermark {
            return Ok(id);
        }

        let id = match self.store.get(&self.key)? {
            Some(id) => id,
            None => {
                info!(key = %self.key, "no stored position, starting queue from the beginning");
                self.store.set(&self.key, UNSET_LOG_ID)?;
                UNSET_LOG_ID
            }
        };
        self.watermark = Some(id);
        Ok(id)
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            passed: self.passed,
            failed: self.failed,
            skipped: self.skipped,
            windows_loaded: self.windows_loaded,
            ..Default::default()
        };

        for entry in self.entries.values().flat_map(HashMap::values) {
            if entry.state == EntryState::Open {
                stats.open += 1;
            }
            match entry.queue {
                Some(QueueKind::Priority) => stats.priority_len += 1,
                Some(QueueKind::Regular) => stats.regular_len += 1,
                Some(QueueKind::Failure) => stats.failure_len += 1,
                None => {}
            }
        }

        stats
    }

    fn offer(&mut self) -> LoaderResult<Option<EventLogRecord>> {
        self.settle_current()?;

        let next = match self.pop_live(QueueKind::Priority) {
            Some(key) => key,
            None => match self.pop_live(QueueKind::Regular) {
                Some(key) => key,
                None => return Ok(None),
            },
        };

        let (entity_type, entity_id) = next;
        let Some(entry) = self.entry_mut(&entity_type, entity_id) else {
            return Ok(None);
        };
        entry.queue = None;
        let state = entry.state;
        let record = EventLogRecord {
            log_id: entry.log_id,
            entity_type: entity_type.clone(),
            entity_id,
            action: entry.action,
        };

        self.current = Some((entity_type, entity_id));
        if state != EntryState::Open {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Finish bookkeeping for the entry handed out last
    fn settle_current(&mut self) -> LoaderResult<()> {
        let Some((entity_type, entity_id)) = self.current.take() else {
            return Ok(());
        };
        let Some(entry) = self.entry_mut(&entity_type, entity_id) else {
            return Ok(());
        };
        if entry.queue.is_some() {
            return Ok(());
        }

        let state = entry.state;
        match state {
            EntryState::Open => {
                entry.state = EntryState::Pass;
                let log_id = entry.log_id;
                let requeue = entry.requeue;
                self.passed += 1;

                if requeue {
                    if let Some(entry) = self.entry_mut(&entity_type, entity_id) {
                        *entry = Entry::open(None, Action::Reindex, 0);
                    }
                    self.enqueue(&entity_type, entity_id, QueueKind::Priority);
                } else {
                    self.remove_entry(&entity_type, entity_id);
                }

                if let Some(log_id) = log_id {
                    self.advance_watermark(log_id)?;
                }
            }
            EntryState::Pass => self.remove_entry(&entity_type, entity_id),
            EntryState::Fail => self.enqueue(&entity_type, entity_id, QueueKind::Failure),
        }

        Ok(())
    }

    fn advance_watermark(&mut self, log_id: i64) -> LoaderResult<()> {
        if log_id > self.current_id()? {
            self.store.set(&self.key, log_id)?;
            self.watermark = Some(log_id);
        }
        Ok(())
    }

    /// Fetch the next window and fold it into the queues. Returns rows fetched.
    fn load_window(&mut self) -> LoaderResult<usize> {
        self.settle_current()?;

        let from = match self.loaded_up_to {
            Some(id) => id,
            None => self.current_id()?,
        };
        let rows = self
            .source
            .event_log_partitions(&self.types, &self.actions, from, self.window)?;
        self.windows_loaded += 1;

        let fetched = rows.len();
        for row in rows {
            self.loaded_up_to = Some(self.loaded_up_to.map_or(row.log_id, |up| up.max(row.log_id)));
            if self.excludes.contains(&row.entity_type) {
                continue;
            }
            self.merge_row(row);
        }

        if fetched > 0 {
            info!(
                from,
                rows = fetched,
                regular = self.regular.len(),
                "loaded event log window"
            );
        }
        Ok(fetched)
    }

    /// Fold one window row into the entity's entry, creating it if needed
    fn merge_row(&mut self, row: LogRow) {
        let LogRow {
            log_id,
            entity_type,
            entity_id,
            action,
            skipped_count,
        } = row;

        let existing = self
            .entries
            .get_mut(&entity_type)
            .and_then(|by_id| by_id.get_mut(&entity_id));

        let Some(entry) = existing else {
            self.skipped += skipped_count;
            self.entries
                .entry(entity_type.clone())
                .or_default()
                .insert(entity_id, Entry::open(Some(log_id), action, skipped_count));
            self.enqueue(&entity_type, entity_id, QueueKind::Regular);
            return;
        };

        entry.log_id = Some(log_id);
        entry.action = action;
        entry.skipped += 1 + skipped_count;
        self.skipped += 1 + skipped_count;

        match entry.queue {
            Some(QueueKind::Failure) => {
                entry.state = EntryState::Open;
                self.enqueue(&entity_type, entity_id, QueueKind::Regular);
            }
            None => entry.requeue = true,
            _ => {}
        }
    }

    fn entry_mut(&mut self, entity_type: &str, entity_id: i64) -> Option<&mut Entry> {
        self.entries.get_mut(entity_type)?.get_mut(&entity_id)
    }

    fn remove_entry(&mut self, entity_type: &str, entity_id: i64) {
        if let Some(by_id) = self.entries.get_mut(entity_type) {
            by_id.remove(&entity_id);
            if by_id.is_empty() {
                self.entries.remove(entity_type);
            }
        }
    }

    /// Put an existing entry at the back of `kind`
    fn enqueue(&mut self, entity_type: &str, entity_id: i64, kind: QueueKind) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;

        if let Some(entry) = self.entry_mut(entity_type, entity_id) {
            entry.queue = Some(kind);
            entry.ticket = ticket;
        }

        let slot = Slot {
            entity_type: entity_type.to_string(),
            entity_id,
            ticket,
        };
        match kind {
            QueueKind::Priority => self.priority.push_back(slot),
            QueueKind::Regular => self.regular.push_back(slot),
            QueueKind::Failure => self.failure.push_back(slot),
        }
    }

    fn is_live(entries: &EntryIndex, slot: &Slot, kind: QueueKind) -> bool {
        entries
            .get(&slot.entity_type)
            .and_then(|by_id| by_id.get(&slot.entity_id))
            .is_some_and(|e| e.queue == Some(kind) && e.ticket == slot.ticket)
    }

    /// Drop stale slots at the front of `kind`; true if a live one remains
    fn prune(&mut self, kind: QueueKind) -> bool {
        let queue = match kind {
            QueueKind::Priority => &mut self.priority,
            QueueKind::Regular => &mut self.regular,
            QueueKind::Failure => &mut self.failure,
        };
        while let Some(slot) = queue.front() {
            if Self::is_live(&self.entries, slot, kind) {
                return true;
            }
            queue.pop_front();
        }
        false
    }

    fn pop_live(&mut self, kind: QueueKind) -> Option<(String, i64)> {
        if !self.prune(kind) {
            return None;
        }
        let queue = match kind {
            QueueKind::Priority => &mut self.priority,
            QueueKind::Regular => &mut self.regular,
            QueueKind::Failure => &mut self.failure,
        };
        queue.pop_front().map(|slot| (slot.entity_type, slot.entity_id))
    }

    fn has_pending(&mut self) -> bool {
        self.prune(QueueKind::Priority) || self.prune(QueueKind::Regular)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryConfigStore, MemoryEventLog};

    fn queue(log: &Arc<MemoryEventLog>, store: &Arc<MemoryConfigStore>) -> EventLogQueue {
        EventLogQueue::new(
            log.clone(),
            store.clone(),
            ["Image", "Dataset"],
            &[Action::Insert, Action::Update, Action::Delete],
        )
        .with_window(1000)
    }

    #[test]
    fn test_scale_window() {
        assert_eq!(scale_window(1_000_000, None, 0.25, 100), 1_000_000);
        // 40 MB available → 10 MB budget → 100_000 entries
        assert_eq!(scale_window(1_000_000, Some(40_000_000), 0.25, 100), 100_000);
        assert_eq!(scale_window(500, Some(40_000_000), 0.25, 100), 500);
        assert_eq!(scale_window(500, Some(0), 0.25, 100), 1);
    }

    #[test]
    fn test_coalesces_rows_per_entity() {
        let log = Arc::new(MemoryEventLog::new());
        log.append("Image", 42, Action::Insert);
        log.append("Dataset", 7, Action::Insert);
        log.append("Image", 42, Action::Update);
        log.append("Image", 42, Action::Delete);

        let mut q = queue(&log, &Arc::new(MemoryConfigStore::new()));
        assert!(q.has_next().unwrap());

        let entry = q.entry("Image", 42).unwrap();
        assert_eq!(entry.skipped, 2);
        assert_eq!(entry.log_id, Some(4));
        assert_eq!(entry.action, Action::Delete);
        assert_eq!(q.stats().regular_len, 2);

        let first = q.next().unwrap().unwrap();
        assert_eq!((first.entity_type.as_str(), first.entity_id), ("Image", 42));
        assert!(q.has_next().unwrap());
        assert_eq!(q.next().unwrap().unwrap().entity_id, 7);
        assert!(!q.has_next().unwrap());
    }

    #[test]
    fn test_priority_first() {
        let log = Arc::new(MemoryEventLog::new());
        log.append("Image", 1, Action::Insert);
        log.append("Image", 2, Action::Insert);

        let mut q = queue(&log, &Arc::new(MemoryConfigStore::new()));
        assert!(q.has_next().unwrap());
        assert!(q.add_event_log("Dataset", 99));

        let first = q.next().unwrap().unwrap();
        assert_eq!(first, EventLogRecord::reindex("Dataset", 99));
        assert!(q.has_next().unwrap());
        assert_eq!(q.next().unwrap().unwrap().entity_id, 1);
    }

    #[test]
    fn test_reindex_of_regular_entry_counts_skip() {
        let log = Arc::new(MemoryEventLog::new());
        log.append("Image", 1, Action::Insert);

        let mut q = queue(&log, &Arc::new(MemoryConfigStore::new()));
        assert!(q.has_next().unwrap());
        assert!(!q.add_event_log("Image", 1));

        let stats = q.stats();
        assert_eq!(stats.priority_len, 0);
        assert_eq!(stats.regular_len, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(q.entry("Image", 1).unwrap().skipped, 1);
    }

    #[test]
    fn test_watermark_advances_on_settle() {
        let log = Arc::new(MemoryEventLog::new());
        log.append("Image", 1, Action::Insert);
        log.append("Image", 2, Action::Insert);
        let store = Arc::new(MemoryConfigStore::new());

        let mut q = queue(&log, &store);
        assert!(q.has_next().unwrap());
        q.next().unwrap().unwrap();
        assert_eq!(store.get(DEFAULT_QUEUE_KEY).unwrap(), Some(-1));

        assert!(q.has_next().unwrap());
        q.next().unwrap().unwrap();
        assert_eq!(store.get(DEFAULT_QUEUE_KEY).unwrap(), Some(1));

        // Settled when the next window is attempted
        assert!(!q.has_next().unwrap());
        assert_eq!(store.get(DEFAULT_QUEUE_KEY).unwrap(), Some(2));
        assert_eq!(q.stats().passed, 2);
    }

    #[test]
    fn test_failure_holds_watermark() {
        let log = Arc::new(MemoryEventLog::new());
        log.append("Image", 1, Action::Insert);
        let store = Arc::new(MemoryConfigStore::new());

        let mut q = queue(&log, &store);
        assert!(q.has_next().unwrap());
        let record = q.next().unwrap().unwrap();

        let foreign = ProcessingFailed {
            loader: LoaderId::next(),
            record: record.clone(),
        };
        assert!(!q.on_failure(&foreign));

        let own = ProcessingFailed {
            loader: q.id(),
            record,
        };
        assert!(q.on_failure(&own));
        assert!(!q.has_next().unwrap());

        assert_eq!(store.get(DEFAULT_QUEUE_KEY).unwrap(), Some(-1));
        let stats = q.stats();
        assert_eq!(stats.failure_len, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(q.entry("Image", 1).unwrap().state, EntryState::Fail);

        assert_eq!(q.retry_failures(), 1);
        assert!(q.has_next().unwrap());
        assert_eq!(q.next().unwrap().unwrap().entity_id, 1);
    }

    #[test]
    fn test_batch_size_limits_batch() {
        let log = Arc::new(MemoryEventLog::new());
        for id in 1..=5 {
            log.append("Image", id, Action::Insert);
        }

        let mut q = queue(&log, &Arc::new(MemoryConfigStore::new())).with_batch_size(2);
        let mut batch = Vec::new();
        while q.has_next().unwrap() {
            batch.push(q.next().unwrap().unwrap().entity_id);
        }
        assert_eq!(batch, vec![1, 2]);

        assert!(q.has_next().unwrap());
        assert_eq!(q.next().unwrap().unwrap().entity_id, 3);
    }

    #[test]
    fn test_window_limit_loads_incrementally() {
        let log = Arc::new(MemoryEventLog::new());
        for id in 1..=3 {
            log.append("Image", id, Action::Insert);
        }

        let mut q = queue(&log, &Arc::new(MemoryConfigStore::new())).with_window(2);
        let mut seen = Vec::new();
        while q.has_next().unwrap() {
            seen.push(q.next().unwrap().unwrap().entity_id);
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(q.stats().windows_loaded, 3);
    }

    #[test]
    fn test_excluded_rows_dropped() {
        let log = Arc::new(MemoryEventLog::new());
        log.append("Image", 1, Action::Insert);
        log.append("Dataset", 2, Action::Insert);

        let mut q = queue(&log, &Arc::new(MemoryConfigStore::new())).with_excludes(["Image"]);
        assert!(q.has_next().unwrap());
        assert_eq!(q.next().unwrap().unwrap().entity_type, "Dataset");
        assert!(!q.add_event_log("Image", 5));
    }

    #[test]
    fn test_reindex_while_in_flight_requeues() {
        let log = Arc::new(MemoryEventLog::new());
        log.append("Image", 1, Action::Insert);

        let mut q = queue(&log, &Arc::new(MemoryConfigStore::new()));
        assert!(q.has_next().unwrap());
        q.next().unwrap().unwrap();

        assert!(q.add_event_log("Image", 1));
        assert!(q.has_next().unwrap());
        assert_eq!(q.next().unwrap().unwrap(), EventLogRecord::reindex("Image", 1));
    }

    #[test]
    fn test_more_is_zero_and_stop() {
        let log = Arc::new(MemoryEventLog::new());
        log.append("Image", 1, Action::Insert);
        let mut q = queue(&log, &Arc::new(MemoryConfigStore::new()));
        assert_eq!(q.more(), 0);

        q.stop(true);
        assert!(!q.has_next().unwrap());
        q.stop(false);
        assert!(q.has_next().unwrap());
    }
}
