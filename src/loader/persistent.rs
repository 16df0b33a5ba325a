//! Watermark-tracking query over the persisted event log
//!
//! The position reached ("current id") is stored in a [`ConfigStore`] under
//! the loader's key, so indexing resumes where it stopped after a restart.
//! The watermark moves as soon as `query()` produces a record, which gives
//! at-least-once delivery: a crash before the consumer finishes may replay a
//! record, never skip one.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::LoaderResult;
use crate::storage::{ConfigStore, EventLogSource};
use crate::types::{EventLogRecord, UNSET_LOG_ID};

use super::LogQuery;

/// Default key for the persisted watermark
pub const DEFAULT_LOADER_KEY: &str = "PersistentEventLogLoader.v1.current_id";

/// First-run hook, invoked once when no watermark is stored.
///
/// Returns the position to start from; `None` keeps the `-1` sentinel and
/// scans the whole log.
pub trait InitializeHook: Send {
    fn initialize(&mut self, log: &dyn EventLogSource) -> LoaderResult<Option<i64>>;
}

impl<F> InitializeHook for F
where
    F: FnMut(&dyn EventLogSource) -> LoaderResult<Option<i64>> + Send,
{
    fn initialize(&mut self, log: &dyn EventLogSource) -> LoaderResult<Option<i64>> {
        self(log)
    }
}

/// Built-in starting positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialPosition {
    /// Index the whole existing log
    #[default]
    Beginning,
    /// Skip existing history; index only changes logged from now on
    Latest,
}

impl InitializeHook for InitialPosition {
    fn initialize(&mut self, log: &dyn EventLogSource) -> LoaderResult<Option<i64>> {
        match self {
            InitialPosition::Beginning => Ok(None),
            InitialPosition::Latest => Ok(log.latest()?.and_then(|r| r.log_id)),
        }
    }
}

/// "Next record after the watermark" query
pub struct PersistentLogQuery {
    key: String,
    log: Arc<dyn EventLogSource>,
    store: Arc<dyn ConfigStore>,
    hook: Box<dyn InitializeHook>,
}

impl PersistentLogQuery {
    /// Query starting from the beginning of the log on first run
    pub fn new(log: Arc<dyn EventLogSource>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            key: DEFAULT_LOADER_KEY.to_string(),
            log,
            store,
            hook: Box::new(InitialPosition::Beginning),
        }
    }

    /// Store the watermark under a different key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Replace the first-run hook
    pub fn with_initializer(mut self, hook: impl InitializeHook + 'static) -> Self {
        self.hook = Box::new(hook);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stored watermark.
    ///
    /// With no stored value this persists `-1`, runs the first-run hook, and
    /// returns whatever position the hook chose. A missing store is a fatal
    /// `StorageUnavailable` error.
    pub fn current_id(&mut self) -> LoaderResult<i64> {
        if let Some(id) = self.store.get(&self.key)? {
            return Ok(id);
        }

        info!(key = %self.key, "no stored position, initializing loader");
        self.store.set(&self.key, UNSET_LOG_ID)?;

        match self.hook.initialize(self.log.as_ref())? {
            Some(start) => {
                self.set_current_id(start)?;
                Ok(start)
            }
            None => Ok(UNSET_LOG_ID),
        }
    }

    /// Persist a new watermark
    pub fn set_current_id(&self, id: i64) -> LoaderResult<()> {
        debug!(key = %self.key, id, "advancing position");
        self.store.set(&self.key, id)
    }

    /// Forget the stored watermark; the next query re-runs the first-run hook
    pub fn reset(&self) -> LoaderResult<()> {
        self.store.delete(&self.key)
    }
}

impl LogQuery for PersistentLogQuery {
    fn query(&mut self) -> LoaderResult<Option<EventLogRecord>> {
        let current = self.current_id()?;
        let next = self.log.next_after(current)?;
        if let Some(log_id) = next.as_ref().and_then(|r| r.log_id) {
            self.set_current_id(log_id)?;
        }
        Ok(next)
    }

    /// Distance from the watermark to the newest log record
    fn more(&mut self) -> LoaderResult<i64> {
        let Some(latest) = self.log.latest()?.and_then(|r| r.log_id) else {
            return Ok(0);
        };
        let current = self.current_id()?;
        Ok((latest - current).max(0))
    }
}
