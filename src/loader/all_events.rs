//! Whole-log walk with a per-scan ceiling
//!
//! The newest log id is captured when a scan starts and the scan stops
//! there. Records appended during the scan are picked up by the next scan,
//! which bounds how long any one scan runs.

use std::sync::Arc;

use tracing::debug;

use crate::error::LoaderResult;
use crate::storage::EventLogSource;
use crate::types::{EventLogRecord, UNSET_LOG_ID};

use super::LogQuery;

pub struct AllEventsQuery {
    log: Arc<dyn EventLogSource>,
    /// Last log id handed out
    previous: i64,
    /// Ceiling for the scan in progress
    max: Option<i64>,
}

impl AllEventsQuery {
    /// Walk from the start of the log
    pub fn new(log: Arc<dyn EventLogSource>) -> Self {
        Self::starting_after(log, UNSET_LOG_ID)
    }

    /// Walk records with id greater than `position`
    pub fn starting_after(log: Arc<dyn EventLogSource>, position: i64) -> Self {
        Self {
            log,
            previous: position,
            max: None,
        }
    }

    /// Last log id handed out
    pub fn position(&self) -> i64 {
        self.previous
    }

    /// Ceiling of the scan in progress, if one has started
    pub fn ceiling(&self) -> Option<i64> {
        self.max
    }

    fn finish_scan(&mut self) {
        debug!(position = self.previous, "event log scan complete");
        self.max = None;
    }
}

impl LogQuery for AllEventsQuery {
    fn query(&mut self) -> LoaderResult<Option<EventLogRecord>> {
        let max = match self.max {
            Some(max) => max,
            None => {
                let max = self
                    .log
                    .latest()?
                    .and_then(|r| r.log_id)
                    .unwrap_or(UNSET_LOG_ID);
                self.max = Some(max);
                max
            }
        };

        if self.previous >= max {
            self.finish_scan();
            return Ok(None);
        }

        match self.log.next_after(self.previous)? {
            Some(record) if record.log_id_or_unset() <= max => {
                self.previous = record.log_id_or_unset();
                Ok(Some(record))
            }
            _ => {
                self.finish_scan();
                Ok(None)
            }
        }
    }

    /// Distance to the ceiling; 1 ("unknown") before a scan has started
    fn more(&mut self) -> LoaderResult<i64> {
        Ok(match self.max {
            None => 1,
            Some(max) => (max - self.previous).max(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryEventLog;
    use crate::types::Action;

    #[test]
    fn test_scan_stops_at_ceiling() {
        let log = Arc::new(MemoryEventLog::new());
        log.append("Image", 1, Action::Insert);
        log.append("Image", 2, Action::Insert);

        let mut query = AllEventsQuery::new(log.clone());
        assert_eq!(query.more().unwrap(), 1);

        assert_eq!(query.query().unwrap().unwrap().log_id, Some(1));
        assert_eq!(query.ceiling(), Some(2));
        assert_eq!(query.more().unwrap(), 1);

        // Written during the scan: not part of it
        log.append("Image", 3, Action::Insert);

        assert_eq!(query.query().unwrap().unwrap().log_id, Some(2));
        assert_eq!(query.more().unwrap(), 0);
        assert!(query.query().unwrap().is_none());
        assert_eq!(query.ceiling(), None);

        // Next scan sees it
        assert_eq!(query.query().unwrap().unwrap().log_id, Some(3));
    }

    #[test]
    fn test_starting_after() {
        let log = Arc::new(MemoryEventLog::new());
        for id in 1..=5 {
            log.append("Image", id, Action::Update);
        }

        let mut query = AllEventsQuery::starting_after(log, 3);
        assert_eq!(query.query().unwrap().unwrap().log_id, Some(4));
        assert_eq!(query.position(), 4);
    }

    #[test]
    fn test_empty_log() {
        let mut query = AllEventsQuery::new(Arc::new(MemoryEventLog::new()));
        assert!(query.query().unwrap().is_none());
        assert_eq!(query.more().unwrap(), 1);
    }
}
