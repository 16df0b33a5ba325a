//! Periodic driver connecting a feed to a sink
//!
//! Each tick requeues failed records, drains pending notifications, then
//! runs batches back to back while they make progress. A productive tick
//! ends with a sink flush. An idle or failing tick waits for the next
//! interval. Loaders stay synchronous; the batch boundary is the only point
//! where the task yields.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::error::{LoaderError, LoaderResult};
use crate::notify::Notifications;
use crate::types::Action;

use super::feed::Feed;
use super::sink::IndexSink;

/// Counters accumulated over the driver's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub ticks: u64,
    pub batches: u64,
    pub indexed: u64,
    pub removed: u64,
    pub failed: u64,
    pub retried: u64,
    pub reindex_requested: u64,
    pub storage_errors: u64,
    pub flush_errors: u64,
}

/// What `run` hands back when it stops
pub struct DriverExit<S> {
    pub sink: S,
    pub stats: DriverStats,
    /// Fatal error that stopped the driver, if any
    pub error: Option<LoaderError>,
}

pub struct IndexerDriver<S> {
    feed: Box<dyn Feed>,
    sink: S,
    notifications: Notifications,
    poll_interval: Duration,
    stats: DriverStats,
}

impl<S: IndexSink> IndexerDriver<S> {
    pub fn new(feed: Box<dyn Feed>, sink: S, notifications: Notifications) -> Self {
        Self {
            feed,
            sink,
            notifications,
            poll_interval: Duration::from_millis(1000),
            stats: DriverStats::default(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    /// Requeue records the feed parked after a failure
    pub fn retry_failures(&mut self) -> usize {
        let retried = self.feed.retry_failures();
        self.stats.retried += retried as u64;
        retried
    }

    /// Apply queued reindex requests and failure reports
    pub fn drain_notifications(&mut self) -> LoaderResult<()> {
        for request in self.notifications.drain_reindex() {
            let added = self.feed.on_reindex(&request)?;
            self.stats.reindex_requested += added as u64;
            debug!(requested = request.targets.len(), added, "reindex request applied");
        }

        for report in self.notifications.drain_failures() {
            if !self.feed.on_failure(&report)? {
                debug!(loader = %report.loader, record = %report.record, "failure report ignored");
            }
        }

        Ok(())
    }

    /// Run one batch. Returns how many records the sink accepted.
    ///
    /// A sink error hands the record back to the feed and the batch goes on.
    /// A feed error ends the batch.
    pub fn run_batch(&mut self) -> LoaderResult<usize> {
        self.drain_notifications()?;
        self.stats.batches += 1;

        let mut accepted = 0;
        while self.feed.has_next()? {
            let Some(record) = self.feed.next_record()? else {
                continue;
            };

            let result = if record.action == Action::Delete {
                self.sink.remove(&record)
            } else {
                self.sink.index(&record)
            };

            match result {
                Ok(()) => {
                    accepted += 1;
                    if record.action == Action::Delete {
                        self.stats.removed += 1;
                    } else {
                        self.stats.indexed += 1;
                    }
                }
                Err(e) => {
                    warn!(record = %record, error = %e, "indexing failed");
                    self.stats.failed += 1;
                    self.feed.fail(&record)?;
                }
            }
        }

        if accepted > 0 {
            debug!(accepted, "batch complete");
        }
        Ok(accepted)
    }

    /// Run batches until one makes no progress or fails
    async fn tick(&mut self, shutdown: &watch::Receiver<bool>) -> LoaderResult<()> {
        self.stats.ticks += 1;
        self.retry_failures();
        let mut total = 0;

        loop {
            match self.run_batch() {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.stats.storage_errors += 1;
                    error!(error = %e, "indexing batch failed, retrying next tick");
                    break;
                }
            }
            if *shutdown.borrow() {
                break;
            }
            tokio::task::yield_now().await;
        }

        if total > 0 {
            if let Err(e) = self.sink.flush() {
                self.stats.flush_errors += 1;
                warn!(error = %e, "sink flush failed");
            }
            info!(records = total, "indexing tick complete");
        }
        Ok(())
    }

    /// Drive the feed until `shutdown` turns true, its sender is dropped, or
    /// a fatal storage error occurs
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> DriverExit<S> {
        let mut timer = interval(self.poll_interval);
        let mut fatal = None;

        info!(
            loader = %self.feed.id(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "indexer driver started"
        );

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.tick(&shutdown).await {
                        self.stats.storage_errors += 1;
                        error!(error = %e, "fatal storage error, stopping indexer");
                        fatal = Some(e);
                        break;
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            indexed = self.stats.indexed,
            removed = self.stats.removed,
            failed = self.stats.failed,
            "indexer driver stopped"
        );

        DriverExit {
            sink: self.sink,
            stats: self.stats,
            error: fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use crate::backlog::EventBacklog;
    use crate::indexer::sink::SinkResult;
    use crate::indexer::TextIndex;
    use crate::loader::{EventLogLoader, EventLogQueue, PersistentLogQuery, DEFAULT_QUEUE_KEY};
    use crate::notify::{channels, ReindexRequest};
    use crate::storage::{ConfigStore, MemoryConfigStore, MemoryEventLog};
    use crate::types::EventLogRecord;

    /// Fails every record of the listed ids once
    struct Flaky {
        fail_once: HashSet<i64>,
        seen: Vec<EventLogRecord>,
    }

    impl IndexSink for Flaky {
        fn index(&mut self, record: &EventLogRecord) -> SinkResult<()> {
            if self.fail_once.remove(&record.entity_id) {
                return Err(format!("cannot index {record}").into());
            }
            self.seen.push(record.clone());
            Ok(())
        }

        fn remove(&mut self, record: &EventLogRecord) -> SinkResult<()> {
            self.seen.push(record.clone());
            Ok(())
        }
    }

    fn persistent_feed(log: &Arc<MemoryEventLog>) -> Box<dyn Feed> {
        let query = PersistentLogQuery::new(log.clone(), Arc::new(MemoryConfigStore::new()));
        Box::new(EventLogLoader::new(query, Arc::new(EventBacklog::new())))
    }

    #[test]
    fn test_run_batch_indexes_and_removes() {
        let log = Arc::new(MemoryEventLog::new());
        log.append("Image", 1, Action::Insert);
        log.append("Image", 2, Action::Insert);
        log.append("Image", 1, Action::Delete);

        let (_notifier, notifications) = channels();
        let mut driver = IndexerDriver::new(persistent_feed(&log), TextIndex::new(), notifications);

        assert_eq!(driver.run_batch().unwrap(), 3);
        assert!(!driver.sink().contains("Image", 1));
        assert!(driver.sink().contains("Image", 2));
        assert_eq!(driver.stats().removed, 1);
        assert_eq!(driver.run_batch().unwrap(), 0);
    }

    #[test]
    fn test_failed_record_retried_next_batch() {
        let log = Arc::new(MemoryEventLog::new());
        log.append("Image", 1, Action::Insert);
        log.append("Image", 2, Action::Insert);

        let (_notifier, notifications) = channels();
        let sink = Flaky {
            fail_once: HashSet::from([1]),
            seen: Vec::new(),
        };
        let mut driver = IndexerDriver::new(persistent_feed(&log), sink, notifications);

        assert_eq!(driver.run_batch().unwrap(), 1);
        assert_eq!(driver.stats().failed, 1);
        assert_eq!(driver.run_batch().unwrap(), 1);

        let ids: Vec<i64> = driver.sink().seen.iter().map(|r| r.entity_id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_queue_failure_retried_next_tick() {
        let log = Arc::new(MemoryEventLog::new());
        log.append("Image", 1, Action::Insert);
        log.append("Image", 2, Action::Insert);
        let store = Arc::new(MemoryConfigStore::new());

        let queue = EventLogQueue::new(log.clone(), store.clone(), ["Image"], &[Action::Insert])
            .with_window(10);

        let (_notifier, notifications) = channels();
        let sink = Flaky {
            fail_once: HashSet::from([1]),
            seen: Vec::new(),
        };
        let mut driver = IndexerDriver::new(Box::new(queue), sink, notifications);
        let (_tx, rx) = watch::channel(false);

        driver.tick(&rx).await.unwrap();
        assert_eq!(driver.stats().failed, 1);
        let ids: Vec<i64> = driver.sink().seen.iter().map(|r| r.entity_id).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(store.get(DEFAULT_QUEUE_KEY).unwrap(), Some(2));

        // The parked entry comes back on the next tick
        driver.tick(&rx).await.unwrap();
        assert_eq!(driver.stats().retried, 1);
        let ids: Vec<i64> = driver.sink().seen.iter().map(|r| r.entity_id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_failed_reindex_retried() {
        let log = Arc::new(MemoryEventLog::new());
        let (notifier, notifications) = channels();
        let sink = Flaky {
            fail_once: HashSet::from([7]),
            seen: Vec::new(),
        };
        let mut driver = IndexerDriver::new(persistent_feed(&log), sink, notifications);

        assert!(notifier.request_reindex(ReindexRequest::single("Dataset", 7)));
        assert_eq!(driver.run_batch().unwrap(), 0);
        assert_eq!(driver.stats().failed, 1);

        assert_eq!(driver.run_batch().unwrap(), 1);
        assert_eq!(driver.sink().seen, vec![EventLogRecord::reindex("Dataset", 7)]);
        assert_eq!(driver.run_batch().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_productive_tick_flushes_index() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("index.json");
        let log = Arc::new(MemoryEventLog::new());
        log.append("Image", 1, Action::Insert);

        let (_notifier, notifications) = channels();
        let index = TextIndex::open(&path).unwrap();
        let mut driver = IndexerDriver::new(persistent_feed(&log), index, notifications);
        let (_tx, rx) = watch::channel(false);

        driver.tick(&rx).await.unwrap();
        assert!(TextIndex::load(&path).unwrap().contains("Image", 1));
        assert_eq!(driver.stats().flush_errors, 0);
    }

    #[test]
    fn test_reindex_notification() {
        let log = Arc::new(MemoryEventLog::new());
        let (notifier, notifications) = channels();
        let mut driver = IndexerDriver::new(persistent_feed(&log), TextIndex::new(), notifications);

        assert!(notifier.request_reindex(ReindexRequest::single("Dataset", 7)));
        assert_eq!(driver.run_batch().unwrap(), 1);
        assert_eq!(driver.stats().reindex_requested, 1);
        assert_eq!(driver.sink().get("Dataset", 7).unwrap().action, Action::Reindex);
        assert_eq!(driver.run_batch().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let log = Arc::new(MemoryEventLog::new());
        log.append("Image", 1, Action::Insert);
        log.append("Dataset", 2, Action::Update);

        let (_notifier, notifications) = channels();
        let driver = IndexerDriver::new(persistent_feed(&log), TextIndex::new(), notifications)
            .with_poll_interval(Duration::from_millis(10));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(driver.run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let exit = handle.await.unwrap();
        assert!(exit.error.is_none());
        assert_eq!(exit.sink.len(), 2);
        assert_eq!(exit.stats.indexed, 2);
        assert!(exit.stats.ticks >= 1);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_driver() {
        let log = Arc::new(MemoryEventLog::new());
        log.append("Image", 1, Action::Insert);

        let query = PersistentLogQuery::new(log, Arc::new(MemoryConfigStore::unavailable()));
        let feed = Box::new(EventLogLoader::new(query, Arc::new(EventBacklog::new())));

        let (_notifier, notifications) = channels();
        let driver = IndexerDriver::new(feed, TextIndex::new(), notifications)
            .with_poll_interval(Duration::from_millis(10));

        let (_tx, rx) = watch::channel(false);
        let exit = driver.run(rx).await;
        assert!(matches!(exit.error, Some(LoaderError::StorageUnavailable { .. })));
        assert_eq!(exit.stats.storage_errors, 1);
    }
}
