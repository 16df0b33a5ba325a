//! One interface over every loader kind

use crate::error::LoaderResult;
use crate::loader::{EventLogLoader, EventLogQueue, LogQuery, StopHandle};
use crate::notify::{LoaderId, ProcessingFailed, ReindexRequest};
use crate::types::EventLogRecord;

/// What the driver needs from a loader
pub trait Feed: Send {
    /// Identity carried in failure reports
    fn id(&self) -> LoaderId;

    fn has_next(&mut self) -> LoaderResult<bool>;

    /// Record to process; `None` means skip this slot
    fn next_record(&mut self) -> LoaderResult<Option<EventLogRecord>>;

    /// Processing of `record`, just handed out, failed
    fn fail(&mut self, record: &EventLogRecord) -> LoaderResult<()>;

    fn on_reindex(&mut self, request: &ReindexRequest) -> LoaderResult<usize>;

    fn on_failure(&mut self, report: &ProcessingFailed) -> LoaderResult<bool>;

    /// Give failed records another attempt. Returns how many were requeued.
    fn retry_failures(&mut self) -> usize {
        0
    }

    fn more(&mut self) -> LoaderResult<i64>;

    fn stop_handle(&self) -> StopHandle;
}

impl<Q: LogQuery> Feed for EventLogLoader<Q> {
    fn id(&self) -> LoaderId {
        EventLogLoader::id(self)
    }

    fn has_next(&mut self) -> LoaderResult<bool> {
        EventLogLoader::has_next(self)
    }

    fn next_record(&mut self) -> LoaderResult<Option<EventLogRecord>> {
        self.next().map(Some)
    }

    fn fail(&mut self, record: &EventLogRecord) -> LoaderResult<()> {
        self.rollback(record).map(|_| ())
    }

    fn on_reindex(&mut self, request: &ReindexRequest) -> LoaderResult<usize> {
        EventLogLoader::on_reindex(self, request)
    }

    fn on_failure(&mut self, report: &ProcessingFailed) -> LoaderResult<bool> {
        EventLogLoader::on_failure(self, report)
    }

    fn more(&mut self) -> LoaderResult<i64> {
        EventLogLoader::more(self)
    }

    fn stop_handle(&self) -> StopHandle {
        EventLogLoader::stop_handle(self)
    }
}

impl Feed for EventLogQueue {
    fn id(&self) -> LoaderId {
        EventLogQueue::id(self)
    }

    fn has_next(&mut self) -> LoaderResult<bool> {
        EventLogQueue::has_next(self)
    }

    fn next_record(&mut self) -> LoaderResult<Option<EventLogRecord>> {
        self.next()
    }

    fn fail(&mut self, record: &EventLogRecord) -> LoaderResult<()> {
        let report = ProcessingFailed {
            loader: EventLogQueue::id(self),
            record: record.clone(),
        };
        EventLogQueue::on_failure(self, &report);
        Ok(())
    }

    fn on_reindex(&mut self, request: &ReindexRequest) -> LoaderResult<usize> {
        Ok(EventLogQueue::on_reindex(self, request))
    }

    fn on_failure(&mut self, report: &ProcessingFailed) -> LoaderResult<bool> {
        Ok(EventLogQueue::on_failure(self, report))
    }

    fn retry_failures(&mut self) -> usize {
        EventLogQueue::retry_failures(self)
    }

    fn more(&mut self) -> LoaderResult<i64> {
        Ok(EventLogQueue::more(self))
    }

    fn stop_handle(&self) -> StopHandle {
        EventLogQueue::stop_handle(self)
    }
}
