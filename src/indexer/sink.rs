//! Where handed-out records end up

use crate::types::EventLogRecord;

/// Sink errors are opaque to the driver: any error rolls the record back
pub type SinkResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Consumer of event log records, usually a search index
pub trait IndexSink: Send {
    /// Add or refresh the object named by `record`
    fn index(&mut self, record: &EventLogRecord) -> SinkResult<()>;

    /// Drop the object named by a DELETE record
    fn remove(&mut self, record: &EventLogRecord) -> SinkResult<()>;

    /// Make accepted records durable. Called after a tick that made progress.
    fn flush(&mut self) -> SinkResult<()> {
        Ok(())
    }
}
