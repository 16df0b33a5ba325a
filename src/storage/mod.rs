//! Storage collaborators
//!
//! The loaders do not own the event log, the domain tables, or the
//! configuration table. They reach them through the traits below:
//!
//! - `EventLogSource`: one-row-at-a-time reads of the event log
//! - `PartitionSource`: windowed bulk reads of the event log
//! - `EntityTable`: id walks over domain tables
//! - `ConfigStore`: key → integer store for resume watermarks
//!
//! Two backends are provided: `memory` for tests and embedding, and `file`
//! (JSONL log, JSON config) for the binary.

mod atomic;
pub mod file;
pub mod memory;

pub use atomic::{atomic_write_with, cleanup_temp_files};
pub use file::{FileConfigStore, FileEntityTable, FileEventLog};
pub use memory::{MemoryConfigStore, MemoryEntityTable, MemoryEventLog};

use crate::error::LoaderResult;
use crate::types::{Action, EventLogRecord, LogRow};

/// Sequential reads of the persisted event log
pub trait EventLogSource: Send + Sync {
    /// First record with id strictly greater than `after_id` (ascending, page size 1)
    fn next_after(&self, after_id: i64) -> LoaderResult<Option<EventLogRecord>>;

    /// Most recent record (descending by id, page size 1)
    fn latest(&self) -> LoaderResult<Option<EventLogRecord>>;
}

/// Windowed bulk reads of the persisted event log
pub trait PartitionSource: Send + Sync {
    /// Rows with `log_id > from_id` whose type and action are allowed, in
    /// ascending id order, at most `limit` rows.
    ///
    /// Consecutive rows for the same entity and action may be folded into
    /// one row; its `skipped_count` says how many were folded.
    fn event_log_partitions(
        &self,
        types: &[String],
        actions: &[Action],
        from_id: i64,
        limit: usize,
    ) -> LoaderResult<Vec<LogRow>>;
}

/// Id walks over domain tables
pub trait EntityTable: Send + Sync {
    /// Lowest id of `entity_type` strictly greater than `after_id`
    fn next_entity_after(&self, entity_type: &str, after_id: i64) -> LoaderResult<Option<i64>>;
}

/// Small persisted key → integer store
///
/// A missing key is `Ok(None)`. A missing store is
/// [`LoaderError::StorageUnavailable`](crate::error::LoaderError::StorageUnavailable).
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> LoaderResult<Option<i64>>;
    fn set(&self, key: &str, value: i64) -> LoaderResult<()>;
    fn delete(&self, key: &str) -> LoaderResult<()>;
}

/// Build partition rows from records already sorted by log id
pub(crate) fn collapse_partitions<'a, I>(
    records: I,
    types: &[String],
    actions: &[Action],
    from_id: i64,
    limit: usize,
) -> Vec<LogRow>
where
    I: IntoIterator<Item = &'a EventLogRecord>,
{
    let mut rows: Vec<LogRow> = Vec::new();
    if limit == 0 {
        return rows;
    }

    for record in records {
        let Some(log_id) = record.log_id else {
            continue;
        };
        if log_id <= from_id
            || !types.iter().any(|t| t == &record.entity_type)
            || !actions.contains(&record.action)
        {
            continue;
        }

        if let Some(last) = rows.last_mut() {
            if last.entity_type == record.entity_type
                && last.entity_id == record.entity_id
                && last.action == record.action
            {
                last.log_id = log_id;
                last.skipped_count += 1;
                continue;
            }
        }

        if rows.len() == limit {
            break;
        }
        rows.push(LogRow::new(
            log_id,
            record.entity_type.clone(),
            record.entity_id,
            record.action,
        ));
    }

    rows
}
