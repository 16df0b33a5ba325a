//! In-memory storage backend

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;

use parking_lot::RwLock;

use crate::error::{LoaderError, LoaderResult};
use crate::types::{Action, EventLogRecord, LogRow};

use super::{collapse_partitions, ConfigStore, EntityTable, EventLogSource, PartitionSource};

/// Append-only event log held in memory
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    records: RwLock<BTreeMap<i64, EventLogRecord>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change and return its log id (ids start at 1)
    pub fn append(&self, entity_type: impl Into<String>, entity_id: i64, action: Action) -> i64 {
        let mut records = self.records.write();
        let log_id = records.keys().next_back().map(|id| id + 1).unwrap_or(1);
        records.insert(log_id, EventLogRecord::new(log_id, entity_type, entity_id, action));
        log_id
    }

    /// Insert a record with an explicit id, replacing any existing one
    pub fn insert(&self, record: EventLogRecord) -> LoaderResult<()> {
        record.validate()?;
        let log_id = record.log_id.ok_or_else(|| {
            LoaderError::InvalidRecord("event log rows need a log id".to_string())
        })?;
        self.records.write().insert(log_id, record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl EventLogSource for MemoryEventLog {
    fn next_after(&self, after_id: i64) -> LoaderResult<Option<EventLogRecord>> {
        let records = self.records.read();
        Ok(records
            .range(after_id.saturating_add(1)..)
            .next()
            .map(|(_, r)| r.clone()))
    }

    fn latest(&self) -> LoaderResult<Option<EventLogRecord>> {
        Ok(self.records.read().values().next_back().cloned())
    }
}

impl PartitionSource for MemoryEventLog {
    fn event_log_partitions(
        &self,
        types: &[String],
        actions: &[Action],
        from_id: i64,
        limit: usize,
    ) -> LoaderResult<Vec<LogRow>> {
        let records = self.records.read();
        Ok(collapse_partitions(
            records.range(from_id.saturating_add(1)..).map(|(_, r)| r),
            types,
            actions,
            from_id,
            limit,
        ))
    }
}

/// Domain tables as sorted id sets per type
#[derive(Debug, Default)]
pub struct MemoryEntityTable {
    tables: RwLock<HashMap<String, BTreeSet<i64>>>,
}

impl MemoryEntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity_type: impl Into<String>, entity_id: i64) {
        self.tables
            .write()
            .entry(entity_type.into())
            .or_default()
            .insert(entity_id);
    }

    pub fn remove(&self, entity_type: &str, entity_id: i64) -> bool {
        self.tables
            .write()
            .get_mut(entity_type)
            .map(|ids| ids.remove(&entity_id))
            .unwrap_or(false)
    }
}

impl EntityTable for MemoryEntityTable {
    fn next_entity_after(&self, entity_type: &str, after_id: i64) -> LoaderResult<Option<i64>> {
        let tables = self.tables.read();
        Ok(tables
            .get(entity_type)
            .and_then(|ids| ids.range(after_id.saturating_add(1)..).next().copied()))
    }
}

/// Key → integer store held in memory
#[derive(Debug)]
pub struct MemoryConfigStore {
    values: RwLock<HashMap<String, i64>>,
    available: bool,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            available: true,
        }
    }

    /// A store whose backing table does not exist; every call fails
    pub fn unavailable() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            available: false,
        }
    }

    fn check(&self) -> LoaderResult<()> {
        if self.available {
            Ok(())
        } else {
            Err(LoaderError::unavailable(
                "configuration table does not exist",
                io::Error::new(io::ErrorKind::NotFound, "missing table"),
            ))
        }
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> LoaderResult<Option<i64>> {
        self.check()?;
        Ok(self.values.read().get(key).copied())
    }

    fn set(&self, key: &str, value: i64) -> LoaderResult<()> {
        self.check()?;
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> LoaderResult<()> {
        self.check()?;
        self.values.write().remove(key);
        Ok(())
    }
}
