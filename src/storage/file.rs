//! File storage backend
//!
//! Layout under a data directory:
//!
//! ```text
//! data/
//! ├── events.jsonl     append-only event log, one EventLogRecord per line
//! ├── entities.jsonl   domain rows for the pseudo-log walk: {"entityType", "id"}
//! └── config.json      {"<loader key>": <current id>, ...}
//! ```

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LoaderError, LoaderResult};
use crate::types::{Action, EventLogRecord, LogRow};

use super::atomic::atomic_write_with;
use super::{collapse_partitions, ConfigStore, EntityTable, EventLogSource, PartitionSource};

/// Parse every parseable JSON line of `bytes`. `first_line` numbers warnings.
fn parse_json_lines<T: serde::de::DeserializeOwned>(
    path: &Path,
    bytes: &[u8],
    first_line: usize,
) -> LoaderResult<Vec<T>> {
    let mut items = Vec::new();

    for (line_num, line_result) in bytes.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str(&line) {
            Ok(item) => items.push(item),
            Err(e) => warn!(
                path = %path.display(),
                line = first_line + line_num + 1,
                error = %e,
                "skipping unparseable line"
            ),
        }
    }

    Ok(items)
}

/// Read every parseable JSON line of a file; missing file → empty
fn read_json_lines<T: serde::de::DeserializeOwned>(path: &Path) -> LoaderResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    parse_json_lines(path, &std::fs::read(path)?, 0)
}

fn append_json_line<T: Serialize>(path: &Path, item: &T) -> LoaderResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::to_string(item)?)?;
    file.sync_all()?;
    Ok(())
}

/// Parsed prefix of the log file
#[derive(Default)]
struct LogCache {
    /// Ascending log id
    records: Vec<EventLogRecord>,
    /// Bytes consumed, always at a line boundary
    offset: u64,
    lines: usize,
}

/// Append-only JSONL event log.
///
/// Parsed records are cached; reads only parse what was appended since the
/// last call. A file that shrank is parsed again from the start.
pub struct FileEventLog {
    path: PathBuf,
    /// Next id to assign, discovered lazily from the file
    next_log_id: Mutex<Option<i64>>,
    cache: Mutex<LogCache>,
}

impl FileEventLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            next_log_id: Mutex::new(None),
            cache: Mutex::new(LogCache::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bring the cache up to the end of the file
    fn refresh(&self) -> LoaderResult<MutexGuard<'_, LogCache>> {
        let mut cache = self.cache.lock();
        let len = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        if len < cache.offset {
            debug!(path = %self.path.display(), "event log shrank, reloading");
            *cache = LogCache::default();
        }
        if len == cache.offset {
            return Ok(cache);
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(cache.offset))?;
        let mut tail = Vec::new();
        file.read_to_end(&mut tail)?;

        // A line still being written is picked up next time
        let complete = tail.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
        let tail = &tail[..complete];
        let parsed: Vec<EventLogRecord> = parse_json_lines(&self.path, tail, cache.lines)?;

        let needs_sort = {
            let mut last = cache.records.last().map_or(i64::MIN, |r| r.log_id_or_unset());
            let mut sorted = true;
            for record in parsed.iter().filter(|r| r.log_id.is_some()) {
                sorted &= record.log_id_or_unset() > last;
                last = record.log_id_or_unset();
            }
            !sorted
        };
        cache
            .records
            .extend(parsed.into_iter().filter(|r| r.log_id.is_some()));
        if needs_sort {
            cache.records.sort_by_key(|r| r.log_id);
        }
        cache.offset += complete as u64;
        cache.lines += tail.iter().filter(|b| **b == b'\n').count();
        Ok(cache)
    }

    /// All records in ascending log id order
    pub fn load_records(&self) -> LoaderResult<Vec<EventLogRecord>> {
        Ok(self.refresh()?.records.clone())
    }

    /// Append a change with the next log id; fsynced before returning
    pub fn append(
        &self,
        entity_type: impl Into<String>,
        entity_id: i64,
        action: Action,
    ) -> LoaderResult<EventLogRecord> {
        let mut next = self.next_log_id.lock();
        let log_id = match *next {
            Some(id) => id,
            None => self.latest()?.and_then(|r| r.log_id).map(|id| id + 1).unwrap_or(1),
        };

        let record = EventLogRecord::new(log_id, entity_type, entity_id, action);
        record.validate()?;
        append_json_line(&self.path, &record)?;

        *next = Some(log_id + 1);
        Ok(record)
    }
}

impl EventLogSource for FileEventLog {
    fn next_after(&self, after_id: i64) -> LoaderResult<Option<EventLogRecord>> {
        let cache = self.refresh()?;
        let pos = cache
            .records
            .partition_point(|r| r.log_id_or_unset() <= after_id);
        Ok(cache.records.get(pos).cloned())
    }

    fn latest(&self) -> LoaderResult<Option<EventLogRecord>> {
        Ok(self.refresh()?.records.last().cloned())
    }
}

impl PartitionSource for FileEventLog {
    fn event_log_partitions(
        &self,
        types: &[String],
        actions: &[Action],
        from_id: i64,
        limit: usize,
    ) -> LoaderResult<Vec<LogRow>> {
        let cache = self.refresh()?;
        Ok(collapse_partitions(&cache.records, types, actions, from_id, limit))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EntityRow {
    #[serde(rename = "entityType")]
    entity_type: String,
    id: i64,
}

/// Domain rows listed in a JSONL file
pub struct FileEntityTable {
    path: PathBuf,
}

impl FileEntityTable {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn append(&self, entity_type: impl Into<String>, entity_id: i64) -> LoaderResult<()> {
        append_json_line(
            &self.path,
            &EntityRow {
                entity_type: entity_type.into(),
                id: entity_id,
            },
        )
    }
}

impl EntityTable for FileEntityTable {
    fn next_entity_after(&self, entity_type: &str, after_id: i64) -> LoaderResult<Option<i64>> {
        let rows: Vec<EntityRow> = read_json_lines(&self.path)?;
        Ok(rows
            .into_iter()
            .filter(|row| row.entity_type == entity_type && row.id > after_id)
            .map(|row| row.id)
            .min())
    }
}

/// Key → integer store kept in one JSON object, rewritten atomically.
///
/// The object is read once and kept in memory; only `set` and `delete`
/// touch the file. Other handles on the same file are not observed.
pub struct FileConfigStore {
    path: PathBuf,
    values: Mutex<Option<HashMap<String, i64>>>,
}

impl FileConfigStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            values: Mutex::new(None),
        }
    }

    fn check_available(&self) -> LoaderResult<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        if parent.as_os_str().is_empty() || parent.is_dir() {
            return Ok(());
        }
        Err(LoaderError::unavailable(
            format!("configuration directory {} does not exist", parent.display()),
            io::Error::new(io::ErrorKind::NotFound, "missing directory"),
        ))
    }

    fn read_values(&self) -> LoaderResult<HashMap<String, i64>> {
        self.check_available()?;
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_values(&self, values: &HashMap<String, i64>) -> LoaderResult<()> {
        self.check_available()?;
        let json = serde_json::to_string_pretty(values)?;
        atomic_write_with(&self.path, |file| file.write_all(json.as_bytes()))?;
        Ok(())
    }

    /// Cached map, read from disk on first use
    fn loaded<'a>(
        &self,
        guard: &'a mut MutexGuard<'_, Option<HashMap<String, i64>>>,
    ) -> LoaderResult<&'a mut HashMap<String, i64>> {
        let values = match guard.take() {
            Some(values) => values,
            None => self.read_values()?,
        };
        Ok(guard.insert(values))
    }
}

impl ConfigStore for FileConfigStore {
    fn get(&self, key: &str) -> LoaderResult<Option<i64>> {
        let mut guard = self.values.lock();
        Ok(self.loaded(&mut guard)?.get(key).copied())
    }

    fn set(&self, key: &str, value: i64) -> LoaderResult<()> {
        let mut guard = self.values.lock();
        let values = self.loaded(&mut guard)?;
        if values.get(key) == Some(&value) {
            return Ok(());
        }
        let mut updated = values.clone();
        updated.insert(key.to_string(), value);
        self.write_values(&updated)?;
        *values = updated;
        Ok(())
    }

    fn delete(&self, key: &str) -> LoaderResult<()> {
        let mut guard = self.values.lock();
        let values = self.loaded(&mut guard)?;
        if !values.contains_key(key) {
            return Ok(());
        }
        let mut updated = values.clone();
        updated.remove(key);
        self.write_values(&updated)?;
        *values = updated;
        Ok(())
    }
}
