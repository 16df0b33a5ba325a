//! In-memory index of indexed objects
//!
//! Keeps one document per (type, id) with the action and log id that last
//! touched it. Saved to JSON after every productive tick when opened with
//! [`TextIndex::open`], and on shutdown.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LoaderResult;
use crate::storage::atomic_write_with;
use crate::types::{Action, EventLogRecord};

use super::sink::{IndexSink, SinkResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDoc {
    pub action: Action,
    #[serde(rename = "logId", skip_serializing_if = "Option::is_none")]
    pub log_id: Option<i64>,
    /// Unix timestamp (seconds)
    #[serde(rename = "indexedAt")]
    pub indexed_at: i64,
}

/// entity_type → entity_id → document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextIndex {
    docs: HashMap<String, BTreeMap<i64, IndexedDoc>>,
    /// Where `flush` saves to
    #[serde(skip)]
    path: Option<PathBuf>,
}

/// Index statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub doc_count: usize,
    pub type_count: usize,
}

impl TextIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a saved index; a missing file gives an empty index
    pub fn load(path: impl AsRef<Path>) -> LoaderResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load a saved index and keep its path for `flush`
    pub fn open(path: impl Into<PathBuf>) -> LoaderResult<Self> {
        let path = path.into();
        let mut index = Self::load(&path)?;
        index.path = Some(path);
        Ok(index)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the index atomically
    pub fn save(&self, path: impl AsRef<Path>) -> LoaderResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        atomic_write_with(path, |file| {
            use std::io::Write;
            file.write_all(&json)
        })?;
        debug!(path = %path.display(), docs = self.len(), "index saved");
        Ok(())
    }

    /// Insert or replace the document for `record`'s object
    pub fn upsert(&mut self, record: &EventLogRecord) {
        self.docs.entry(record.entity_type.clone()).or_default().insert(
            record.entity_id,
            IndexedDoc {
                action: record.action,
                log_id: record.log_id,
                indexed_at: chrono::Utc::now().timestamp(),
            },
        );
    }

    /// Drop a document. Returns whether it was present.
    pub fn delete(&mut self, entity_type: &str, entity_id: i64) -> bool {
        let Some(by_id) = self.docs.get_mut(entity_type) else {
            return false;
        };
        let removed = by_id.remove(&entity_id).is_some();
        if by_id.is_empty() {
            self.docs.remove(entity_type);
        }
        removed
    }

    pub fn get(&self, entity_type: &str, entity_id: i64) -> Option<&IndexedDoc> {
        self.docs.get(entity_type)?.get(&entity_id)
    }

    pub fn contains(&self, entity_type: &str, entity_id: i64) -> bool {
        self.get(entity_type, entity_id).is_some()
    }

    /// Ids indexed for a type, ascending
    pub fn get_by_type(&self, entity_type: &str) -> Vec<i64> {
        self.docs
            .get(entity_type)
            .map(|by_id| by_id.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.docs.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            doc_count: self.len(),
            type_count: self.docs.len(),
        }
    }
}

impl IndexSink for TextIndex {
    fn index(&mut self, record: &EventLogRecord) -> SinkResult<()> {
        self.upsert(record);
        Ok(())
    }

    fn remove(&mut self, record: &EventLogRecord) -> SinkResult<()> {
        self.delete(&record.entity_type, record.entity_id);
        Ok(())
    }

    fn flush(&mut self) -> SinkResult<()> {
        if let Some(path) = &self.path {
            self.save(path)?;
        }
        Ok(())
    }
}
