//! Event log record types
//!
//! An [`EventLogRecord`] names one change to a persisted domain object.
//! Records read from the event log carry a monotonic `log_id`; records
//! manufactured in-process (reindex requests, pseudo-log walks) do not.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LoaderError, LoaderResult};

/// Log id used where a record is not backed by a persisted log row
pub const UNSET_LOG_ID: i64 = -1;

/// Kind of change recorded in the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    /// A new object was saved
    Insert,
    /// An existing object was modified
    Update,
    /// An object was deleted
    Delete,
    /// Explicit request to index the object again
    Reindex,
}

impl Action {
    /// All actions, in declaration order
    pub const ALL: [Action; 4] = [Action::Insert, Action::Update, Action::Delete, Action::Reindex];

    /// Upper-case name as stored in the log
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Insert => "INSERT",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
            Action::Reindex => "REINDEX",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Action::Insert),
            "UPDATE" => Ok(Action::Update),
            "DELETE" => Ok(Action::Delete),
            "REINDEX" => Ok(Action::Reindex),
            other => Err(LoaderError::InvalidRecord(format!(
                "unknown action '{}'",
                other
            ))),
        }
    }
}

/// One change to a persisted domain object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventLogRecord {
    /// Monotonic log id; `None` for synthetic records
    #[serde(rename = "logId", default, skip_serializing_if = "Option::is_none")]
    pub log_id: Option<i64>,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(rename = "entityId")]
    pub entity_id: i64,
    pub action: Action,
}

impl EventLogRecord {
    /// Record backed by a persisted log row
    pub fn new(log_id: i64, entity_type: impl Into<String>, entity_id: i64, action: Action) -> Self {
        Self {
            log_id: Some(log_id),
            entity_type: entity_type.into(),
            entity_id,
            action,
        }
    }

    /// Record that exists only in-process
    pub fn synthetic(entity_type: impl Into<String>, entity_id: i64, action: Action) -> Self {
        Self {
            log_id: None,
            entity_type: entity_type.into(),
            entity_id,
            action,
        }
    }

    /// Synthetic REINDEX record for a known entity
    pub fn reindex(entity_type: impl Into<String>, entity_id: i64) -> Self {
        Self::synthetic(entity_type, entity_id, Action::Reindex)
    }

    /// True when no persisted log row backs this record
    pub fn is_synthetic(&self) -> bool {
        self.log_id.is_none()
    }

    /// Log id, or [`UNSET_LOG_ID`] for synthetic records
    pub fn log_id_or_unset(&self) -> i64 {
        self.log_id.unwrap_or(UNSET_LOG_ID)
    }

    /// Reject records whose identifying fields are missing
    pub fn validate(&self) -> LoaderResult<()> {
        if self.entity_type.trim().is_empty() {
            return Err(LoaderError::InvalidRecord(format!(
                "record for entity id {} has no entity type",
                self.entity_id
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for EventLogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.log_id {
            Some(id) => write!(
                f,
                "EventLog[{}] {}:{} {}",
                id, self.entity_type, self.entity_id, self.action
            ),
            None => write!(
                f,
                "EventLog[-] {}:{} {}",
                self.entity_type, self.entity_id, self.action
            ),
        }
    }
}

/// Row returned by a partition (window) fetch
///
/// `skipped_count` counts raw log rows already folded into this one by the
/// storage query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRow {
    #[serde(rename = "logId")]
    pub log_id: i64,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(rename = "entityId")]
    pub entity_id: i64,
    pub action: Action,
    #[serde(rename = "skippedCount", default)]
    pub skipped_count: u64,
}

impl LogRow {
    /// Row for a single, uncollapsed log record
    pub fn new(log_id: i64, entity_type: impl Into<String>, entity_id: i64, action: Action) -> Self {
        Self {
            log_id,
            entity_type: entity_type.into(),
            entity_id,
            action,
            skipped_count: 0,
        }
    }
}
