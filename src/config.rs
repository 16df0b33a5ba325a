//! Indexer configuration
//!
//! Defaults, overridden by a JSON file and then by `EVENTLOG_*` environment
//! variables. The file is `EVENTLOG_CONFIG` if set, otherwise `indexer.json`
//! in the data directory. Relative paths resolve against the working
//! directory.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LoaderError, LoaderResult};
use crate::loader::{
    available_memory_bytes, scale_window, DEFAULT_BATCH_SIZE, DEFAULT_LOADER_KEY, DEFAULT_WINDOW,
    ENTRY_BYTES, MAX_MEMORY_FRACTION,
};
use crate::types::{Action, EntityRef};

/// Settings file looked up in the data directory
pub const SETTINGS_FILE: &str = "indexer.json";

/// Which loader feeds the indexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderMode {
    /// Resume from the stored watermark
    #[default]
    Persistent,
    /// Walk the whole log in bounded scans
    AllEvents,
    /// Synthesize updates from domain tables
    AllEntities,
    /// Windowed, deduplicating queue
    Queue,
}

impl FromStr for LoaderMode {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "persistent" => Ok(LoaderMode::Persistent),
            "all_events" => Ok(LoaderMode::AllEvents),
            "all_entities" => Ok(LoaderMode::AllEntities),
            "queue" => Ok(LoaderMode::Queue),
            other => Err(LoaderError::InvalidConfig(format!(
                "unknown loader mode: {other}"
            ))),
        }
    }
}

/// Settings for [`EventLogQueue`](crate::loader::EventLogQueue)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Requested rows per window, before memory scaling
    pub window: usize,
    pub max_memory_fraction: f64,
    pub entry_bytes: u64,
    /// Entity types to fetch; empty means `IndexerConfig::entity_types`
    pub types: Vec<String>,
    pub actions: Vec<Action>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_memory_fraction: MAX_MEMORY_FRACTION,
            entry_bytes: ENTRY_BYTES,
            types: Vec::new(),
            actions: vec![Action::Insert, Action::Update, Action::Reindex],
        }
    }
}

impl QueueConfig {
    /// Window capped to the memory budget for `available_bytes`
    pub fn window_for(&self, available_bytes: Option<u64>) -> usize {
        scale_window(
            self.window,
            available_bytes,
            self.max_memory_fraction,
            self.entry_bytes,
        )
    }

    /// Window capped to the memory available on this host
    pub fn effective_window(&self) -> usize {
        self.window_for(available_memory_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub data_dir: PathBuf,
    pub batch_size: usize,
    pub loader_key: String,
    pub excluded_types: Vec<String>,
    pub poll_interval_ms: u64,
    pub mode: LoaderMode,
    pub queue: QueueConfig,
    /// Types walked by the all-entities loader
    pub entity_types: Vec<String>,
    /// Objects to reindex at startup
    pub reindex: Vec<EntityRef>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            batch_size: DEFAULT_BATCH_SIZE,
            loader_key: DEFAULT_LOADER_KEY.to_string(),
            excluded_types: Vec::new(),
            poll_interval_ms: 1000,
            mode: LoaderMode::default(),
            queue: QueueConfig::default(),
            entity_types: Vec::new(),
            reindex: Vec::new(),
        }
    }
}

impl IndexerConfig {
    /// Read a JSON config file, or defaults if it does not exist
    pub fn load(path: impl AsRef<Path>) -> LoaderResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Settings file overridden by environment variables
    pub fn from_env() -> LoaderResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with variables read through `lookup`
    pub fn from_lookup<F>(lookup: F) -> LoaderResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = match lookup("EVENTLOG_CONFIG") {
            Some(path) => resolve_dir(&path),
            None => lookup("EVENTLOG_DATA_DIR")
                .map(|dir| resolve_dir(&dir))
                .unwrap_or_else(|| Self::default().data_dir)
                .join(SETTINGS_FILE),
        };
        let mut config = Self::load(&path)?;
        config.apply_env(&lookup)?;
        Ok(config)
    }

    /// Apply `EVENTLOG_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> LoaderResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("EVENTLOG_DATA_DIR") {
            self.data_dir = resolve_dir(&dir);
        }
        if let Some(value) = lookup("EVENTLOG_BATCH_SIZE") {
            self.batch_size = parse_number("EVENTLOG_BATCH_SIZE", &value)?;
        }
        if let Some(key) = lookup("EVENTLOG_LOADER_KEY") {
            self.loader_key = key;
        }
        if let Some(mode) = lookup("EVENTLOG_MODE") {
            self.mode = mode.parse()?;
        }
        if let Some(value) = lookup("EVENTLOG_POLL_MS") {
            self.poll_interval_ms = parse_number("EVENTLOG_POLL_MS", &value)?;
        }
        if let Some(value) = lookup("EVENTLOG_EXCLUDE") {
            self.excluded_types = split_list(&value);
        }
        if let Some(value) = lookup("EVENTLOG_TYPES") {
            self.entity_types = split_list(&value);
        }
        if let Some(value) = lookup("EVENTLOG_REINDEX") {
            self.reindex = split_list(&value)
                .iter()
                .map(|s| {
                    EntityRef::parse(s).ok_or_else(|| {
                        LoaderError::InvalidConfig(format!("expected Type:id, got {s}"))
                    })
                })
                .collect::<LoaderResult<_>>()?;
        }
        self.validate()
    }

    /// Reject settings no loader can run with
    pub fn validate(&self) -> LoaderResult<()> {
        if self.batch_size == 0 {
            return Err(LoaderError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.loader_key.trim().is_empty() {
            return Err(LoaderError::InvalidConfig(
                "loader key must not be empty".to_string(),
            ));
        }
        match self.mode {
            LoaderMode::AllEntities if self.entity_types.is_empty() => Err(
                LoaderError::InvalidConfig("all_entities mode needs entity types".to_string()),
            ),
            LoaderMode::Queue if self.queue_types().is_empty() => Err(
                LoaderError::InvalidConfig("queue mode needs entity types".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Types the queue fetches
    pub fn queue_types(&self) -> &[String] {
        if self.queue.types.is_empty() {
            &self.entity_types
        } else {
            &self.queue.types
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    pub fn entities_path(&self) -> PathBuf {
        self.data_dir.join("entities.jsonl")
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("index.json")
    }
}

fn resolve_dir(dir: &str) -> PathBuf {
    let path = PathBuf::from(dir);
    if path.is_absolute() {
        return path;
    }
    env::current_dir()
        .map(|cwd| cwd.join(&path))
        .unwrap_or(path)
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> LoaderResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| LoaderError::InvalidConfig(format!("{name} is not a number: {value}")))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
