//! Event Log Indexer - Binary Entry Point
//!
//! Indexes the event log under `EVENTLOG_DATA_DIR` until Ctrl-C. The index
//! is saved after every productive tick and once more on the way out.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use eventlog_indexer::config::IndexerConfig;
use eventlog_indexer::indexer::{build_feed, IndexerDriver, TextIndex};
use eventlog_indexer::notify::{channels, ReindexRequest};
use eventlog_indexer::storage::{
    cleanup_temp_files, FileConfigStore, FileEntityTable, FileEventLog,
};
use eventlog_indexer::{telemetry, NAME, VERSION};

type MainResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> MainResult<()> {
    telemetry::init();

    let config = IndexerConfig::from_env()?;
    info!(
        name = NAME,
        version = VERSION,
        data_dir = %config.data_dir.display(),
        mode = ?config.mode,
        "starting"
    );

    std::fs::create_dir_all(&config.data_dir)?;
    let cleaned = cleanup_temp_files(&config.data_dir)?;
    if cleaned > 0 {
        warn!(cleaned, "removed temp files left by an interrupted write");
    }

    let log = Arc::new(FileEventLog::new(config.events_path()));
    let entities = Arc::new(FileEntityTable::new(config.entities_path()));
    let store = Arc::new(FileConfigStore::new(config.config_path()));
    let feed = build_feed(&config, log, entities, store)?;

    let index = TextIndex::open(config.index_path())?;
    info!(docs = index.len(), "index loaded");

    let (notifier, notifications) = channels();
    if !config.reindex.is_empty() {
        notifier.request_reindex(ReindexRequest::from(config.reindex.clone()));
    }

    let driver = IndexerDriver::new(feed, index, notifications)
        .with_poll_interval(config.poll_interval());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handle = tokio::spawn(driver.run(shutdown_rx));

    let exit = tokio::select! {
        exit = &mut handle => exit?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutdown requested");
            // Receiver is gone if the driver already stopped
            let _ = shutdown_tx.send(true);
            handle.await?
        }
    };
    exit.sink.save(config.index_path())?;
    info!(
        docs = exit.sink.len(),
        indexed = exit.stats.indexed,
        removed = exit.stats.removed,
        failed = exit.stats.failed,
        "index saved"
    );

    drop(notifier);
    match exit.error {
        Some(e) => {
            error!(error = %e, "indexer stopped on a fatal error");
            Err(e.into())
        }
        None => Ok(()),
    }
}
