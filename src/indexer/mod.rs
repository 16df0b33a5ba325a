//! Indexing loop
//!
//! Connects a loader (behind the [`Feed`] trait) to an [`IndexSink`] and
//! drives it on a timer:
//!
//! - `feed`: the loader interface the driver works against
//! - `sink`: consumers of records
//! - `text_index`: in-memory index used by the binary
//! - `driver`: the periodic task

mod driver;
mod feed;
mod sink;
mod text_index;

pub use driver::{DriverExit, DriverStats, IndexerDriver};
pub use feed::Feed;
pub use sink::{IndexSink, SinkResult};
pub use text_index::{IndexStats, IndexedDoc, TextIndex};

use std::sync::Arc;

use tracing::info;

use crate::backlog::EventBacklog;
use crate::config::{IndexerConfig, LoaderMode};
use crate::error::LoaderResult;
use crate::loader::{
    AllEntitiesPseudoQuery, AllEventsQuery, EventLogLoader, EventLogQueue, PersistentLogQuery,
};
use crate::storage::{ConfigStore, EntityTable, EventLogSource, PartitionSource};

/// Build the loader selected by `config.mode`
pub fn build_feed<L>(
    config: &IndexerConfig,
    log: Arc<L>,
    entities: Arc<dyn EntityTable>,
    store: Arc<dyn ConfigStore>,
) -> LoaderResult<Box<dyn Feed>>
where
    L: EventLogSource + PartitionSource + 'static,
{
    config.validate()?;
    let backlog = Arc::new(EventBacklog::new());

    let feed: Box<dyn Feed> = match config.mode {
        LoaderMode::Persistent => {
            let query = PersistentLogQuery::new(log, store).with_key(config.loader_key.clone());
            Box::new(
                EventLogLoader::new(query, backlog)
                    .with_batch_size(config.batch_size)
                    .with_excludes(config.excluded_types.iter().cloned()),
            )
        }
        LoaderMode::AllEvents => Box::new(
            EventLogLoader::new(AllEventsQuery::new(log), backlog)
                .with_batch_size(config.batch_size)
                .with_excludes(config.excluded_types.iter().cloned()),
        ),
        LoaderMode::AllEntities => {
            let query = AllEntitiesPseudoQuery::new(entities, config.entity_types.iter().cloned());
            Box::new(
                EventLogLoader::new(query, backlog)
                    .with_batch_size(config.batch_size)
                    .with_excludes(config.excluded_types.iter().cloned()),
            )
        }
        LoaderMode::Queue => Box::new(
            EventLogQueue::new(
                log,
                store,
                config.queue_types().iter().cloned(),
                &config.queue.actions,
            )
            .with_window(config.queue.effective_window())
            .with_batch_size(config.batch_size)
            .with_excludes(config.excluded_types.iter().cloned()),
        ),
    };

    info!(mode = ?config.mode, loader = %feed.id(), batch_size = config.batch_size, "feed built");
    Ok(feed)
}
