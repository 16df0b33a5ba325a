//! Integration tests for the event log loaders

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use eventlog_indexer::backlog::EventBacklog;
use eventlog_indexer::error::LoaderResult;
use eventlog_indexer::loader::{
    AllEntitiesPseudoLogLoader, AllEntitiesPseudoQuery, AllEventsLogLoader, AllEventsQuery,
    PersistentEventLogLoader, PersistentLogQuery, DEFAULT_LOADER_KEY,
};
use eventlog_indexer::storage::{
    ConfigStore, EventLogSource, MemoryConfigStore, MemoryEntityTable, MemoryEventLog,
};
use eventlog_indexer::types::{Action, EventLogRecord};

fn scenario_log() -> Arc<MemoryEventLog> {
    let log = Arc::new(MemoryEventLog::new());
    log.append("Image", 42, Action::Insert);
    log.append("Image", 42, Action::Update);
    log.append("Dataset", 7, Action::Insert);
    log
}

fn persistent(
    log: &Arc<MemoryEventLog>,
    store: &Arc<MemoryConfigStore>,
) -> PersistentEventLogLoader {
    let query = PersistentLogQuery::new(log.clone(), store.clone());
    PersistentEventLogLoader::new(query, Arc::new(EventBacklog::new()))
}

fn drain_batch(loader: &mut PersistentEventLogLoader) -> Vec<EventLogRecord> {
    loader.batch().map(|r| r.unwrap()).collect()
}

#[test]
fn test_end_to_end_scan() {
    let log = scenario_log();
    let store = Arc::new(MemoryConfigStore::new());
    let mut loader = persistent(&log, &store);

    assert!(loader.has_next().unwrap());
    assert_eq!(loader.next().unwrap().log_id, Some(1));
    assert_eq!(store.get(DEFAULT_LOADER_KEY).unwrap(), Some(1));

    assert!(loader.has_next().unwrap());
    let second = loader.next().unwrap();
    assert_eq!(second, EventLogRecord::new(2, "Image", 42, Action::Update));

    assert!(loader.has_next().unwrap());
    assert_eq!(loader.next().unwrap().entity_type, "Dataset");
    assert_eq!(store.get(DEFAULT_LOADER_KEY).unwrap(), Some(3));

    assert!(!loader.has_next().unwrap());
    assert!(!loader.has_next().unwrap());
    assert_eq!(store.get(DEFAULT_LOADER_KEY).unwrap(), Some(3));
    assert_eq!(loader.more().unwrap(), 0);
}

#[test]
fn test_backlog_served_next_batch() {
    let log = scenario_log();
    let store = Arc::new(MemoryConfigStore::new());
    let mut loader = persistent(&log, &store);

    // Mid-batch
    assert!(loader.has_next().unwrap());
    assert_eq!(loader.next().unwrap().log_id, Some(1));
    assert!(loader.add_event_log("Image", 99).unwrap());

    // The current batch keeps scanning the log
    let rest: Vec<Option<i64>> = drain_batch(&mut loader).iter().map(|r| r.log_id).collect();
    assert_eq!(rest, vec![Some(2), Some(3)]);

    // Next batch: backlog first
    assert!(loader.has_next().unwrap());
    assert_eq!(loader.next().unwrap(), EventLogRecord::reindex("Image", 99));
    assert!(!loader.has_next().unwrap());

    log.append("Image", 5, Action::Delete);
    assert_eq!(drain_batch(&mut loader).len(), 1);
}

#[test]
fn test_backlog_preempts_log_records() {
    let log = scenario_log();
    let store = Arc::new(MemoryConfigStore::new());
    let mut loader = persistent(&log, &store).with_batch_size(3);

    // Batch of at most two records
    assert_eq!(drain_batch(&mut loader).len(), 2);
    loader.add_event_log("Image", 99).unwrap();

    let next = drain_batch(&mut loader);
    assert_eq!(next, vec![EventLogRecord::reindex("Image", 99)]);

    let next = drain_batch(&mut loader);
    assert_eq!(next[0].log_id, Some(3));
}

#[test]
fn test_resume_after_restart() {
    let log = scenario_log();
    let store = Arc::new(MemoryConfigStore::new());

    {
        let mut loader = persistent(&log, &store);
        assert!(loader.has_next().unwrap());
        loader.next().unwrap();
        assert!(loader.has_next().unwrap());
        loader.next().unwrap();
    }
    assert_eq!(store.get(DEFAULT_LOADER_KEY).unwrap(), Some(2));

    let mut restarted = persistent(&log, &store);
    assert!(restarted.has_next().unwrap());
    assert_eq!(restarted.next().unwrap().log_id, Some(3));
}

#[test]
fn test_first_run_initializes_once() {
    let log = scenario_log();
    let store = Arc::new(MemoryConfigStore::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let query = PersistentLogQuery::new(log.clone(), store.clone())
        .with_key("first-run")
        .with_initializer(move |log: &dyn EventLogSource| -> LoaderResult<Option<i64>> {
            counter.fetch_add(1, Ordering::SeqCst);
            // Start after the first record
            Ok(log.next_after(-1)?.and_then(|r| r.log_id))
        });
    let mut loader = PersistentEventLogLoader::new(query, Arc::new(EventBacklog::new()));

    let ids: Vec<Option<i64>> = loader.batch().map(|r| r.unwrap().log_id).collect();
    assert_eq!(ids, vec![Some(2), Some(3)]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.get("first-run").unwrap(), Some(3));
}

#[test]
fn test_watermark_monotonic() {
    let log = Arc::new(MemoryEventLog::new());
    let store = Arc::new(MemoryConfigStore::new());
    let mut loader = persistent(&log, &store).with_batch_size(10);

    let mut last = -1;
    for round in 0..5 {
        for id in 0..round {
            log.append("Image", id, Action::Update);
        }
        for record in loader.batch() {
            record.unwrap();
            let current = store.get(DEFAULT_LOADER_KEY).unwrap().unwrap_or(-1);
            assert!(current >= last);
            last = current;
        }
    }
    assert_eq!(last, log.len() as i64);
}

#[test]
fn test_all_events_loader() {
    let log = scenario_log();
    let mut loader = AllEventsLogLoader::new(
        AllEventsQuery::starting_after(log.clone(), 1),
        Arc::new(EventBacklog::new()),
    );

    let ids: Vec<Option<i64>> = loader.batch().map(|r| r.unwrap().log_id).collect();
    assert_eq!(ids, vec![Some(2), Some(3)]);

    log.append("Image", 1, Action::Insert);
    assert!(loader.has_next().unwrap());
    assert_eq!(loader.next().unwrap().log_id, Some(4));
}

#[test]
fn test_all_entities_loader() {
    let table = Arc::new(MemoryEntityTable::new());
    table.insert("Project", 3);
    table.insert("Image", 8);
    table.insert("Image", 4);

    let query = AllEntitiesPseudoQuery::new(table, ["Image", "Project"]);
    let mut loader = AllEntitiesPseudoLogLoader::new(query, Arc::new(EventBacklog::new()));
    assert_eq!(loader.more().unwrap(), 2);

    let records: Vec<String> = loader.batch().map(|r| r.unwrap().to_string()).collect();
    assert_eq!(
        records,
        vec![
            "EventLog[-] Image:4 UPDATE",
            "EventLog[-] Image:8 UPDATE",
            "EventLog[-] Project:3 UPDATE",
        ]
    );
    assert_eq!(loader.more().unwrap(), 0);
}

#[test]
fn test_reindex_from_other_threads() {
    let log = Arc::new(MemoryEventLog::new());
    let store = Arc::new(MemoryConfigStore::new());
    let mut loader = persistent(&log, &store);
    let backlog = Arc::clone(loader.backlog());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let backlog = Arc::clone(&backlog);
            // Every thread requests the same ids
            thread::spawn(move || {
                for id in 0..25 {
                    backlog.add(&EventLogRecord::reindex("Image", id)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(backlog.len(), 25);

    let drained: Vec<EventLogRecord> = loader.batch().map(|r| r.unwrap()).collect();
    assert_eq!(drained.len(), 25);
    assert!(backlog.is_empty());
}
