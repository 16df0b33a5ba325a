//! Pseudo event log built from domain tables
//!
//! For bulk or initial indexing when there is no log to replay: each
//! configured type is walked one row at a time in id order and every row
//! becomes a synthetic UPDATE record.

use std::sync::Arc;

use tracing::debug;

use crate::error::LoaderResult;
use crate::storage::EntityTable;
use crate::types::{Action, EventLogRecord, UNSET_LOG_ID};

use super::LogQuery;

pub struct AllEntitiesPseudoQuery {
    table: Arc<dyn EntityTable>,
    types: Vec<String>,
    /// Index into `types` of the type being walked
    current: usize,
    /// Last id seen for the current type
    last_id: i64,
}

impl AllEntitiesPseudoQuery {
    pub fn new<I, S>(table: Arc<dyn EntityTable>, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table,
            types: types.into_iter().map(Into::into).collect(),
            current: 0,
            last_id: UNSET_LOG_ID,
        }
    }

    /// Type being walked, `None` once all are done
    pub fn current_type(&self) -> Option<&str> {
        self.types.get(self.current).map(String::as_str)
    }
}

impl LogQuery for AllEntitiesPseudoQuery {
    fn query(&mut self) -> LoaderResult<Option<EventLogRecord>> {
        while let Some(entity_type) = self.types.get(self.current) {
            match self.table.next_entity_after(entity_type, self.last_id)? {
                Some(id) => {
                    self.last_id = id;
                    return Ok(Some(EventLogRecord::synthetic(
                        entity_type.clone(),
                        id,
                        Action::Update,
                    )));
                }
                None => {
                    debug!(entity_type = %entity_type, "entity type exhausted");
                    self.current += 1;
                    self.last_id = UNSET_LOG_ID;
                }
            }
        }
        Ok(None)
    }

    /// Types left, including the one in progress
    fn more(&mut self) -> LoaderResult<i64> {
        Ok(self.types.len().saturating_sub(self.current) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryEntityTable;

    #[test]
    fn test_walks_types_in_order() {
        let table = Arc::new(MemoryEntityTable::new());
        table.insert("Image", 2);
        table.insert("Image", 1);
        table.insert("Dataset", 9);

        let mut query = AllEntitiesPseudoQuery::new(table, ["Image", "Project", "Dataset"]);
        assert_eq!(query.more().unwrap(), 3);

        let mut seen = Vec::new();
        while let Some(record) = query.query().unwrap() {
            assert!(record.is_synthetic());
            assert_eq!(record.action, Action::Update);
            seen.push((record.entity_type, record.entity_id));
        }

        assert_eq!(
            seen,
            vec![
                ("Image".to_string(), 1),
                ("Image".to_string(), 2),
                ("Dataset".to_string(), 9)
            ]
        );
        assert_eq!(query.more().unwrap(), 0);
        assert_eq!(query.current_type(), None);
    }

    #[test]
    fn test_more_counts_in_progress_type() {
        let table = Arc::new(MemoryEntityTable::new());
        table.insert("Image", 1);
        table.insert("Image", 2);
        table.insert("Dataset", 1);

        let mut query = AllEntitiesPseudoQuery::new(table, ["Image", "Dataset"]);
        query.query().unwrap();
        assert_eq!(query.current_type(), Some("Image"));
        assert_eq!(query.more().unwrap(), 2);
    }
}
