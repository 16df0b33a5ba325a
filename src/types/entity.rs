//! Domain object identity
//!
//! Indexing only needs to know which table a domain object lives in and its
//! id. Concrete domain types report their canonical type name themselves so
//! nothing has to look through proxies or wrappers to find it.

use serde::{Deserialize, Serialize};

/// Capability implemented by every indexable domain type
pub trait EntityType {
    /// Canonical type name, as stored in the event log
    fn entity_type(&self) -> &str;

    /// Id of this object
    fn entity_id(&self) -> i64;
}

/// Owned (type, id) pair naming one domain object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(rename = "entityId")]
    pub entity_id: i64,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: i64) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
        }
    }

    /// Capture the canonical identity of any domain object
    pub fn of(object: &dyn EntityType) -> Self {
        Self::new(object.entity_type(), object.entity_id())
    }

    /// Parse `Type:id`
    pub fn parse(s: &str) -> Option<Self> {
        let (entity_type, id) = s.trim().rsplit_once(':')?;
        let entity_type = entity_type.trim();
        if entity_type.is_empty() {
            return None;
        }
        let entity_id = id.trim().parse().ok()?;
        Some(Self::new(entity_type, entity_id))
    }
}

impl EntityType for EntityRef {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn entity_id(&self) -> i64 {
        self.entity_id
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}
