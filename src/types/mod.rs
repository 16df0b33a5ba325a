//! Data types for the event log feed
//!
//! This module contains the records handed to the indexer and the identity
//! capability implemented by domain objects.

mod entity;
mod event;

pub use entity::{EntityRef, EntityType};
pub use event::{Action, EventLogRecord, LogRow, UNSET_LOG_ID};
