//! Column encodings shared by the repositories.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use actrack_core::error::ActrackError;
use actrack_core::types::EntityRef;

/// Entity id column value. `''` stands for a kind-only reference.
pub(crate) fn encode_id(entity: &EntityRef) -> &str {
    entity.id.as_deref().unwrap_or("")
}

pub(crate) fn decode_entity(kind: String, id: String) -> EntityRef {
    if id.is_empty() {
        EntityRef::kind_only(kind)
    } else {
        EntityRef::new(kind, id)
    }
}

pub(crate) fn encode_ts(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn decode_ts(millis: i64) -> Result<DateTime<Utc>, ActrackError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| ActrackError::Storage(format!("Invalid timestamp: {}", millis)))
}

pub(crate) fn decode_uuid(s: &str) -> Result<Uuid, ActrackError> {
    Uuid::parse_str(s).map_err(|e| ActrackError::Storage(format!("Invalid id '{}': {}", s, e)))
}
