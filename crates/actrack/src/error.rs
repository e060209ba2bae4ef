//! Error types for the action engine.

use actrack_core::error::ActrackError;
use actrack_core::types::EntityRef;

/// An action that could not be grouped or persisted during a flush.
///
/// Other actions of the same flush are not affected.
#[derive(Debug, Clone, serde::Serialize, thiserror::Error)]
#[error("Failed to flush '{verb}' by {actor}: {reason}")]
pub struct FlushFailure {
    pub verb: String,
    pub actor: EntityRef,
    pub reason: String,
}

impl FlushFailure {
    pub fn new(verb: impl Into<String>, actor: EntityRef, error: &ActrackError) -> Self {
        Self {
            verb: verb.into(),
            actor,
            reason: error.to_string(),
        }
    }
}
