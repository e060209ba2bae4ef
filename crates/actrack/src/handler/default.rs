//! Fallback handler for verbs nobody registered.

use actrack_core::types::Level;

use crate::handler::ActionHandler;

/// Handler used when a verb has no registered handler and no default
/// handler is configured. Declares no combinators and groups with the
/// default predicate.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHandler {
    level: Option<Level>,
}

impl DefaultHandler {
    pub fn with_level(level: Level) -> Self {
        Self { level: Some(level) }
    }
}

impl ActionHandler for DefaultHandler {
    fn verb(&self) -> &str {
        ""
    }

    fn level(&self) -> Option<Level> {
        self.level
    }
}
