use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use actrack_core::config::ActrackConfig;
use actrack_core::error::{ActrackError, Result};
use actrack_core::types::Level;

use crate::handler::{ActionHandler, DefaultHandler};

/// Maps verbs to their handlers.
///
/// Populated once at startup, then shared read-only (usually behind an
/// `Arc`) by every session.
#[derive(Debug)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    fallback: Arc<dyn ActionHandler>,
    default_level: Level,
}

impl HandlerRegistry {
    /// Create an empty registry. Unregistered verbs resolve to a
    /// [`DefaultHandler`].
    pub fn new(default_level: Level) -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(DefaultHandler::default()),
            default_level,
        }
    }

    /// Build a registry from `handlers` and the `[grouping]` and `[levels]`
    /// configuration sections.
    ///
    /// Fails when a configured level or the configured default handler
    /// cannot be resolved.
    pub fn from_config<I>(config: &ActrackConfig, handlers: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn ActionHandler>>,
    {
        let mut registry = Self::new(config.default_level()?);
        for handler in handlers {
            registry.register(handler);
        }
        if let Some(verb) = &config.grouping.default_handler {
            registry.set_default_handler(verb)?;
        }
        Ok(registry)
    }

    /// Register a handler under its verb.
    ///
    /// A verb registered twice keeps the last handler; the replaced one is
    /// returned.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) -> Option<Arc<dyn ActionHandler>> {
        let verb = handler.verb().to_string();
        let replaced = self.handlers.insert(verb.clone(), handler);
        if replaced.is_some() {
            warn!(verb = %verb, "Handler registered twice, keeping the last one");
        } else {
            debug!(verb = %verb, "Handler registered");
        }
        replaced
    }

    /// Use the handler registered for `verb` for every unregistered verb.
    pub fn set_default_handler(&mut self, verb: &str) -> Result<()> {
        let handler = self.handlers.get(verb).cloned().ok_or_else(|| {
            ActrackError::Config(format!("default handler '{}' is not registered", verb))
        })?;
        self.fallback = handler;
        Ok(())
    }

    /// Handler for `verb`. Never fails: unregistered verbs get the default
    /// handler.
    pub fn resolve(&self, verb: &str) -> Arc<dyn ActionHandler> {
        self.handlers
            .get(verb)
            .unwrap_or(&self.fallback)
            .clone()
    }

    /// Level of the actions of `handler` when the caller gives none.
    pub fn default_level(&self, handler: &dyn ActionHandler) -> Level {
        handler.level().unwrap_or(self.default_level)
    }

    pub fn is_registered(&self, verb: &str) -> bool {
        self.handlers.contains_key(verb)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
