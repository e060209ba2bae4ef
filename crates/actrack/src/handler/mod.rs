//! Verb handlers and the handler registry.
//!
//! A handler is the verb-keyed bundle of behavior attached to actions: a
//! default severity level, pairwise combinators consulted before an action
//! is queued, and an optional override of the grouping predicate used at
//! flush time.

pub mod default;
pub mod registry;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use actrack_core::descriptor::ActionDescriptor;
use actrack_core::types::Level;

use crate::group::ManyValued;

pub use default::DefaultHandler;
pub use registry::HandlerRegistry;

/// Decides whether the action of the declaring handler absorbs another
/// queued action.
///
/// Called with the declaring handler's action first and the other action
/// second. Returning `true` merges the other action into the first one.
pub type Combinator = Arc<dyn Fn(&ActionDescriptor, &ActionDescriptor) -> bool + Send + Sync>;

/// Decides whether a pending action is similar enough to a candidate (a
/// queued sibling or a stored record) to be grouped into it.
pub type GroupPredicate = Arc<dyn Fn(&ActionDescriptor, &dyn ManyValued) -> bool + Send + Sync>;

/// Behavior attached to the actions of one verb.
pub trait ActionHandler: Send + Sync + fmt::Debug {
    /// The verb this handler is registered under.
    fn verb(&self) -> &str;

    /// Default level of the actions of this verb. `None` uses the
    /// configured default level.
    fn level(&self) -> Option<Level> {
        None
    }

    /// Combinator declared for actions of `other_verb`, if any.
    fn combinator(&self, _other_verb: &str) -> Option<&Combinator> {
        None
    }

    /// Custom grouping predicate. `None` uses the default predicate.
    fn group_predicate(&self) -> Option<&GroupPredicate> {
        None
    }
}

/// Handler assembled from closures.
///
/// ```ignore
/// let handler = VerbHandler::new("my_all_inclusive_action")
///     .level(Level::WARNING)
///     .combine_with("my_included_action", |_, _| true);
/// ```
#[derive(Clone)]
pub struct VerbHandler {
    verb: String,
    level: Option<Level>,
    combinators: HashMap<String, Combinator>,
    group_predicate: Option<GroupPredicate>,
}

impl VerbHandler {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            level: None,
            combinators: HashMap::new(),
            group_predicate: None,
        }
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Declare how actions of this verb combine with queued actions of
    /// `other_verb`.
    pub fn combine_with<F>(mut self, other_verb: impl Into<String>, combinator: F) -> Self
    where
        F: Fn(&ActionDescriptor, &ActionDescriptor) -> bool + Send + Sync + 'static,
    {
        self.combinators
            .insert(other_verb.into(), Arc::new(combinator));
        self
    }

    /// Replace the default grouping predicate.
    pub fn group_with<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ActionDescriptor, &dyn ManyValued) -> bool + Send + Sync + 'static,
    {
        self.group_predicate = Some(Arc::new(predicate));
        self
    }
}

impl ActionHandler for VerbHandler {
    fn verb(&self) -> &str {
        &self.verb
    }

    fn level(&self) -> Option<Level> {
        self.level
    }

    fn combinator(&self, other_verb: &str) -> Option<&Combinator> {
        self.combinators.get(other_verb)
    }

    fn group_predicate(&self) -> Option<&GroupPredicate> {
        self.group_predicate.as_ref()
    }
}

impl fmt::Debug for VerbHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut combines: Vec<&str> = self.combinators.keys().map(String::as_str).collect();
        combines.sort_unstable();
        f.debug_struct("VerbHandler")
            .field("verb", &self.verb)
            .field("level", &self.level)
            .field("combines_with", &combines)
            .field("custom_grouping", &self.group_predicate.is_some())
            .finish()
    }
}
