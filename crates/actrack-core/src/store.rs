//! Persistence adapter contract and persisted record types.
//!
//! The grouping engine only talks to storage through [`ActionStore`]. Every
//! write that touches a record and its many-valued associations is a single
//! call, so implementations can run it in one transaction.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::descriptor::ActionDescriptor;
use crate::error::Result;
use crate::types::{ActionId, Attr, EntityRef, EntitySet, Level, TrackerId};
use crate::value::DataMap;

/// A persisted action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: ActionId,
    pub actor: EntityRef,
    pub verb: String,
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub targets: EntitySet,
    pub related: EntitySet,
    pub data: DataMap,
}

impl ActionRecord {
    pub fn many_valued(&self, attr: Attr) -> &EntitySet {
        match attr {
            Attr::Targets => &self.targets,
            Attr::Related => &self.related,
        }
    }
}

/// Fields of an action about to be created.
#[derive(Clone, Debug, PartialEq)]
pub struct NewAction {
    pub actor: EntityRef,
    pub verb: String,
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub targets: EntitySet,
    pub related: EntitySet,
    pub data: DataMap,
}

impl From<ActionDescriptor> for NewAction {
    fn from(d: ActionDescriptor) -> Self {
        Self {
            actor: d.actor,
            verb: d.verb,
            timestamp: d.timestamp,
            level: d.level,
            targets: d.targets,
            related: d.related,
            data: d.data,
        }
    }
}

impl NewAction {
    pub fn many_valued(&self, attr: Attr) -> &EntitySet {
        match attr {
            Attr::Targets => &self.targets,
            Attr::Related => &self.related,
        }
    }
}

/// New state of an existing action after a merge.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordUpdate {
    pub level: Level,
    pub data: DataMap,
    pub targets: EntitySet,
    pub related: EntitySet,
}

impl RecordUpdate {
    pub fn many_valued(&self, attr: Attr) -> &EntitySet {
        match attr {
            Attr::Targets => &self.targets,
            Attr::Related => &self.related,
        }
    }
}

/// Backing store for persisted actions.
pub trait ActionStore {
    /// Create an action and its many-valued associations atomically.
    fn create_record(&self, action: &NewAction) -> Result<ActionId>;

    /// Replace level, data and many-valued sets of an action atomically.
    ///
    /// Returns `false` when the action no longer exists.
    fn update_record(&self, id: ActionId, update: &RecordUpdate) -> Result<bool>;

    /// Actions of `actor` with `verb` whose timestamp lies in `[from, to]`,
    /// oldest first.
    fn query_by_actor_verb_window(
        &self,
        actor: &EntityRef,
        verb: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ActionId>>;

    fn get_record(&self, id: ActionId) -> Result<Option<ActionRecord>>;

    fn get_many_valued(&self, id: ActionId, attr: Attr) -> Result<EntitySet>;

    fn set_many_valued(&self, id: ActionId, attr: Attr, entities: &EntitySet) -> Result<()>;
}

/// A user's subscription to the actions concerning an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tracker {
    pub id: TrackerId,
    pub user: EntityRef,
    pub tracked: EntityRef,
    /// Verbs of interest. Empty means every verb.
    pub verbs: BTreeSet<String>,
    /// Only follow actions where the tracked entity is the actor.
    pub actor_only: bool,
    /// Last time unread actions were collected for this tracker.
    pub last_updated: DateTime<Utc>,
}

impl Tracker {
    pub fn new(user: EntityRef, tracked: EntityRef, now: DateTime<Utc>) -> Self {
        Self {
            id: TrackerId::new(),
            user,
            tracked,
            verbs: BTreeSet::new(),
            actor_only: true,
            last_updated: now,
        }
    }

    pub fn follows_verb(&self, verb: &str) -> bool {
        self.verbs.is_empty() || self.verbs.contains(verb)
    }
}
