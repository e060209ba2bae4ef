//! Trackers, feeds and unread state.
//!
//! A user tracks an entity (or a whole entity kind) to follow the actions
//! concerning it. The feed of a user gathers the actions followed by all
//! their trackers; actions reaching a tracker after it was last refreshed
//! are marked unread for its user.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use actrack_core::config::ActrackConfig;
use actrack_core::descriptor::LogFields;
use actrack_core::error::{ActrackError, Result};
use actrack_core::store::{ActionRecord, Tracker};
use actrack_core::types::{ActionId, EntityRef};
use actrack_storage::{
    resolve_db_alias, ActionRepository, Database, StoreRouter, TrackerRepository, UnreadRepository,
};

use crate::recorder::ActionLog;

/// Verb of the action logged when a user starts tracking entities.
pub const STARTED_TRACKING: &str = "started tracking";
/// Verb of the action logged when a user stops tracking entities.
pub const STOPPED_TRACKING: &str = "stopped tracking";

/// Options of [`TrackingService::track`].
#[derive(Debug, Clone, Default)]
pub struct TrackOptions {
    /// Verbs to follow. Empty follows every verb.
    pub verbs: BTreeSet<String>,
    /// Follow only actions where the tracked entity is the actor. Left
    /// unchanged on existing trackers when `None`; new trackers default to
    /// `true`.
    pub actor_only: Option<bool>,
    /// Log a `started tracking` action for newly tracked entities.
    pub log: bool,
    /// Database alias overriding the one inferred from the entities.
    pub using: Option<String>,
}

/// Options of [`TrackingService::untrack`].
#[derive(Debug, Clone, Default)]
pub struct UntrackOptions {
    /// Verbs to stop following. Empty removes the trackers altogether.
    pub verbs: BTreeSet<String>,
    /// Log a `stopped tracking` action for removed trackers.
    pub log: bool,
    pub using: Option<String>,
}

/// Tracker management, feeds and unread state over SQLite databases.
#[derive(Debug)]
pub struct TrackingService {
    databases: StoreRouter<Arc<Database>>,
    config: Arc<ActrackConfig>,
}

impl TrackingService {
    pub fn new(databases: StoreRouter<Arc<Database>>, config: Arc<ActrackConfig>) -> Self {
        Self { databases, config }
    }

    fn database<'a, I>(&self, using: Option<&str>, hints: I) -> Result<&Arc<Database>>
    where
        I: IntoIterator<Item = &'a EntityRef>,
    {
        let alias = resolve_db_alias(using, hints)?;
        self.databases.route(alias.as_deref())
    }

    fn ensure_user(&self, entity: &EntityRef) -> Result<()> {
        if entity.kind == self.config.general.user_kind && !entity.is_kind_only() {
            Ok(())
        } else {
            Err(ActrackError::NotAUser(entity.to_string()))
        }
    }

    // ========================================================================
    // Tracking
    // ========================================================================

    /// Make `user` track `to_track`, or change how it tracks them.
    ///
    /// Returns the trackers of `user` on `to_track`.
    pub fn track(
        &self,
        user: &EntityRef,
        to_track: &[EntityRef],
        options: &TrackOptions,
        session: Option<&mut dyn ActionLog>,
    ) -> Result<Vec<Tracker>> {
        let db = self.database(
            options.using.as_deref(),
            std::iter::once(user).chain(to_track),
        )?;
        let repo = TrackerRepository::new(Arc::clone(db));
        let now = Utc::now();

        let mut trackers = Vec::new();
        let mut newly_tracked = Vec::new();
        for entity in to_track.iter().cloned().collect::<BTreeSet<_>>() {
            match repo.find(user, &entity)? {
                Some(mut tracker) => {
                    let actor_only = options.actor_only.unwrap_or(tracker.actor_only);
                    if tracker.verbs != options.verbs || tracker.actor_only != actor_only {
                        tracker.verbs = options.verbs.clone();
                        tracker.actor_only = actor_only;
                        repo.update(&tracker)?;
                        debug!(user = %user, tracked = %entity, "Tracker updated");
                    }
                    trackers.push(tracker);
                }
                None => {
                    let mut tracker = Tracker::new(user.clone(), entity.clone(), now);
                    tracker.verbs = options.verbs.clone();
                    tracker.actor_only = options.actor_only.unwrap_or(true);
                    repo.insert(&tracker)?;
                    info!(user = %user, tracked = %entity, "Tracker created");
                    newly_tracked.push(entity);
                    trackers.push(tracker);
                }
            }
        }

        if options.log && !newly_tracked.is_empty() {
            if let Some(session) = session {
                session.log(
                    user.clone(),
                    STARTED_TRACKING,
                    &LogFields::new().targets(newly_tracked),
                )?;
            }
        }
        Ok(trackers)
    }

    /// Stop `user` from tracking `to_untrack`, entirely or for some verbs.
    ///
    /// A tracker left without verbs is removed. Trackers following every
    /// verb are only removed by an untrack without verbs. Returns the
    /// entities no longer tracked.
    pub fn untrack(
        &self,
        user: &EntityRef,
        to_untrack: &[EntityRef],
        options: &UntrackOptions,
        session: Option<&mut dyn ActionLog>,
    ) -> Result<Vec<EntityRef>> {
        let db = self.database(
            options.using.as_deref(),
            std::iter::once(user).chain(to_untrack),
        )?;
        let repo = TrackerRepository::new(Arc::clone(db));

        let mut untracked = Vec::new();
        for entity in to_untrack.iter().cloned().collect::<BTreeSet<_>>() {
            let mut tracker = match repo.find(user, &entity)? {
                Some(tracker) => tracker,
                None => continue,
            };

            if !options.verbs.is_empty() {
                if tracker.verbs.is_empty() {
                    continue;
                }
                tracker.verbs = tracker.verbs.difference(&options.verbs).cloned().collect();
                if !tracker.verbs.is_empty() {
                    repo.update(&tracker)?;
                    continue;
                }
            }

            repo.delete(tracker.id)?;
            info!(user = %user, tracked = %entity, "Tracker removed");
            untracked.push(tracker.tracked);
        }

        if options.log && !untracked.is_empty() {
            if let Some(session) = session {
                session.log(
                    user.clone(),
                    STOPPED_TRACKING,
                    &LogFields::new().targets(untracked.clone()),
                )?;
            }
        }
        Ok(untracked)
    }

    /// Trackers following `entity`.
    pub fn tracking(&self, entity: &EntityRef, using: Option<&str>) -> Result<Vec<Tracker>> {
        let db = self.database(using, [entity])?;
        TrackerRepository::new(Arc::clone(db)).tracking(entity)
    }

    /// Users tracking `entity`.
    pub fn users(&self, entity: &EntityRef, using: Option<&str>) -> Result<Vec<EntityRef>> {
        let users: BTreeSet<EntityRef> = self
            .tracking(entity, using)?
            .into_iter()
            .map(|t| t.user)
            .collect();
        Ok(users.into_iter().collect())
    }

    /// Trackers owned by `user`.
    pub fn owned(&self, user: &EntityRef, using: Option<&str>) -> Result<Vec<Tracker>> {
        self.ensure_user(user)?;
        let db = self.database(using, [user])?;
        TrackerRepository::new(Arc::clone(db)).owned(user)
    }

    /// Entities tracked by `user`, optionally restricted to some kinds and
    /// to trackers following one of `verbs`.
    pub fn tracked(
        &self,
        user: &EntityRef,
        kinds: &[&str],
        verbs: &BTreeSet<String>,
        using: Option<&str>,
    ) -> Result<BTreeSet<EntityRef>> {
        Ok(self
            .owned(user, using)?
            .into_iter()
            .filter(|t| kinds.is_empty() || kinds.contains(&t.tracked.kind.as_str()))
            .filter(|t| verbs.is_empty() || t.verbs.is_empty() || !t.verbs.is_disjoint(verbs))
            .map(|t| t.tracked)
            .collect())
    }

    // ========================================================================
    // Feed and unread state
    // ========================================================================

    /// Actions followed by the trackers of `user`, newest first.
    ///
    /// With `include_own`, the actions of `user` are included as well. The
    /// unread state of every tracker is refreshed first.
    pub fn feed(
        &self,
        user: &EntityRef,
        include_own: bool,
        using: Option<&str>,
    ) -> Result<Vec<ActionRecord>> {
        let trackers = self.owned(user, using)?;
        if trackers.is_empty() && !include_own {
            return Ok(Vec::new());
        }

        let db = self.database(using, [user])?;
        let actions = ActionRepository::new(Arc::clone(db));

        let mut feed = BTreeMap::new();
        for tracker in &trackers {
            self.refresh_unread(db, tracker)?;
            for action in actions.tracked_by(tracker)? {
                feed.insert(action.id, action);
            }
        }
        if include_own {
            for action in actions.as_actor(user)? {
                feed.insert(action.id, action);
            }
        }

        let mut feed: Vec<ActionRecord> = feed.into_values().collect();
        feed.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(feed)
    }

    /// Mark unread for the tracker's user the readable actions the tracker
    /// followed since it was last refreshed. Returns the actions marked.
    pub fn update_unread(&self, tracker: &Tracker, using: Option<&str>) -> Result<Vec<ActionId>> {
        let db = self.database(using, [&tracker.user, &tracker.tracked])?;
        self.refresh_unread(db, tracker)
    }

    fn refresh_unread(&self, db: &Arc<Database>, tracker: &Tracker) -> Result<Vec<ActionId>> {
        if !self.config.tracking.track_unread {
            return Ok(Vec::new());
        }
        let readable = self.config.readable_level()?;
        let now = Utc::now();

        let ids: Vec<ActionId> = ActionRepository::new(Arc::clone(db))
            .tracked_by(tracker)?
            .into_iter()
            .filter(|a| a.timestamp >= tracker.last_updated && a.level >= readable)
            .map(|a| a.id)
            .collect();

        UnreadRepository::new(Arc::clone(db)).mark_unread(&tracker.user, &ids)?;
        TrackerRepository::new(Arc::clone(db)).touch(tracker.id, now)?;
        debug!(tracker = %tracker.id, unread = ids.len(), "Unread actions collected");
        Ok(ids)
    }

    pub fn is_unread_for(&self, user: &EntityRef, action: ActionId, using: Option<&str>) -> Result<bool> {
        let db = self.database(using, [user])?;
        UnreadRepository::new(Arc::clone(db)).is_unread(user, action)
    }

    /// Unread flags of `actions` for `user`, in order.
    pub fn bulk_is_unread_for(
        &self,
        user: &EntityRef,
        actions: &[ActionId],
        using: Option<&str>,
    ) -> Result<Vec<bool>> {
        let db = self.database(using, [user])?;
        let unread = UnreadRepository::new(Arc::clone(db)).unread_ids(user)?;
        Ok(actions.iter().map(|id| unread.contains(id)).collect())
    }

    /// Mark an action read for `user`. Returns whether it was unread.
    ///
    /// Only marks it when `auto_read` is configured or `force` is set.
    pub fn mark_read_for(
        &self,
        user: &EntityRef,
        action: ActionId,
        force: bool,
        using: Option<&str>,
    ) -> Result<bool> {
        Ok(self
            .bulk_mark_read_for(user, &[action], force, using)?
            .first()
            .copied()
            .unwrap_or(false))
    }

    /// Mark actions read for `user`. Returns, in order, whether each action
    /// was unread before the call.
    pub fn bulk_mark_read_for(
        &self,
        user: &EntityRef,
        actions: &[ActionId],
        force: bool,
        using: Option<&str>,
    ) -> Result<Vec<bool>> {
        let db = self.database(using, [user])?;
        let repo = UnreadRepository::new(Arc::clone(db));
        let unread = repo.unread_ids(user)?;
        let flags = actions.iter().map(|id| unread.contains(id)).collect();

        if self.config.tracking.auto_read || force {
            repo.mark_read(user, actions)?;
        }
        Ok(flags)
    }
}
