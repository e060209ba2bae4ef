//! Group engine.
//!
//! Runs at flush time for each drained action. The action is folded into a
//! later sibling of the same flush, or into a stored action inside the
//! grouping window, or persisted as a new record.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use actrack_core::config::GroupingWindow;
use actrack_core::descriptor::ActionDescriptor;
use actrack_core::error::Result;
use actrack_core::store::{ActionRecord, ActionStore, NewAction, RecordUpdate};
use actrack_core::types::{ActionId, Attr, EntitySet};
use actrack_core::value::merge_data;

use crate::handler::ActionHandler;
use crate::queue::QueuedAction;

/// Anything exposing the monitored many-valued attributes.
pub trait ManyValued {
    fn many_valued(&self, attr: Attr) -> &EntitySet;
}

impl ManyValued for ActionDescriptor {
    fn many_valued(&self, attr: Attr) -> &EntitySet {
        ActionDescriptor::many_valued(self, attr)
    }
}

impl ManyValued for ActionRecord {
    fn many_valued(&self, attr: Attr) -> &EntitySet {
        ActionRecord::many_valued(self, attr)
    }
}

/// Number of monitored attributes whose sets differ between `a` and `b`.
pub fn differing_attrs(a: &dyn ManyValued, b: &dyn ManyValued) -> usize {
    Attr::ALL
        .iter()
        .filter(|attr| a.many_valued(**attr) != b.many_valued(**attr))
        .count()
}

/// Default grouping predicate: at most half of the monitored attributes
/// differ. With targets and related, one of the two may differ.
pub fn default_group_predicate(descriptor: &ActionDescriptor, candidate: &dyn ManyValued) -> bool {
    2 * differing_attrs(descriptor, candidate) <= Attr::ALL.len()
}

/// Terminal state of a drained action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Merged into the sibling at this offset among the remaining entries.
    GroupedIntoSibling(usize),
    /// Merged into a stored action.
    GroupedIntoStored(ActionId),
    /// Persisted as a new action.
    PersistedNew(ActionId),
}

/// Window that applies to `descriptor`, given the configured one.
///
/// `can_group = false` disables grouping, a per-call delay replaces the
/// configured window.
pub fn effective_window(descriptor: &ActionDescriptor, configured: GroupingWindow) -> GroupingWindow {
    if !descriptor.can_group {
        return GroupingWindow::Disabled;
    }
    match descriptor.grouping_delay {
        Some(seconds) => GroupingWindow::from_delay(seconds),
        None => configured,
    }
}

fn similar(handler: &dyn ActionHandler, descriptor: &ActionDescriptor, candidate: &dyn ManyValued) -> bool {
    match handler.group_predicate() {
        Some(predicate) => predicate(descriptor, candidate),
        None => default_group_predicate(descriptor, candidate),
    }
}

fn within(window: GroupingWindow, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    match window {
        GroupingWindow::Disabled => false,
        GroupingWindow::QueueOnly => true,
        GroupingWindow::Within(delay) => (a - b).abs() <= delay,
    }
}

/// Whether `descriptor` can be grouped into the queued `sibling`.
pub fn sibling_matches(
    handler: &dyn ActionHandler,
    descriptor: &ActionDescriptor,
    sibling: &ActionDescriptor,
    window: GroupingWindow,
) -> bool {
    sibling.can_group
        && sibling.verb == descriptor.verb
        && sibling.actor == descriptor.actor
        && sibling.actor.db == descriptor.actor.db
        && within(window, sibling.timestamp, descriptor.timestamp)
        && similar(handler, descriptor, sibling)
}

/// Group one drained action, or persist it.
///
/// `siblings` are the entries drained after this one and not processed yet.
pub fn group_or_create<S>(
    store: &S,
    handler: &dyn ActionHandler,
    descriptor: &ActionDescriptor,
    siblings: &mut [QueuedAction],
    configured: GroupingWindow,
) -> Result<GroupOutcome>
where
    S: ActionStore + ?Sized,
{
    let window = effective_window(descriptor, configured);

    if window != GroupingWindow::Disabled {
        for (offset, sibling) in siblings.iter_mut().enumerate() {
            if sibling_matches(handler, descriptor, &sibling.descriptor, window) {
                sibling.descriptor.absorb(descriptor);
                debug!(verb = %descriptor.verb, actor = %descriptor.actor, "Action grouped into queued sibling");
                return Ok(GroupOutcome::GroupedIntoSibling(offset));
            }
        }
    }

    if let GroupingWindow::Within(delay) = window {
        let from = descriptor
            .timestamp
            .checked_sub_signed(delay)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        // A second lookup covers a match deleted between query and update.
        for _ in 0..2 {
            let record = match find_stored(store, handler, descriptor, from)? {
                Some(record) => record,
                None => break,
            };
            if merge_into_stored(store, &record, descriptor)? {
                debug!(verb = %descriptor.verb, action_id = %record.id, "Action grouped into stored action");
                return Ok(GroupOutcome::GroupedIntoStored(record.id));
            }
            debug!(action_id = %record.id, "Stored action vanished while grouping");
        }
    }

    let id = store.create_record(&NewAction::from(descriptor.clone()))?;
    info!(verb = %descriptor.verb, action_id = %id, "Action recorded");
    Ok(GroupOutcome::PersistedNew(id))
}

fn find_stored<S>(
    store: &S,
    handler: &dyn ActionHandler,
    descriptor: &ActionDescriptor,
    from: DateTime<Utc>,
) -> Result<Option<ActionRecord>>
where
    S: ActionStore + ?Sized,
{
    let ids = store.query_by_actor_verb_window(
        &descriptor.actor,
        &descriptor.verb,
        from,
        descriptor.timestamp,
    )?;
    for id in ids {
        if let Some(record) = store.get_record(id)? {
            if similar(handler, descriptor, &record) {
                return Ok(Some(record));
            }
        }
    }
    Ok(None)
}

/// Extend a stored action with `descriptor`: unions its sets, merges data
/// the stored action does not have yet, keeps the higher level.
fn merge_into_stored<S>(store: &S, record: &ActionRecord, descriptor: &ActionDescriptor) -> Result<bool>
where
    S: ActionStore + ?Sized,
{
    let mut data = record.data.clone();
    merge_data(&mut data, &descriptor.data);

    let union = |attr: Attr| -> EntitySet {
        record
            .many_valued(attr)
            .union(descriptor.many_valued(attr))
            .cloned()
            .collect()
    };

    let update = RecordUpdate {
        level: record.level.max(descriptor.level),
        data,
        targets: union(Attr::Targets),
        related: union(Attr::Related),
    };
    store.update_record(record.id, &update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::VerbHandler;
    use actrack_core::types::{EntityRef, Level};
    use actrack_core::value::DataValue;
    use actrack_storage::{ActionRepository, Database};
    use chrono::{Duration, TimeZone};
    use std::cell::{Cell, RefCell};
    use std::sync::Arc;

    fn user() -> EntityRef {
        EntityRef::new("auth.user", 1)
    }

    fn project(id: u32) -> EntityRef {
        EntityRef::new("app.project", id)
    }

    fn task(id: u32) -> EntityRef {
        EntityRef::new("app.task", id)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn created(targets: &[EntityRef], related: &[EntityRef], ts: DateTime<Utc>) -> ActionDescriptor {
        let mut d = ActionDescriptor::new(user(), "created", ts, Level::INFO);
        d.targets = targets.iter().cloned().collect();
        d.related = related.iter().cloned().collect();
        d
    }

    fn queued(descriptor: ActionDescriptor) -> QueuedAction {
        QueuedAction {
            handler: Arc::new(VerbHandler::new("created")),
            descriptor,
        }
    }

    fn repo() -> ActionRepository {
        ActionRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn minute() -> GroupingWindow {
        GroupingWindow::Within(Duration::seconds(60))
    }

    #[test]
    fn test_default_predicate_threshold() {
        let base = created(&[task(1)], &[project(1)], t0());
        let other_targets = created(&[task(2)], &[project(1)], t0());
        let other_related = created(&[task(1)], &[project(2)], t0());
        let all_different = created(&[task(2)], &[project(2)], t0());

        assert_eq!(differing_attrs(&base, &base), 0);
        assert!(default_group_predicate(&base, &other_targets));
        assert!(default_group_predicate(&base, &other_related));
        assert_eq!(differing_attrs(&base, &all_different), 2);
        assert!(!default_group_predicate(&base, &all_different));
    }

    #[test]
    fn test_effective_window() {
        let mut d = created(&[], &[], t0());
        assert_eq!(effective_window(&d, minute()), minute());

        d.grouping_delay = Some(-1);
        assert_eq!(effective_window(&d, minute()), GroupingWindow::Disabled);

        d.grouping_delay = Some(0);
        assert_eq!(effective_window(&d, minute()), GroupingWindow::QueueOnly);

        d.grouping_delay = Some(300);
        d.can_group = false;
        assert_eq!(effective_window(&d, minute()), GroupingWindow::Disabled);
    }

    #[test]
    fn test_sibling_window_boundary() {
        let handler = VerbHandler::new("created");
        let d = created(&[task(1)], &[], t0());
        let exact = created(&[task(1)], &[], t0() + Duration::seconds(60));
        let late = created(&[task(1)], &[], t0() + Duration::seconds(61));

        assert!(sibling_matches(&handler, &d, &exact, minute()));
        assert!(!sibling_matches(&handler, &d, &late, minute()));
        assert!(sibling_matches(&handler, &d, &late, GroupingWindow::QueueOnly));
        assert!(!sibling_matches(&handler, &d, &exact, GroupingWindow::Disabled));
    }

    #[test]
    fn test_sibling_must_share_verb_and_actor() {
        let handler = VerbHandler::new("created");
        let d = created(&[task(1)], &[], t0());

        let mut other_verb = d.clone();
        other_verb.verb = "deleted".to_string();
        let mut other_actor = d.clone();
        other_actor.actor = EntityRef::new("auth.user", 2);
        let mut opted_out = d.clone();
        opted_out.can_group = false;

        assert!(!sibling_matches(&handler, &d, &other_verb, minute()));
        assert!(!sibling_matches(&handler, &d, &other_actor, minute()));
        assert!(!sibling_matches(&handler, &d, &opted_out, minute()));
    }

    #[test]
    fn test_groups_into_first_matching_sibling() {
        let store = repo();
        let handler = VerbHandler::new("created");
        let mut d = created(&[task(1)], &[project(1)], t0());
        d.data.insert("n".into(), DataValue::int(1));
        let mut siblings = vec![
            queued(created(&[project(1)], &[], t0())),
            queued(created(&[task(2)], &[project(1)], t0())),
        ];

        let outcome = group_or_create(&store, &handler, &d, &mut siblings, minute()).unwrap();

        assert_eq!(outcome, GroupOutcome::GroupedIntoSibling(1));
        let merged = &siblings[1].descriptor;
        assert_eq!(merged.targets, [task(1), task(2)].into_iter().collect());
        assert_eq!(merged.data["n"], DataValue::int(1));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_groups_into_stored_action() {
        let store = repo();
        let handler = VerbHandler::new("created");
        let mut first = created(&[task(1)], &[project(1)], t0());
        first.data.insert("name".into(), DataValue::text("stored"));
        let stored_id = match group_or_create(&store, &handler, &first, &mut [], minute()).unwrap() {
            GroupOutcome::PersistedNew(id) => id,
            other => panic!("unexpected outcome {:?}", other),
        };

        let mut second = created(&[task(2)], &[project(1)], t0() + Duration::seconds(60));
        second.level = Level::WARNING;
        second.data.insert("name".into(), DataValue::text("new"));
        second.data.insert("extra".into(), DataValue::from(true));

        let outcome = group_or_create(&store, &handler, &second, &mut [], minute()).unwrap();
        assert_eq!(outcome, GroupOutcome::GroupedIntoStored(stored_id));

        let record = store.get_record(stored_id).unwrap().unwrap();
        assert_eq!(record.targets, [task(1), task(2)].into_iter().collect());
        assert_eq!(record.level, Level::WARNING);
        assert_eq!(record.data["name"], DataValue::text("stored"));
        assert!(record.data.contains_key("extra"));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_stored_action_outside_window_is_ignored() {
        let store = repo();
        let handler = VerbHandler::new("created");
        let first = created(&[task(1)], &[], t0());
        group_or_create(&store, &handler, &first, &mut [], minute()).unwrap();

        let late = created(&[task(1)], &[], t0() + Duration::seconds(61));
        let outcome = group_or_create(&store, &handler, &late, &mut [], minute()).unwrap();

        assert!(matches!(outcome, GroupOutcome::PersistedNew(_)));
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_queue_only_window_skips_storage() {
        let store = repo();
        let handler = VerbHandler::new("created");
        let d = created(&[task(1)], &[], t0());
        group_or_create(&store, &handler, &d, &mut [], GroupingWindow::QueueOnly).unwrap();
        group_or_create(&store, &handler, &d, &mut [], GroupingWindow::QueueOnly).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_disabled_window_always_creates() {
        let store = repo();
        let handler = VerbHandler::new("created");
        let d = created(&[task(1)], &[], t0());
        let mut siblings = vec![queued(d.clone())];

        let outcome =
            group_or_create(&store, &handler, &d, &mut siblings, GroupingWindow::Disabled).unwrap();
        assert!(matches!(outcome, GroupOutcome::PersistedNew(_)));
    }

    #[test]
    fn test_custom_predicate_overrides_default() {
        let store = repo();
        let strict = VerbHandler::new("created").group_with(|d, c| differing_attrs(d, c) == 0);
        let d = created(&[task(1)], &[project(1)], t0());
        let mut siblings = vec![queued(created(&[task(2)], &[project(1)], t0()))];

        let outcome = group_or_create(&store, &strict, &d, &mut siblings, minute()).unwrap();
        assert!(matches!(outcome, GroupOutcome::PersistedNew(_)));
    }

    #[test]
    fn test_sibling_must_share_database_hint() {
        let handler = VerbHandler::new("created");
        let d = created(&[task(1)], &[], t0());
        let mut archived = d.clone();
        archived.actor = archived.actor.in_db("archive");

        assert!(!sibling_matches(&handler, &d, &archived, minute()));
        assert!(!sibling_matches(&handler, &archived, &d, minute()));
        assert!(sibling_matches(&handler, &archived, &archived.clone(), minute()));
    }

    #[test]
    fn test_window_start_before_earliest_date() {
        let store = repo();
        let handler = VerbHandler::new("created");
        let d = created(&[task(1)], &[], DateTime::<Utc>::MIN_UTC);
        let century = GroupingWindow::from_delay(actrack_core::config::MAX_GROUPING_DELAY_SECS);

        let first = group_or_create(&store, &handler, &d, &mut [], century).unwrap();
        let stored_id = match first {
            GroupOutcome::PersistedNew(id) => id,
            other => panic!("unexpected outcome {:?}", other),
        };
        let second = group_or_create(&store, &handler, &d, &mut [], century).unwrap();
        assert_eq!(second, GroupOutcome::GroupedIntoStored(stored_id));
    }

    /// In-memory store whose first `misses` updates find their record
    /// deleted.
    struct VanishingStore {
        records: RefCell<Vec<ActionRecord>>,
        misses: Cell<usize>,
        updates: Cell<usize>,
    }

    impl VanishingStore {
        fn new(misses: usize) -> Self {
            Self {
                records: RefCell::new(Vec::new()),
                misses: Cell::new(misses),
                updates: Cell::new(0),
            }
        }

        fn len(&self) -> usize {
            self.records.borrow().len()
        }
    }

    impl ActionStore for VanishingStore {
        fn create_record(&self, action: &NewAction) -> Result<ActionId> {
            let id = ActionId::new();
            self.records.borrow_mut().push(ActionRecord {
                id,
                actor: action.actor.clone(),
                verb: action.verb.clone(),
                timestamp: action.timestamp,
                level: action.level,
                targets: action.targets.clone(),
                related: action.related.clone(),
                data: action.data.clone(),
            });
            Ok(id)
        }

        fn update_record(&self, id: ActionId, update: &RecordUpdate) -> Result<bool> {
            self.updates.set(self.updates.get() + 1);
            let mut records = self.records.borrow_mut();
            if self.misses.get() > 0 {
                self.misses.set(self.misses.get() - 1);
                records.retain(|r| r.id != id);
                return Ok(false);
            }
            match records.iter_mut().find(|r| r.id == id) {
                Some(record) => {
                    record.level = update.level;
                    record.data = update.data.clone();
                    record.targets = update.targets.clone();
                    record.related = update.related.clone();
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        fn query_by_actor_verb_window(
            &self,
            actor: &EntityRef,
            verb: &str,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<ActionId>> {
            Ok(self
                .records
                .borrow()
                .iter()
                .filter(|r| r.actor == *actor && r.verb == verb)
                .filter(|r| r.timestamp >= from && r.timestamp <= to)
                .map(|r| r.id)
                .collect())
        }

        fn get_record(&self, id: ActionId) -> Result<Option<ActionRecord>> {
            Ok(self.records.borrow().iter().find(|r| r.id == id).cloned())
        }

        fn get_many_valued(&self, id: ActionId, attr: Attr) -> Result<EntitySet> {
            Ok(self
                .get_record(id)?
                .map(|r| r.many_valued(attr).clone())
                .unwrap_or_default())
        }

        fn set_many_valued(&self, id: ActionId, attr: Attr, entities: &EntitySet) -> Result<()> {
            if let Some(record) = self.records.borrow_mut().iter_mut().find(|r| r.id == id) {
                match attr {
                    Attr::Targets => record.targets = entities.clone(),
                    Attr::Related => record.related = entities.clone(),
                }
            }
            Ok(())
        }
    }

    fn stored(store: &VanishingStore, descriptor: &ActionDescriptor) -> ActionId {
        store
            .create_record(&NewAction::from(descriptor.clone()))
            .unwrap()
    }

    #[test]
    fn test_deleted_match_falls_back_to_next_stored_action() {
        let store = VanishingStore::new(1);
        let handler = VerbHandler::new("created");
        stored(&store, &created(&[task(1)], &[project(1)], t0()));
        let survivor = stored(&store, &created(&[task(2)], &[project(1)], t0()));

        let d = created(&[task(3)], &[project(1)], t0() + Duration::seconds(10));
        let outcome = group_or_create(&store, &handler, &d, &mut [], minute()).unwrap();

        assert_eq!(outcome, GroupOutcome::GroupedIntoStored(survivor));
        assert_eq!(store.updates.get(), 2);
        let record = store.get_record(survivor).unwrap().unwrap();
        assert_eq!(record.targets, [task(2), task(3)].into_iter().collect());
    }

    #[test]
    fn test_two_deleted_matches_create_new_action() {
        let store = VanishingStore::new(2);
        let handler = VerbHandler::new("created");
        stored(&store, &created(&[task(1)], &[project(1)], t0()));
        stored(&store, &created(&[task(2)], &[project(1)], t0()));
        stored(&store, &created(&[task(4)], &[project(1)], t0()));

        let d = created(&[task(3)], &[project(1)], t0() + Duration::seconds(10));
        let outcome = group_or_create(&store, &handler, &d, &mut [], minute()).unwrap();

        let id = match outcome {
            GroupOutcome::PersistedNew(id) => id,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(store.updates.get(), 2);
        // Two matches vanished, the third is left alone.
        assert_eq!(store.len(), 2);
        assert_eq!(store.get_record(id).unwrap().unwrap().targets, [task(3)].into_iter().collect());
    }
}
