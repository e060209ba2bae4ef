//! SQLite-backed action repository.
//!
//! Implements the [`ActionStore`] adapter used by the grouping engine and the
//! entity-scoped action queries used by feeds.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use actrack_core::error::ActrackError;
use actrack_core::store::{ActionRecord, ActionStore, NewAction, RecordUpdate, Tracker};
use actrack_core::types::{ActionId, Attr, EntityRef, EntitySet, Level};
use actrack_core::value::DataMap;

use crate::codec::{decode_entity, decode_ts, decode_uuid, encode_id, encode_ts};
use crate::db::Database;

const ACTION_COLUMNS: &str = "id, actor_kind, actor_id, verb, timestamp, level, data";

/// Repository for persisted actions.
#[derive(Clone, Debug)]
pub struct ActionRepository {
    db: Arc<Database>,
}

impl ActionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// All actions where `entity` is the actor, a target or a related object.
    pub fn for_entity(&self, entity: &EntityRef) -> Result<Vec<ActionRecord>, ActrackError> {
        self.select_where(
            "(actor_kind = ?1 AND (?2 = '' OR actor_id = ?2))
             OR EXISTS (SELECT 1 FROM action_entities ae
                        WHERE ae.action_id = actions.id
                          AND ae.entity_kind = ?1 AND (?2 = '' OR ae.entity_id = ?2))",
            entity,
        )
    }

    /// All actions where `entity` is the actor.
    pub fn as_actor(&self, entity: &EntityRef) -> Result<Vec<ActionRecord>, ActrackError> {
        self.select_where("actor_kind = ?1 AND (?2 = '' OR actor_id = ?2)", entity)
    }

    /// All actions where `entity` is one of the targets.
    pub fn as_target(&self, entity: &EntityRef) -> Result<Vec<ActionRecord>, ActrackError> {
        self.as_attr(entity, Attr::Targets)
    }

    /// All actions where `entity` is one of the related objects.
    pub fn as_related(&self, entity: &EntityRef) -> Result<Vec<ActionRecord>, ActrackError> {
        self.as_attr(entity, Attr::Related)
    }

    fn as_attr(&self, entity: &EntityRef, attr: Attr) -> Result<Vec<ActionRecord>, ActrackError> {
        let clause = format!(
            "EXISTS (SELECT 1 FROM action_entities ae
                     WHERE ae.action_id = actions.id AND ae.attr = '{}'
                       AND ae.entity_kind = ?1 AND (?2 = '' OR ae.entity_id = ?2))",
            attr.as_str()
        );
        self.select_where(&clause, entity)
    }

    /// All actions followed by a tracker, newest first.
    pub fn tracked_by(&self, tracker: &Tracker) -> Result<Vec<ActionRecord>, ActrackError> {
        let actions = if tracker.actor_only {
            self.as_actor(&tracker.tracked)?
        } else {
            self.for_entity(&tracker.tracked)?
        };
        Ok(actions
            .into_iter()
            .filter(|a| tracker.follows_verb(&a.verb))
            .collect())
    }

    /// Count all persisted actions.
    pub fn count(&self) -> Result<u64, ActrackError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM actions", [], |row| row.get(0))
                .map_err(|e| ActrackError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Delete an action and, through the cascade, its associations.
    pub fn delete(&self, id: ActionId) -> Result<bool, ActrackError> {
        self.db.with_conn(|conn| {
            let n = conn
                .execute(
                    "DELETE FROM actions WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                )
                .map_err(|e| ActrackError::Storage(format!("Failed to delete action: {}", e)))?;
            Ok(n > 0)
        })
    }

    fn select_where(
        &self,
        clause: &str,
        entity: &EntityRef,
    ) -> Result<Vec<ActionRecord>, ActrackError> {
        let sql = format!(
            "SELECT {} FROM actions WHERE {} ORDER BY timestamp DESC, created_at DESC",
            ACTION_COLUMNS, clause
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ActrackError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![entity.kind, encode_id(entity)],
                    |row| Ok(row_to_head(row)),
                )
                .map_err(|e| ActrackError::Storage(e.to_string()))?;

            let mut heads = Vec::new();
            for row in rows {
                heads.push(row.map_err(|e| ActrackError::Storage(e.to_string()))??);
            }

            heads
                .into_iter()
                .map(|head| head.into_record(conn))
                .collect()
        })
    }
}

impl ActionStore for ActionRepository {
    fn create_record(&self, action: &NewAction) -> Result<ActionId, ActrackError> {
        let id = ActionId::new();
        let data = serde_json::to_string(&action.data)?;

        self.db.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO actions (id, actor_kind, actor_id, verb, timestamp, level, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.to_string(),
                    action.actor.kind,
                    encode_id(&action.actor),
                    action.verb,
                    encode_ts(action.timestamp),
                    action.level.0,
                    data,
                ],
            )
            .map_err(|e| ActrackError::Storage(format!("Failed to create action: {}", e)))?;

            for attr in Attr::ALL {
                insert_entities(tx, id, attr, action.many_valued(attr))?;
            }
            Ok(())
        })?;

        debug!(action_id = %id, verb = %action.verb, "Action record created");
        Ok(id)
    }

    fn update_record(&self, id: ActionId, update: &RecordUpdate) -> Result<bool, ActrackError> {
        let data = serde_json::to_string(&update.data)?;

        self.db.with_transaction(|tx| {
            let n = tx
                .execute(
                    "UPDATE actions SET level = ?2, data = ?3 WHERE id = ?1",
                    rusqlite::params![id.to_string(), update.level.0, data],
                )
                .map_err(|e| ActrackError::Storage(format!("Failed to update action: {}", e)))?;
            if n == 0 {
                return Ok(false);
            }

            for attr in Attr::ALL {
                replace_entities(tx, id, attr, update.many_valued(attr))?;
            }
            Ok(true)
        })
    }

    fn query_by_actor_verb_window(
        &self,
        actor: &EntityRef,
        verb: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ActionId>, ActrackError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM actions
                     WHERE actor_kind = ?1 AND actor_id = ?2 AND verb = ?3
                       AND timestamp >= ?4 AND timestamp <= ?5
                     ORDER BY timestamp ASC, created_at ASC",
                )
                .map_err(|e| ActrackError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(
                    rusqlite::params![
                        actor.kind,
                        encode_id(actor),
                        verb,
                        encode_ts(from),
                        encode_ts(to),
                    ],
                    |row| row.get::<_, String>(0),
                )
                .map_err(|e| ActrackError::Storage(e.to_string()))?;

            let mut ids = Vec::new();
            for row in rows {
                let id = row.map_err(|e| ActrackError::Storage(e.to_string()))?;
                ids.push(ActionId(decode_uuid(&id)?));
            }
            Ok(ids)
        })
    }

    fn get_record(&self, id: ActionId) -> Result<Option<ActionRecord>, ActrackError> {
        let sql = format!("SELECT {} FROM actions WHERE id = ?1", ACTION_COLUMNS);
        self.db.with_conn(|conn| {
            let head = conn
                .query_row(&sql, rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_head(row))
                })
                .optional()
                .map_err(|e| ActrackError::Storage(e.to_string()))?;

            match head {
                Some(head) => Ok(Some(head?.into_record(conn)?)),
                None => Ok(None),
            }
        })
    }

    fn get_many_valued(&self, id: ActionId, attr: Attr) -> Result<EntitySet, ActrackError> {
        self.db.with_conn(|conn| load_entities(conn, id, attr))
    }

    fn set_many_valued(
        &self,
        id: ActionId,
        attr: Attr,
        entities: &EntitySet,
    ) -> Result<(), ActrackError> {
        self.db
            .with_transaction(|tx| replace_entities(tx, id, attr, entities))
    }
}

// ============================================================================
// Helper functions for row-to-entity conversion.
// ============================================================================

/// Columns of an action row, before its associations are loaded.
struct ActionHead {
    id: ActionId,
    actor: EntityRef,
    verb: String,
    timestamp: DateTime<Utc>,
    level: Level,
    data: DataMap,
}

impl ActionHead {
    fn into_record(self, conn: &Connection) -> Result<ActionRecord, ActrackError> {
        let targets = load_entities(conn, self.id, Attr::Targets)?;
        let related = load_entities(conn, self.id, Attr::Related)?;
        Ok(ActionRecord {
            id: self.id,
            actor: self.actor,
            verb: self.verb,
            timestamp: self.timestamp,
            level: self.level,
            targets,
            related,
            data: self.data,
        })
    }
}

fn row_to_head(row: &rusqlite::Row<'_>) -> Result<ActionHead, ActrackError> {
    let storage = |e: rusqlite::Error| ActrackError::Storage(e.to_string());

    let id: String = row.get(0).map_err(storage)?;
    let actor_kind: String = row.get(1).map_err(storage)?;
    let actor_id: String = row.get(2).map_err(storage)?;
    let verb: String = row.get(3).map_err(storage)?;
    let timestamp: i64 = row.get(4).map_err(storage)?;
    let level: i32 = row.get(5).map_err(storage)?;
    let data: String = row.get(6).map_err(storage)?;

    Ok(ActionHead {
        id: ActionId(decode_uuid(&id)?),
        actor: decode_entity(actor_kind, actor_id),
        verb,
        timestamp: decode_ts(timestamp)?,
        level: Level(level),
        data: serde_json::from_str(&data)?,
    })
}

fn load_entities(conn: &Connection, id: ActionId, attr: Attr) -> Result<EntitySet, ActrackError> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT entity_kind, entity_id FROM action_entities
             WHERE action_id = ?1 AND attr = ?2",
        )
        .map_err(|e| ActrackError::Storage(e.to_string()))?;

    let rows = stmt
        .query_map(rusqlite::params![id.to_string(), attr.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| ActrackError::Storage(e.to_string()))?;

    let mut set = BTreeSet::new();
    for row in rows {
        let (kind, entity_id) = row.map_err(|e| ActrackError::Storage(e.to_string()))?;
        set.insert(decode_entity(kind, entity_id));
    }
    Ok(set)
}

fn insert_entities(
    conn: &Connection,
    id: ActionId,
    attr: Attr,
    entities: &EntitySet,
) -> Result<(), ActrackError> {
    for entity in entities {
        conn.execute(
            "INSERT OR IGNORE INTO action_entities (action_id, attr, entity_kind, entity_id)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id.to_string(), attr.as_str(), entity.kind, encode_id(entity)],
        )
        .map_err(|e| ActrackError::Storage(format!("Failed to store {}: {}", attr, e)))?;
    }
    Ok(())
}

fn replace_entities(
    conn: &Connection,
    id: ActionId,
    attr: Attr,
    entities: &EntitySet,
) -> Result<(), ActrackError> {
    conn.execute(
        "DELETE FROM action_entities WHERE action_id = ?1 AND attr = ?2",
        rusqlite::params![id.to_string(), attr.as_str()],
    )
    .map_err(|e| ActrackError::Storage(format!("Failed to clear {}: {}", attr, e)))?;
    insert_entities(conn, id, attr, entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actrack_core::value::DataValue;
    use chrono::{Duration, TimeZone};

    fn make_repo() -> ActionRepository {
        ActionRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn user(id: u32) -> EntityRef {
        EntityRef::new("auth.user", id)
    }

    fn project(id: u32) -> EntityRef {
        EntityRef::new("app.project", id)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn new_action(actor: EntityRef, verb: &str, ts: DateTime<Utc>) -> NewAction {
        NewAction {
            actor,
            verb: verb.to_string(),
            timestamp: ts,
            level: Level::INFO,
            targets: EntitySet::new(),
            related: EntitySet::new(),
            data: DataMap::new(),
        }
    }

    #[test]
    fn test_create_and_get_record() {
        let repo = make_repo();
        let mut action = new_action(user(1), "created", t0());
        action.targets.insert(project(1));
        action.related.insert(EntityRef::kind_only("app.task"));
        action.data.insert("name".into(), DataValue::text("alpha"));

        let id = repo.create_record(&action).unwrap();
        let record = repo.get_record(id).unwrap().unwrap();

        assert_eq!(record.actor, user(1));
        assert_eq!(record.verb, "created");
        assert_eq!(record.timestamp, t0());
        assert_eq!(record.targets, action.targets);
        assert_eq!(record.related, action.related);
        assert_eq!(record.data["name"], DataValue::text("alpha"));
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_get_missing_record() {
        let repo = make_repo();
        assert!(repo.get_record(ActionId::new()).unwrap().is_none());
    }

    #[test]
    fn test_update_record_replaces_sets_and_data() {
        let repo = make_repo();
        let mut action = new_action(user(1), "created", t0());
        action.targets.insert(project(1));
        let id = repo.create_record(&action).unwrap();

        let mut data = DataMap::new();
        data.insert("n".into(), DataValue::int(2));
        let update = RecordUpdate {
            level: Level::WARNING,
            data,
            targets: [project(1), project(2)].into_iter().collect(),
            related: [user(9)].into_iter().collect(),
        };
        assert!(repo.update_record(id, &update).unwrap());

        let record = repo.get_record(id).unwrap().unwrap();
        assert_eq!(record.level, Level::WARNING);
        assert_eq!(record.targets.len(), 2);
        assert_eq!(record.related.len(), 1);
        assert_eq!(record.data["n"], DataValue::int(2));
    }

    #[test]
    fn test_update_missing_record_returns_false() {
        let repo = make_repo();
        let update = RecordUpdate {
            level: Level::INFO,
            data: DataMap::new(),
            targets: [project(1)].into_iter().collect(),
            related: EntitySet::new(),
        };
        assert!(!repo.update_record(ActionId::new(), &update).unwrap());
    }

    #[test]
    fn test_query_window_is_inclusive() {
        let repo = make_repo();
        let early = repo.create_record(&new_action(user(1), "created", t0())).unwrap();
        let late = repo
            .create_record(&new_action(user(1), "created", t0() + Duration::seconds(60)))
            .unwrap();
        repo.create_record(&new_action(user(1), "deleted", t0())).unwrap();
        repo.create_record(&new_action(user(2), "created", t0())).unwrap();

        let ids = repo
            .query_by_actor_verb_window(&user(1), "created", t0(), t0() + Duration::seconds(60))
            .unwrap();
        assert_eq!(ids, vec![early, late]);

        let ids = repo
            .query_by_actor_verb_window(
                &user(1),
                "created",
                t0() + Duration::milliseconds(1),
                t0() + Duration::seconds(60),
            )
            .unwrap();
        assert_eq!(ids, vec![late]);
    }

    #[test]
    fn test_many_valued_get_and_set() {
        let repo = make_repo();
        let id = repo.create_record(&new_action(user(1), "created", t0())).unwrap();
        assert!(repo.get_many_valued(id, Attr::Targets).unwrap().is_empty());

        let set: EntitySet = [project(1), project(2)].into_iter().collect();
        repo.set_many_valued(id, Attr::Targets, &set).unwrap();
        assert_eq!(repo.get_many_valued(id, Attr::Targets).unwrap(), set);
        assert!(repo.get_many_valued(id, Attr::Related).unwrap().is_empty());
    }

    #[test]
    fn test_entity_scoped_queries() {
        let repo = make_repo();
        let mut as_target = new_action(user(1), "created", t0());
        as_target.targets.insert(project(1));
        let mut as_related = new_action(user(2), "commented", t0() + Duration::seconds(1));
        as_related.related.insert(project(1));
        let unrelated = new_action(user(3), "created", t0());

        let target_id = repo.create_record(&as_target).unwrap();
        let related_id = repo.create_record(&as_related).unwrap();
        repo.create_record(&unrelated).unwrap();

        let all: Vec<ActionId> = repo.for_entity(&project(1)).unwrap().iter().map(|a| a.id).collect();
        assert_eq!(all, vec![related_id, target_id]);

        let targets = repo.as_target(&project(1)).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, target_id);

        let related = repo.as_related(&project(1)).unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, related_id);

        assert_eq!(repo.as_actor(&user(3)).unwrap().len(), 1);
        assert_eq!(repo.as_actor(&EntityRef::kind_only("auth.user")).unwrap().len(), 3);
    }

    #[test]
    fn test_tracked_by_respects_actor_only_and_verbs() {
        let repo = make_repo();
        let mut by_project = new_action(project(1), "archived", t0());
        by_project.targets.insert(user(1));
        let mut on_project = new_action(user(1), "modified", t0());
        on_project.targets.insert(project(1));
        repo.create_record(&by_project).unwrap();
        repo.create_record(&on_project).unwrap();

        let mut tracker = Tracker::new(user(5), project(1), t0());
        assert_eq!(repo.tracked_by(&tracker).unwrap().len(), 1);

        tracker.actor_only = false;
        assert_eq!(repo.tracked_by(&tracker).unwrap().len(), 2);

        tracker.verbs.insert("modified".to_string());
        let followed = repo.tracked_by(&tracker).unwrap();
        assert_eq!(followed.len(), 1);
        assert_eq!(followed[0].verb, "modified");
    }

    #[test]
    fn test_delete_cascades() {
        let repo = make_repo();
        let mut action = new_action(user(1), "created", t0());
        action.targets.insert(project(1));
        let id = repo.create_record(&action).unwrap();

        assert!(repo.delete(id).unwrap());
        assert!(!repo.delete(id).unwrap());
        assert!(repo.get_many_valued(id, Attr::Targets).unwrap().is_empty());
    }
}
