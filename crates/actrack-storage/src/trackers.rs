//! Tracker persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use actrack_core::error::ActrackError;
use actrack_core::store::Tracker;
use actrack_core::types::{EntityRef, TrackerId};

use crate::codec::{decode_entity, decode_ts, decode_uuid, encode_id, encode_ts};
use crate::db::Database;

const TRACKER_COLUMNS: &str =
    "id, user_kind, user_id, tracked_kind, tracked_id, verbs, actor_only, last_updated";

/// Repository for trackers. A user tracks a given entity at most once.
#[derive(Clone, Debug)]
pub struct TrackerRepository {
    db: Arc<Database>,
}

impl TrackerRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new tracker.
    pub fn insert(&self, tracker: &Tracker) -> Result<(), ActrackError> {
        let verbs = serde_json::to_string(&tracker.verbs)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO trackers
                    (id, user_kind, user_id, tracked_kind, tracked_id, verbs, actor_only, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    tracker.id.to_string(),
                    tracker.user.kind,
                    encode_id(&tracker.user),
                    tracker.tracked.kind,
                    encode_id(&tracker.tracked),
                    verbs,
                    tracker.actor_only,
                    encode_ts(tracker.last_updated),
                ],
            )
            .map_err(|e| ActrackError::Storage(format!("Failed to insert tracker: {}", e)))?;
            Ok(())
        })
    }

    /// Update the verbs, scope and timestamp of an existing tracker.
    pub fn update(&self, tracker: &Tracker) -> Result<bool, ActrackError> {
        let verbs = serde_json::to_string(&tracker.verbs)?;
        self.db.with_conn(|conn| {
            let n = conn
                .execute(
                    "UPDATE trackers SET verbs = ?2, actor_only = ?3, last_updated = ?4
                     WHERE id = ?1",
                    rusqlite::params![
                        tracker.id.to_string(),
                        verbs,
                        tracker.actor_only,
                        encode_ts(tracker.last_updated),
                    ],
                )
                .map_err(|e| ActrackError::Storage(format!("Failed to update tracker: {}", e)))?;
            Ok(n > 0)
        })
    }

    /// Record that unread actions were collected for a tracker at `at`.
    pub fn touch(&self, id: TrackerId, at: DateTime<Utc>) -> Result<(), ActrackError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE trackers SET last_updated = ?2 WHERE id = ?1",
                rusqlite::params![id.to_string(), encode_ts(at)],
            )
            .map_err(|e| ActrackError::Storage(format!("Failed to touch tracker: {}", e)))?;
            Ok(())
        })
    }

    pub fn delete(&self, id: TrackerId) -> Result<bool, ActrackError> {
        self.db.with_conn(|conn| {
            let n = conn
                .execute(
                    "DELETE FROM trackers WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                )
                .map_err(|e| ActrackError::Storage(format!("Failed to delete tracker: {}", e)))?;
            Ok(n > 0)
        })
    }

    /// The tracker `user` holds on `tracked`, if any.
    pub fn find(
        &self,
        user: &EntityRef,
        tracked: &EntityRef,
    ) -> Result<Option<Tracker>, ActrackError> {
        let sql = format!(
            "SELECT {} FROM trackers
             WHERE user_kind = ?1 AND user_id = ?2 AND tracked_kind = ?3 AND tracked_id = ?4",
            TRACKER_COLUMNS
        );
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    &sql,
                    rusqlite::params![
                        user.kind,
                        encode_id(user),
                        tracked.kind,
                        encode_id(tracked),
                    ],
                    |row| Ok(row_to_tracker(row)),
                )
                .optional()
                .map_err(|e| ActrackError::Storage(e.to_string()))?;
            row.transpose()
        })
    }

    /// Trackers held by `user`.
    pub fn owned(&self, user: &EntityRef) -> Result<Vec<Tracker>, ActrackError> {
        self.select_where("user_kind = ?1 AND user_id = ?2", user)
    }

    /// Trackers following `entity` exactly.
    pub fn tracking(&self, entity: &EntityRef) -> Result<Vec<Tracker>, ActrackError> {
        self.select_where("tracked_kind = ?1 AND tracked_id = ?2", entity)
    }

    fn select_where(&self, clause: &str, entity: &EntityRef) -> Result<Vec<Tracker>, ActrackError> {
        let sql = format!(
            "SELECT {} FROM trackers WHERE {} ORDER BY last_updated DESC",
            TRACKER_COLUMNS, clause
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ActrackError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![entity.kind, encode_id(entity)], |row| {
                    Ok(row_to_tracker(row))
                })
                .map_err(|e| ActrackError::Storage(e.to_string()))?;

            let mut trackers = Vec::new();
            for row in rows {
                trackers.push(row.map_err(|e| ActrackError::Storage(e.to_string()))??);
            }
            Ok(trackers)
        })
    }
}

fn row_to_tracker(row: &rusqlite::Row<'_>) -> Result<Tracker, ActrackError> {
    let storage = |e: rusqlite::Error| ActrackError::Storage(e.to_string());

    let id: String = row.get(0).map_err(storage)?;
    let user_kind: String = row.get(1).map_err(storage)?;
    let user_id: String = row.get(2).map_err(storage)?;
    let tracked_kind: String = row.get(3).map_err(storage)?;
    let tracked_id: String = row.get(4).map_err(storage)?;
    let verbs: String = row.get(5).map_err(storage)?;
    let actor_only: bool = row.get(6).map_err(storage)?;
    let last_updated: i64 = row.get(7).map_err(storage)?;

    Ok(Tracker {
        id: TrackerId(decode_uuid(&id)?),
        user: decode_entity(user_kind, user_id),
        tracked: decode_entity(tracked_kind, tracked_id),
        verbs: serde_json::from_str(&verbs)?,
        actor_only,
        last_updated: decode_ts(last_updated)?,
    })
}
