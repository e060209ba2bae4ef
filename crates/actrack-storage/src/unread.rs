//! Per-user unread action state.

use std::collections::BTreeSet;
use std::sync::Arc;

use actrack_core::error::ActrackError;
use actrack_core::types::{ActionId, EntityRef};

use crate::codec::{decode_uuid, encode_id};
use crate::db::Database;

#[derive(Clone, Debug)]
pub struct UnreadRepository {
    db: Arc<Database>,
}

impl UnreadRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Mark actions unread for `user`. Returns how many were newly marked.
    pub fn mark_unread(&self, user: &EntityRef, ids: &[ActionId]) -> Result<usize, ActrackError> {
        self.db.with_transaction(|tx| {
            let mut marked = 0;
            for id in ids {
                marked += tx
                    .execute(
                        "INSERT OR IGNORE INTO unread_actions (user_kind, user_id, action_id)
                         VALUES (?1, ?2, ?3)",
                        rusqlite::params![user.kind, encode_id(user), id.to_string()],
                    )
                    .map_err(|e| {
                        ActrackError::Storage(format!("Failed to mark action unread: {}", e))
                    })?;
            }
            Ok(marked)
        })
    }

    /// Mark actions read for `user`. Returns how many were unread.
    pub fn mark_read(&self, user: &EntityRef, ids: &[ActionId]) -> Result<usize, ActrackError> {
        self.db.with_transaction(|tx| {
            let mut cleared = 0;
            for id in ids {
                cleared += tx
                    .execute(
                        "DELETE FROM unread_actions
                         WHERE user_kind = ?1 AND user_id = ?2 AND action_id = ?3",
                        rusqlite::params![user.kind, encode_id(user), id.to_string()],
                    )
                    .map_err(|e| {
                        ActrackError::Storage(format!("Failed to mark action read: {}", e))
                    })?;
            }
            Ok(cleared)
        })
    }

    pub fn is_unread(&self, user: &EntityRef, id: ActionId) -> Result<bool, ActrackError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM unread_actions
                     WHERE user_kind = ?1 AND user_id = ?2 AND action_id = ?3",
                    rusqlite::params![user.kind, encode_id(user), id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| ActrackError::Storage(e.to_string()))?;
            Ok(count > 0)
        })
    }

    /// Every action currently unread for `user`.
    pub fn unread_ids(&self, user: &EntityRef) -> Result<BTreeSet<ActionId>, ActrackError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT action_id FROM unread_actions WHERE user_kind = ?1 AND user_id = ?2",
                )
                .map_err(|e| ActrackError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![user.kind, encode_id(user)], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| ActrackError::Storage(e.to_string()))?;

            let mut ids = BTreeSet::new();
            for row in rows {
                let id = row.map_err(|e| ActrackError::Storage(e.to_string()))?;
                ids.insert(ActionId(decode_uuid(&id)?));
            }
            Ok(ids)
        })
    }
}
