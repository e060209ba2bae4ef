//! Database schema migrations.
//!
//! Applies the schema for actions, their many-valued associations, trackers
//! and per-user unread state, plus the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use actrack_core::error::ActrackError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ActrackError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ActrackError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ActrackError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
///
/// Entity ids are stored as TEXT with `''` standing for "the whole kind",
/// so that they can take part in primary keys.
fn apply_v1(conn: &Connection) -> Result<(), ActrackError> {
    conn.execute_batch(
        "
        -- Actions. Timestamps are unix milliseconds.
        CREATE TABLE IF NOT EXISTS actions (
            id              TEXT PRIMARY KEY NOT NULL,
            actor_kind      TEXT NOT NULL,
            actor_id        TEXT NOT NULL DEFAULT '',
            verb            TEXT NOT NULL,
            timestamp       INTEGER NOT NULL,
            level           INTEGER NOT NULL DEFAULT 30,
            data            TEXT NOT NULL DEFAULT '{}',
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_actions_actor_verb
            ON actions (actor_kind, actor_id, verb, timestamp);

        CREATE INDEX IF NOT EXISTS idx_actions_timestamp
            ON actions (timestamp DESC);

        -- Many-valued attributes (targets, related).
        CREATE TABLE IF NOT EXISTS action_entities (
            action_id       TEXT NOT NULL,
            attr            TEXT NOT NULL
                            CHECK (attr IN ('targets', 'related')),
            entity_kind     TEXT NOT NULL,
            entity_id       TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (action_id, attr, entity_kind, entity_id),
            FOREIGN KEY (action_id) REFERENCES actions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_action_entities_entity
            ON action_entities (entity_kind, entity_id, attr);

        -- Trackers.
        CREATE TABLE IF NOT EXISTS trackers (
            id              TEXT PRIMARY KEY NOT NULL,
            user_kind       TEXT NOT NULL,
            user_id         TEXT NOT NULL,
            tracked_kind    TEXT NOT NULL,
            tracked_id      TEXT NOT NULL DEFAULT '',
            verbs           TEXT NOT NULL DEFAULT '[]',
            actor_only      INTEGER NOT NULL DEFAULT 1,
            last_updated    INTEGER NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_trackers_user_tracked
            ON trackers (user_kind, user_id, tracked_kind, tracked_id);

        CREATE INDEX IF NOT EXISTS idx_trackers_tracked
            ON trackers (tracked_kind, tracked_id);

        -- Unread actions per user.
        CREATE TABLE IF NOT EXISTS unread_actions (
            user_kind       TEXT NOT NULL,
            user_id         TEXT NOT NULL,
            action_id       TEXT NOT NULL,
            PRIMARY KEY (user_kind, user_id, action_id),
            FOREIGN KEY (action_id) REFERENCES actions(id) ON DELETE CASCADE
        );

        -- Record migration.
        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| ActrackError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        // Running again should be idempotent.
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_action_entities_cascade_on_delete() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO actions (id, actor_kind, actor_id, verb, timestamp)
             VALUES ('a1', 'auth.user', '1', 'created', 1700000000000)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO action_entities (action_id, attr, entity_kind, entity_id)
             VALUES ('a1', 'targets', 'app.project', '1')",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM actions WHERE id = 'a1'", []).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM action_entities", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_action_entities_attr_check() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO actions (id, actor_kind, actor_id, verb, timestamp)
             VALUES ('a1', 'auth.user', '1', 'created', 0)",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO action_entities (action_id, attr, entity_kind, entity_id)
             VALUES ('a1', 'changed', 'app.project', '1')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_trackers_unique_per_user_and_tracked() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let insert = "INSERT INTO trackers (id, user_kind, user_id, tracked_kind, tracked_id, last_updated)
                      VALUES (?1, 'auth.user', '1', 'app.project', '', 0)";
        conn.execute(insert, ["t1"]).unwrap();
        assert!(conn.execute(insert, ["t2"]).is_err());
    }
}
