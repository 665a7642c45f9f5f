//! Schema migration framework.
//!
//! Numbered SQL migrations are embedded at compile time via `include_str!`.
//! Each migration runs exactly once, tracked by the `schema_version` table.
//! Every statement is `CREATE ... IF NOT EXISTS`, so running against a store
//! that already has the tables is harmless.

use rusqlite::Connection;

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("migrations/001_signal_store.sql"),
}];

/// Create the `schema_version` table if it doesn't exist.
fn ensure_schema_version_table(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Failed to create schema_version table: {}", e))
}

/// Return the highest applied migration version, or 0 if none.
fn current_version(conn: &Connection) -> Result<i32, String> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Failed to read schema version: {}", e))
}

/// Run all pending migrations.
///
/// Returns the number of migrations applied (0 if already up-to-date).
/// Refuses to touch a database whose version is newer than the highest
/// migration this build knows about.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    ensure_schema_version_table(conn)?;

    let current = current_version(conn)?;
    let max_known = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);

    if current > max_known {
        return Err(format!(
            "Database schema version ({}) is newer than this version of dealsignal supports ({}).",
            current, max_known
        ));
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        return Ok(0);
    }

    for migration in &pending {
        conn.execute_batch(migration.sql)
            .map_err(|e| format!("Migration v{} failed: {}", migration.version, e))?;

        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )
        .map_err(|e| format!("Failed to record migration v{}: {}", migration.version, e))?;

        log::info!("Applied migration v{}", migration.version);
    }

    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_db() -> Connection {
        Connection::open_in_memory().expect("in-memory db")
    }

    #[test]
    fn test_fresh_db_applies_signal_store() {
        let conn = mem_db();
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, 1);
        assert_eq!(current_version(&conn).expect("version query"), 1);

        conn.execute(
            "INSERT INTO buying_signals
             (entity_key, account_id, opportunity_id, source, payload,
              created_at, updated_at, expires_at)
             VALUES ('opp-1', 'acc-1', 'opp-1', 'call-derived', '{}',
                     '2026-01-01', '2026-01-01', NULL)",
            [],
        )
        .expect("buying_signals should have all columns");

        conn.execute(
            "INSERT INTO account_name_cache (account_id, account_name, owner_id, updated_at)
             VALUES ('acc-1', 'Acme', NULL, '2026-01-01')",
            [],
        )
        .expect("account_name_cache should exist");
    }

    #[test]
    fn test_source_check_constraint() {
        let conn = mem_db();
        run_migrations(&conn).expect("migrations");
        let result = conn.execute(
            "INSERT INTO buying_signals
             (entity_key, account_id, source, payload, created_at, updated_at)
             VALUES ('acc-1', 'acc-1', 'rumor-derived', '{}', '2026-01-01', '2026-01-01')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_indexes_created() {
        let conn = mem_db();
        run_migrations(&conn).expect("migrations");
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'index' AND name LIKE 'idx_buying_signals_%'",
                [],
                |row| row.get(0),
            )
            .expect("index query");
        assert_eq!(count, 3);
    }

    #[test]
    fn test_forward_compat_guard() {
        let conn = mem_db();
        ensure_schema_version_table(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (999)", [])
            .unwrap();

        let err = run_migrations(&conn).unwrap_err();
        assert!(err.contains("newer than this version"), "{}", err);
    }

    #[test]
    fn test_idempotency() {
        let conn = mem_db();
        assert_eq!(run_migrations(&conn).expect("first run"), 1);
        assert_eq!(run_migrations(&conn).expect("second run"), 0);
        assert_eq!(current_version(&conn).expect("version query"), 1);
    }

    #[test]
    fn test_schema_sql_is_rerunnable() {
        let conn = mem_db();
        run_migrations(&conn).expect("migrations");
        conn.execute_batch(MIGRATIONS[0].sql)
            .expect("create-if-not-exists DDL should run twice");
    }
}
