//! Schema migration framework.
//!
//! Numbered SQL migrations are embedded at compile time via `include_str!`.
//! Each migration runs exactly once, tracked by the `schema_version` table.

use rusqlite::Connection;

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("migrations/001_baseline.sql"),
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

/// Back up the database before applying migrations.
///
/// Uses SQLite's online backup API to create a hot copy at
/// `<db_path>.pre-migration.bak`. Only called when there are pending migrations.
fn backup_before_migration(conn: &Connection) -> Result<(), String> {
    let db_path: String = conn
        .query_row("PRAGMA database_list", [], |row| row.get(2))
        .map_err(|e| format!("Failed to get database path: {}", e))?;

    if db_path.is_empty() || db_path == ":memory:" {
        return Ok(());
    }

    let backup_path = format!("{}.pre-migration.bak", db_path);
    let mut backup_conn = rusqlite::Connection::open(&backup_path)
        .map_err(|e| format!("Failed to open backup file: {}", e))?;

    let backup = rusqlite::backup::Backup::new(conn, &mut backup_conn)
        .map_err(|e| format!("Failed to initialize pre-migration backup: {}", e))?;

    backup
        .step(-1)
        .map_err(|e| format!("Pre-migration backup failed: {}", e))?;

    log::info!("Pre-migration backup created at {}", backup_path);
    Ok(())
}

/// Run all pending migrations.
///
/// Returns the number of migrations applied (0 if already up-to-date).
///
/// Forward-compat guard: if the database has a higher version than the highest
/// known migration, returns an error instead of touching the schema.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    ensure_schema_version_table(conn)?;

    let current = current_version(conn)?;
    let max_known = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);

    if current > max_known {
        return Err(format!(
            "Database schema version ({}) is newer than this build supports ({}). \
             Update the engine before opening this database.",
            current, max_known
        ));
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        return Ok(0);
    }

    backup_before_migration(conn)?;

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
    use rusqlite::Connection;

    fn mem_db() -> Connection {
        Connection::open_in_memory().expect("in-memory db")
    }

    #[test]
    fn test_fresh_db_applies_baseline() {
        let conn = mem_db();
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, 1, "should apply exactly 1 migration (baseline)");

        let version = current_version(&conn).expect("version query");
        assert_eq!(version, 1);

        // Key tables exist and accept well-formed rows
        conn.execute(
            "INSERT INTO conflicts (id, board_id, conflict_type, severity, fingerprint,
             summary, detected_at, last_seen_at)
             VALUES ('cf-1', 'b1', 'resource', 'high', 'fp1', 'Overlap', '2025-01-01', '2025-01-01')",
            [],
        )
        .expect("conflicts table should exist");

        conn.execute(
            "INSERT INTO resolutions (id, conflict_id, resolution_type, base_confidence,
             final_confidence, created_at)
             VALUES ('rs-1', 'cf-1', 'reassign', 55, 60, '2025-01-01')",
            [],
        )
        .expect("resolutions table should exist");

        conn.execute(
            "INSERT INTO patterns (conflict_type, resolution_type, scope, times_used,
             times_successful, updated_at)
             VALUES ('resource', 'reassign', 'global', 1, 1, '2025-01-01')",
            [],
        )
        .expect("patterns table should exist");

        conn.execute(
            "INSERT INTO scan_state (board_id, last_scan_at, last_conflict_count)
             VALUES ('b1', '2025-01-01', 2)",
            [],
        )
        .expect("scan_state table should exist");
    }

    #[test]
    fn test_open_fingerprint_uniqueness() {
        let conn = mem_db();
        run_migrations(&conn).expect("migrations");

        conn.execute(
            "INSERT INTO conflicts (id, board_id, conflict_type, severity, status, fingerprint,
             summary, detected_at, last_seen_at)
             VALUES ('cf-1', 'b1', 'resource', 'high', 'active', 'fp1', 's', '2025-01-01', '2025-01-01')",
            [],
        )
        .unwrap();

        // Second open conflict with the same fingerprint is rejected
        let dup = conn.execute(
            "INSERT INTO conflicts (id, board_id, conflict_type, severity, status, fingerprint,
             summary, detected_at, last_seen_at)
             VALUES ('cf-2', 'b1', 'resource', 'high', 'active', 'fp1', 's', '2025-01-02', '2025-01-02')",
            [],
        );
        assert!(dup.is_err(), "duplicate open fingerprint should be rejected");

        // A resolved row with the same fingerprint is fine (history)
        conn.execute(
            "INSERT INTO conflicts (id, board_id, conflict_type, severity, status, fingerprint,
             summary, detected_at, last_seen_at, resolved_at)
             VALUES ('cf-3', 'b1', 'resource', 'high', 'resolved', 'fp1', 's',
             '2024-12-01', '2024-12-01', '2024-12-02')",
            [],
        )
        .expect("closed duplicate should be allowed");
    }

    #[test]
    fn test_rating_range_enforced() {
        let conn = mem_db();
        run_migrations(&conn).expect("migrations");

        conn.execute(
            "INSERT INTO conflicts (id, board_id, conflict_type, severity, fingerprint,
             summary, detected_at, last_seen_at)
             VALUES ('cf-1', 'b1', 'schedule', 'low', 'fp', 's', '2025-01-01', '2025-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO resolutions (id, conflict_id, resolution_type, base_confidence,
             final_confidence, created_at)
             VALUES ('rs-1', 'cf-1', 'reschedule', 50, 50, '2025-01-01')",
            [],
        )
        .unwrap();

        let bad = conn.execute(
            "INSERT INTO feedback_events (id, conflict_id, resolution_id, rating, created_at)
             VALUES ('fb-1', 'cf-1', 'rs-1', 6, '2025-01-01')",
            [],
        );
        assert!(bad.is_err(), "rating 6 should violate the CHECK constraint");
    }

    #[test]
    fn test_forward_compat_guard() {
        let conn = mem_db();
        ensure_schema_version_table(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (999)", [])
            .unwrap();

        let result = run_migrations(&conn);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(
            err.contains("newer than this build"),
            "error should mention version mismatch: {}",
            err
        );
    }

    #[test]
    fn test_idempotency() {
        let conn = mem_db();
        assert_eq!(run_migrations(&conn).expect("first run"), 1);
        assert_eq!(run_migrations(&conn).expect("second run"), 0);
        assert_eq!(current_version(&conn).expect("version query"), 1);
    }
}
