use crate::database::DbConn;
use crate::error::AppResult;
use rusqlite::Connection;

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// SQL for schema version tracking table
const CREATE_SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
)
"#;

/// Chain columns added when photosets were introduced
const CHAIN_COLUMNS: [(&str, &str); 3] = [
    ("rootid", "INTEGER NOT NULL DEFAULT 0"),
    ("isroot", "INTEGER NOT NULL DEFAULT 0"),
    ("animationfilename", "TEXT"),
];

const CREATE_ROOTID_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_photo_rootid ON photo (rootid, visible)";

const ADD_VALIDATED_COLUMN: &str =
    "ALTER TABLE photouser ADD COLUMN validated INTEGER NOT NULL DEFAULT 0";

/// Accounts that already hold a hash were validated under the old scheme
const BACKFILL_VALIDATED: &str = "UPDATE photouser SET validated = 1 WHERE hash != ''";

/// Check if a column exists in a table
fn column_exists(conn: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;

    for row in rows {
        if row? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Check if a table exists
fn table_exists(conn: &Connection, table: &str) -> AppResult<bool> {
    let count: i32 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Get current schema version from database
fn get_schema_version(conn: &Connection) -> AppResult<i32> {
    if !table_exists(conn, "schema_version")? {
        return Ok(0);
    }

    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get(0)
        })
        .ok()
        .flatten();

    Ok(version.unwrap_or(0))
}

fn record_migration(conn: &Connection, version: i32) -> AppResult<()> {
    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
        [version],
    )?;
    Ok(())
}

/// Run all pending migrations
pub fn run_migrations(conn: &DbConn) -> AppResult<()> {
    conn.execute_batch(CREATE_SCHEMA_VERSION_TABLE)?;

    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
        record_migration(conn, 1)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
        record_migration(conn, 2)?;
    }

    Ok(())
}

/// Migration v1: chain pointer columns and their index
fn migrate_v1(conn: &Connection) -> AppResult<()> {
    for (column, definition) in CHAIN_COLUMNS {
        if !column_exists(conn, "photo", column)? {
            conn.execute(
                &format!("ALTER TABLE photo ADD COLUMN {} {}", column, definition),
                [],
            )?;
        }
    }

    conn.execute(CREATE_ROOTID_INDEX, [])?;
    Ok(())
}

/// Migration v2: explicit validated flag on accounts
fn migrate_v2(conn: &Connection) -> AppResult<()> {
    if !column_exists(conn, "photouser", "validated")? {
        conn.execute(ADD_VALIDATED_COLUMN, [])?;
        conn.execute(BACKFILL_VALIDATED, [])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_database;
    use r2d2::Pool;
    use r2d2_sqlite::SqliteConnectionManager;

    fn open_memory() -> DbConn {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .expect("Failed to create test database pool");
        pool.get().expect("Failed to get connection from pool")
    }

    /// Database created before photosets and account validation existed
    fn create_old_db() -> DbConn {
        let conn = open_memory();
        conn.execute_batch(
            r#"
            CREATE TABLE photo (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                deviceid INTEGER NOT NULL,
                userid INTEGER NOT NULL DEFAULT 0,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                captured_at TEXT NOT NULL,
                visible INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE photouser (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                hash TEXT NOT NULL DEFAULT '',
                validationcode TEXT NOT NULL,
                retrycount INTEGER NOT NULL DEFAULT 0
            );
            INSERT INTO photouser (email, hash, validationcode) VALUES ('a@x.org', 'h', '00001');
            INSERT INTO photouser (email, hash, validationcode) VALUES ('b@x.org', '', '00002');
            "#,
        )
        .expect("Failed to create old tables");
        conn
    }

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let conn = open_memory();
        init_database(&conn).unwrap();

        run_migrations(&conn).expect("Migration should succeed");

        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
        assert!(column_exists(&conn, "photo", "animationfilename").unwrap());
    }

    #[test]
    fn test_upgrades_existing_database() {
        let conn = create_old_db();
        assert!(!column_exists(&conn, "photo", "rootid").unwrap());

        run_migrations(&conn).expect("Migration should succeed on existing database");

        for (column, _) in CHAIN_COLUMNS {
            assert!(column_exists(&conn, "photo", column).unwrap(), "{column} missing");
        }

        let validated: Vec<i64> = {
            let mut stmt = conn
                .prepare("SELECT validated FROM photouser ORDER BY id")
                .unwrap();
            let rows = stmt.query_map([], |row| row.get(0)).unwrap();
            rows.map(|r| r.unwrap()).collect()
        };
        assert_eq!(validated, vec![1, 0]);
    }

    #[test]
    fn test_migration_is_idempotent() {
        let conn = open_memory();
        init_database(&conn).unwrap();

        run_migrations(&conn).expect("First migration should succeed");
        run_migrations(&conn).expect("Second migration should succeed");

        let applied: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, CURRENT_SCHEMA_VERSION);
    }
}
