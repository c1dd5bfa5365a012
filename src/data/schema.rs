//! Persisted schema for runs and captured messages.
//!
//! The two tables are created together in one transaction and must always
//! exist together. A database holding only one of them is treated as corrupt.

use rusqlite::{params, Connection};

use super::database::DatabaseError;

/// Table holding one row per recording session
pub const RUN_TABLE: &str = "RUN";

/// Table holding one row per captured message
pub const LOG_TABLE: &str = "LOG";

const CREATE_TABLES: &str = r#"
    CREATE TABLE RUN (
        ID                  INTEGER         PRIMARY KEY,
        START_UNIX_TIME     DECIMAL(15,6)   NOT NULL,
        END_UNIX_TIME       DECIMAL(15,6)
    );
    CREATE TABLE LOG (
        ID                  INTEGER         PRIMARY KEY,
        RUN_ID              INTEGER         NOT NULL,
        UNIX_TIME           DECIMAL(15,6)   NOT NULL,
        TOPIC               VARCHAR         NOT NULL,
        MESSAGE             BLOB            NOT NULL
    );
    CREATE INDEX IF NOT EXISTS IDX_LOG_RUN_ID ON LOG(RUN_ID);
"#;

/// Check whether a table with the given name exists
pub fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Report whether both tables exist.
///
/// Returns `Ok(false)` when neither exists and
/// [`DatabaseError::PartialSchema`] when only one does.
pub fn tables_exist(conn: &Connection) -> Result<bool, DatabaseError> {
    let run = table_exists(conn, RUN_TABLE)?;
    let log = table_exists(conn, LOG_TABLE)?;

    match (run, log) {
        (true, true) => Ok(true),
        (false, false) => Ok(false),
        (true, false) => Err(DatabaseError::PartialSchema {
            present: RUN_TABLE,
            missing: LOG_TABLE,
        }),
        (false, true) => Err(DatabaseError::PartialSchema {
            present: LOG_TABLE,
            missing: RUN_TABLE,
        }),
    }
}

/// Create both tables in a single transaction
pub fn create_tables(conn: &mut Connection) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(CREATE_TABLES)?;
    tx.commit()
}
