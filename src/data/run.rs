//! Run data access object

use std::collections::BTreeSet;

use rusqlite::{params, OptionalExtension};

use super::database::{Database, DatabaseError};
use super::models::{unix_time_now, Run, RunId};

/// Data access object for Run operations
#[derive(Clone, Debug)]
pub struct RunStore {
    db: Database,
}

impl RunStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new active run and return its identifier
    pub fn begin_run(&self) -> Result<RunId, DatabaseError> {
        let started = unix_time_now();
        let id = self.db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO RUN (START_UNIX_TIME) VALUES (?1)",
                params![started],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        Ok(RunId(id))
    }

    /// Stamp the end time of a run.
    ///
    /// An end time that is already set is never overwritten.
    pub fn end_run(&self, id: RunId) -> Result<(), DatabaseError> {
        let ended = unix_time_now();
        let (updated, exists) = self.db.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE RUN SET END_UNIX_TIME = ?2 WHERE ID = ?1 AND END_UNIX_TIME IS NULL",
                params![id.0, ended],
            )?;
            let exists = updated > 0 || run_exists(conn, id)?;
            Ok((updated, exists))
        })?;

        if !exists {
            return Err(DatabaseError::RunNotFound(id));
        }
        if updated == 0 {
            tracing::warn!(run_id = %id, "Run already ended, keeping original end time");
        }
        Ok(())
    }

    /// Get a run by ID
    pub fn get(&self, id: RunId) -> Result<Option<Run>, DatabaseError> {
        self.db.with_connection(|conn| {
            conn.query_row(
                "SELECT ID, START_UNIX_TIME, END_UNIX_TIME FROM RUN WHERE ID = ?1",
                params![id.0],
                Self::row_to_run,
            )
            .optional()
        })
    }

    /// Get all runs ordered by ID
    pub fn list(&self) -> Result<Vec<Run>, DatabaseError> {
        self.db.with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT ID, START_UNIX_TIME, END_UNIX_TIME FROM RUN ORDER BY ID")?;
            let runs = stmt
                .query_map([], Self::row_to_run)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(runs)
        })
    }

    /// Identifiers of every run in the store
    pub fn list_ids(&self) -> Result<BTreeSet<RunId>, DatabaseError> {
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT ID FROM RUN")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i64>(0).map(RunId))?
                .collect::<rusqlite::Result<BTreeSet<_>>>()?;
            Ok(ids)
        })
    }

    pub fn exists(&self, id: RunId) -> Result<bool, DatabaseError> {
        self.db.with_connection(|conn| run_exists(conn, id))
    }

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<Run> {
        Ok(Run {
            id: RunId(row.get(0)?),
            start_unix_time: row.get(1)?,
            end_unix_time: row.get(2)?,
        })
    }
}

pub(crate) fn run_exists(conn: &rusqlite::Connection, id: RunId) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM RUN WHERE ID = ?1)",
        params![id.0],
        |row| row.get(0),
    )
}
