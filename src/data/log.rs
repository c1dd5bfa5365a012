//! Log entry data access object

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter};

use super::database::{Database, DatabaseError};
use super::models::{unix_time_now, LogEntry, RunId};
use super::run::run_exists;

const SELECT_ENTRIES: &str = "SELECT ID, RUN_ID, UNIX_TIME, TOPIC, MESSAGE FROM LOG";

/// Data access object for captured messages
#[derive(Clone, Debug)]
pub struct LogStore {
    db: Database,
}

impl LogStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message captured now under `run_id`
    pub fn append_entry(
        &self,
        run_id: RunId,
        topic: &str,
        payload: &[u8],
    ) -> Result<i64, DatabaseError> {
        self.append_entry_at(run_id, unix_time_now(), topic, payload)
    }

    /// Append a message with an explicit capture time.
    ///
    /// A `run_id` that does not name an existing run is logged as a warning;
    /// the entry is still written.
    pub fn append_entry_at(
        &self,
        run_id: RunId,
        unix_time: f64,
        topic: &str,
        payload: &[u8],
    ) -> Result<i64, DatabaseError> {
        let (id, orphaned) = self.db.with_connection(|conn| {
            let orphaned = !run_exists(conn, run_id)?;
            conn.execute(
                "INSERT INTO LOG (RUN_ID, UNIX_TIME, TOPIC, MESSAGE) VALUES (?1, ?2, ?3, ?4)",
                params![run_id.0, unix_time, topic, payload],
            )?;
            Ok((conn.last_insert_rowid(), orphaned))
        })?;

        if orphaned {
            tracing::warn!(
                run_id = %run_id,
                entry_id = id,
                topic,
                "Log entry references a run that does not exist"
            );
        }
        Ok(id)
    }

    /// Entries whose topic matches any of the `LIKE` patterns, in insertion order.
    ///
    /// `None` or an empty slice returns every entry.
    pub fn query_entries(
        &self,
        filters: Option<&[String]>,
    ) -> Result<Vec<LogEntry>, DatabaseError> {
        let filters = filters.unwrap_or_default();
        let (clause, values) = topic_clause(filters, 1);

        let sql = if clause.is_empty() {
            format!("{SELECT_ENTRIES} ORDER BY ID")
        } else {
            format!("{SELECT_ENTRIES} WHERE {clause} ORDER BY ID")
        };
        self.fetch(&sql, values)
    }

    /// Like [`LogStore::query_entries`] but restricted to a single run
    pub fn query_run_entries(
        &self,
        run_id: RunId,
        filters: Option<&[String]>,
    ) -> Result<Vec<LogEntry>, DatabaseError> {
        let filters = filters.unwrap_or_default();
        let (clause, topic_values) = topic_clause(filters, 2);

        let sql = if clause.is_empty() {
            format!("{SELECT_ENTRIES} WHERE RUN_ID = ?1 ORDER BY ID")
        } else {
            format!("{SELECT_ENTRIES} WHERE RUN_ID = ?1 AND ({clause}) ORDER BY ID")
        };

        let mut values = vec![Value::Integer(run_id.0)];
        values.extend(topic_values);
        self.fetch(&sql, values)
    }

    /// Earliest capture time across all entries, `None` when the log is empty
    pub fn earliest_timestamp(&self) -> Result<Option<f64>, DatabaseError> {
        self.db.with_connection(|conn| {
            conn.query_row("SELECT MIN(UNIX_TIME) FROM LOG", [], |row| row.get(0))
        })
    }

    /// Number of entries captured under a run
    pub fn count_for_run(&self, run_id: RunId) -> Result<u64, DatabaseError> {
        let count: i64 = self.db.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM LOG WHERE RUN_ID = ?1",
                params![run_id.0],
                |row| row.get(0),
            )
        })?;
        Ok(count.max(0) as u64)
    }

    fn fetch(&self, sql: &str, values: Vec<Value>) -> Result<Vec<LogEntry>, DatabaseError> {
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let entries = stmt
                .query_map(params_from_iter(values.iter()), Self::row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<LogEntry> {
        Ok(LogEntry {
            id: row.get(0)?,
            run_id: RunId(row.get(1)?),
            unix_time: row.get(2)?,
            topic: row.get(3)?,
            payload: row.get(4)?,
        })
    }
}

/// Build `TOPIC LIKE ?n OR TOPIC LIKE ?n+1 ...` with placeholders numbered from `first`
fn topic_clause(filters: &[String], first: usize) -> (String, Vec<Value>) {
    let clause = (0..filters.len())
        .map(|i| format!("TOPIC LIKE ?{}", first + i))
        .collect::<Vec<_>>()
        .join(" OR ");
    let values = filters.iter().cloned().map(Value::Text).collect();
    (clause, values)
}
