//! SQLite database management

use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::RunId;
use super::schema;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),
    #[error("Lock poisoned")]
    LockPoisoned,
    #[error("Database connection is closed")]
    Closed,
    #[error("Partial schema: table {present} exists without table {missing}")]
    PartialSchema {
        present: &'static str,
        missing: &'static str,
    },
    #[error("Run {0} does not exist")]
    RunNotFound(RunId),
}

/// Outcome of [`Database::initialize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    /// Both tables were created by this call
    Created,
    /// Both tables were already present
    Existing,
}

/// Shared handle to the single SQLite connection.
///
/// The connection is `None` once [`Database::close`] has been called; every
/// accessor then fails with [`DatabaseError::Closed`].
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Option<Connection>>>,
    /// Path to the database file
    pub path: PathBuf,
}

impl Database {
    /// Open or create a database at the specified path
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DatabaseError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DatabaseError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;
        Self::from_connection(conn, path)
    }

    /// Open a database file that must already exist
    pub fn open_existing(path: impl Into<PathBuf>) -> Result<Self, DatabaseError> {
        let path = path.into();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&path, flags)?;
        Self::from_connection(conn, path)
    }

    fn from_connection(conn: Connection, path: PathBuf) -> Result<Self, DatabaseError> {
        // MQTT topics are case-sensitive, topic filters must be too
        conn.execute_batch("PRAGMA case_sensitive_like = ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path,
        })
    }

    /// Create the RUN and LOG tables unless both already exist.
    ///
    /// Fails with [`DatabaseError::PartialSchema`] when only one of them is
    /// present.
    pub fn initialize(&self) -> Result<SchemaStatus, DatabaseError> {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(DatabaseError::Closed)?;

        if schema::tables_exist(conn)? {
            return Ok(SchemaStatus::Existing);
        }

        schema::create_tables(conn)?;
        Ok(SchemaStatus::Created)
    }

    /// Whether both tables exist
    pub fn schema_exists(&self) -> Result<bool, DatabaseError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(DatabaseError::Closed)?;
        schema::tables_exist(conn)
    }

    /// Execute a closure with the connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(DatabaseError::Closed)?;
        f(conn).map_err(DatabaseError::Sqlite)
    }

    /// Close the connection for every clone of this handle.
    ///
    /// Closing an already closed database is a no-op.
    pub fn close(&self) -> Result<(), DatabaseError> {
        let conn = self.lock()?.take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, err)| DatabaseError::Sqlite(err))?;
            tracing::debug!(path = %self.path.display(), "Database connection closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Connection>>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}
