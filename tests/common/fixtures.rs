//! Event store fixtures
//!
//! Creates temporary SQLite stores pre-populated with runs and messages so
//! tests can exercise replay and listing without a broker.

use std::path::PathBuf;

use mqtt_logger::{Database, LogStore, RunId, RunStore};
use tempfile::TempDir;

/// A temporary event store, removed when dropped
pub struct TestStore {
    _dir: TempDir,
    /// Path to the SQLite file
    pub path: PathBuf,
}

impl TestStore {
    /// Path to a store that does not exist yet
    pub fn empty() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("MQTT_log.db");
        Self { _dir: dir, path }
    }

    /// Store with initialized tables and no runs
    pub fn initialized() -> Self {
        let store = Self::empty();
        let db = store.open();
        db.initialize().unwrap();
        db.close().unwrap();
        store
    }

    /// Store with one ended run per element of `runs`.
    ///
    /// Each run is a list of `(unix_time, topic, payload)`.
    pub fn with_runs(runs: &[&[(f64, &str, &str)]]) -> Self {
        let store = Self::initialized();
        let db = store.open();
        let run_store = RunStore::new(db.clone());
        let logs = LogStore::new(db.clone());

        for entries in runs {
            let run_id = run_store.begin_run().unwrap();
            for (unix_time, topic, payload) in entries.iter() {
                logs.append_entry_at(run_id, *unix_time, topic, payload.as_bytes())
                    .unwrap();
            }
            run_store.end_run(run_id).unwrap();
        }

        db.close().unwrap();
        store
    }

    pub fn open(&self) -> Database {
        Database::open(self.path.clone()).unwrap()
    }

    /// Topics stored under a run, in insertion order
    pub fn topics_for_run(&self, run_id: RunId) -> Vec<String> {
        let db = self.open();
        let topics = LogStore::new(db.clone())
            .query_run_entries(run_id, None)
            .unwrap()
            .into_iter()
            .map(|entry| entry.topic)
            .collect();
        db.close().unwrap();
        topics
    }
}
