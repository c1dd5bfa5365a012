//! Capture of bus traffic into recording runs.
//!
//! The bus pushes deliveries into a channel, stamped with their receive time.
//! A pump task drains it and appends each message to the store under the
//! active run, on the blocking thread pool. Messages that arrive while no run is
//! active are dropped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::bus::{BusClient, BusError, BusMessage};
use crate::data::{Database, DatabaseError, LogStore, RunId, RunStore, SchemaStatus};
use crate::util::paths::database_path;

/// Upper bound on waiting for already-delivered messages to be written on stop
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Already recording run {0}")]
    AlreadyRecording(RunId),
    #[error("Not recording")]
    NotRecording,
    #[error("Recorder has been stopped")]
    Stopped,
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Recorder settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderConfig {
    pub database_path: PathBuf,
    /// Topic patterns to subscribe to (an empty list subscribes to everything)
    pub topics: Vec<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            database_path: database_path(),
            topics: vec!["#".to_string()],
        }
    }
}

/// Lifecycle of a [`Recorder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Connected and subscribed, deliveries are discarded
    Idle,
    /// Deliveries are written under the run
    Recording(RunId),
    /// Stop requested; deliveries already received are still written
    Draining(RunId),
    /// Run ended, bus and store released
    Stopped,
}

impl RecorderState {
    /// Run that deliveries are currently written under
    pub fn capturing_run(&self) -> Option<RunId> {
        match self {
            RecorderState::Recording(id) | RecorderState::Draining(id) => Some(*id),
            RecorderState::Idle | RecorderState::Stopped => None,
        }
    }
}

/// State shared with the delivery pump
struct Shared {
    state: Mutex<RecorderState>,
    runs: RunStore,
    logs: LogStore,
}

impl Shared {
    fn capture(&self, message: &BusMessage) {
        // Held across the append so no entry lands after its run has ended
        let state = self.state.lock();
        let Some(run_id) = state.capturing_run() else {
            return;
        };

        match self.logs.append_entry_at(
            run_id,
            message.unix_time,
            &message.topic,
            &message.payload,
        ) {
            Ok(_) => tracing::info!(
                run_id = %run_id,
                "{:>4} bytes <- {}",
                message.payload.len(),
                message.topic
            ),
            Err(err) => tracing::error!(
                run_id = %run_id,
                topic = %message.topic,
                error = %err,
                "Failed to log message"
            ),
        }
    }
}

/// Records messages from the bus into runs of the event store
pub struct Recorder {
    shared: Arc<Shared>,
    db: Database,
    bus: Arc<dyn BusClient>,
    topics: Vec<String>,
    pump: Mutex<Option<JoinHandle<()>>>,
    span: tracing::Span,
}

impl Recorder {
    /// Open the store, connect to the bus and subscribe to the configured topics.
    ///
    /// Recording does not begin until [`Recorder::start`].
    pub async fn new(
        config: &RecorderConfig,
        bus: Arc<dyn BusClient>,
    ) -> Result<Self, RecorderError> {
        let span = tracing::info_span!("recorder", db = %config.database_path.display());
        Self::connect(config, bus, span.clone())
            .instrument(span)
            .await
    }

    async fn connect(
        config: &RecorderConfig,
        bus: Arc<dyn BusClient>,
        span: tracing::Span,
    ) -> Result<Self, RecorderError> {
        let db = Database::open(config.database_path.clone())?;
        match db.initialize()? {
            SchemaStatus::Created => tracing::info!("Created tables RUN and LOG"),
            SchemaStatus::Existing => tracing::warn!(
                "Tables already exist, mqtt-logger will append to {}",
                config.database_path.display()
            ),
        }

        let topics = if config.topics.is_empty() {
            vec!["#".to_string()]
        } else {
            config.topics.clone()
        };

        let handle = bus.connect().await?;
        for topic in &topics {
            match bus.subscribe(topic).await {
                Ok(()) => tracing::info!(topic = %topic, "Subscribed"),
                Err(err) => tracing::error!(topic = %topic, error = %err, "Subscribe failed"),
            }
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(RecorderState::Idle),
            runs: RunStore::new(db.clone()),
            logs: LogStore::new(db.clone()),
        });
        let pump = tokio::spawn(
            pump_messages(shared.clone(), handle.messages).instrument(span.clone()),
        );

        Ok(Self {
            shared,
            db,
            bus,
            topics,
            pump: Mutex::new(Some(pump)),
            span,
        })
    }

    /// Begin a new run; deliveries from now on are written under it
    pub fn start(&self) -> Result<RunId, RecorderError> {
        let _enter = self.span.enter();
        let mut state = self.shared.state.lock();
        match *state {
            RecorderState::Idle => {
                let run_id = self.shared.runs.begin_run()?;
                *state = RecorderState::Recording(run_id);
                tracing::info!(run_id = %run_id, "Logging started");
                Ok(run_id)
            }
            RecorderState::Recording(run_id) => Err(RecorderError::AlreadyRecording(run_id)),
            RecorderState::Draining(_) | RecorderState::Stopped => Err(RecorderError::Stopped),
        }
    }

    /// End the current run and release the bus and the store.
    ///
    /// Messages delivered before the call are still written. Safe to call
    /// from any task; only one concurrent caller succeeds.
    pub async fn stop(&self) -> Result<RunId, RecorderError> {
        self.shutdown().instrument(self.span.clone()).await
    }

    async fn shutdown(&self) -> Result<RunId, RecorderError> {
        let run_id = {
            let mut state = self.shared.state.lock();
            match *state {
                RecorderState::Recording(run_id) => {
                    *state = RecorderState::Draining(run_id);
                    run_id
                }
                _ => return Err(RecorderError::NotRecording),
            }
        };

        // Disconnecting closes the delivery channel, which ends the pump
        if let Err(err) = self.bus.disconnect().await {
            tracing::warn!(error = %err, "Disconnect failed");
        }

        let pump = self.pump.lock().take();
        if let Some(mut pump) = pump {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut pump).await.is_err() {
                tracing::warn!("Delivery channel did not drain in time, dropping the rest");
                pump.abort();
            }
        }

        *self.shared.state.lock() = RecorderState::Stopped;
        tracing::info!(run_id = %run_id, "Logging stopped");

        let ended = self.shared.runs.end_run(run_id);
        self.db.close()?;
        tracing::info!("Database connection closed");
        ended?;

        Ok(run_id)
    }

    pub fn state(&self) -> RecorderState {
        *self.shared.state.lock()
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state(), RecorderState::Recording(_))
    }

    /// Run currently being recorded
    pub fn current_run(&self) -> Option<RunId> {
        match self.state() {
            RecorderState::Recording(run_id) => Some(run_id),
            _ => None,
        }
    }

    /// Subscribed topic patterns
    pub fn topics(&self) -> &[String] {
        &self.topics
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(run_id) = self.current_run() {
            tracing::warn!(run_id = %run_id, "Recorder dropped while recording, run left open");
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

async fn pump_messages(shared: Arc<Shared>, mut messages: mpsc::Receiver<BusMessage>) {
    while let Some(message) = messages.recv().await {
        // SQLite commits block, keep them off the async workers
        let shared = shared.clone();
        let span = tracing::Span::current();
        let written = tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            shared.capture(&message);
        })
        .await;
        if let Err(err) = written {
            tracing::error!(error = %err, "Capture task failed");
        }
    }
    tracing::debug!("Delivery channel closed");
}
