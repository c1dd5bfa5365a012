//! Timed re-publication of captured messages.
//!
//! Every entry of the replay set gets its own task that sleeps until
//! `start + (unix_time - epoch) / speed` and then publishes. The schedule is
//! absolute, so a slow publish never delays the entries after it.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::bus::{BusClient, BusError};
use crate::data::{Database, DatabaseError, LogEntry, LogStore, RunId};
use crate::util::paths::database_path;
use crate::util::topic::to_like_patterns;

/// Deadline used when `start + offset` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("No captured messages match the requested topics")]
    EmptyReplaySet,
    #[error("Invalid playback speed {0}: must be a positive, finite number")]
    InvalidSpeed(f64),
    #[error("No capture tables found in {}", .0.display())]
    MissingSchema(PathBuf),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Replayer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayerConfig {
    pub database_path: PathBuf,
    /// MQTT topic patterns selecting the replay set (None replays everything)
    pub topics: Option<Vec<String>>,
    /// Restrict the replay set to one run
    pub run: Option<RunId>,
}

impl Default for ReplayerConfig {
    fn default() -> Self {
        Self {
            database_path: database_path(),
            topics: None,
            run: None,
        }
    }
}

/// When an entry of the replay set is due, relative to the start of playback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledEmission<'a> {
    pub offset: Duration,
    pub entry: &'a LogEntry,
}

/// Outcome of one [`Replayer::play`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub published: usize,
    pub failed: usize,
    /// Emissions dropped because playback was stopped before they were due
    pub cancelled: usize,
}

impl PlaybackReport {
    pub fn total(&self) -> usize {
        self.published + self.failed + self.cancelled
    }

    pub fn was_interrupted(&self) -> bool {
        self.cancelled > 0
    }
}

enum Emission {
    Published,
    Failed,
    Cancelled,
}

/// Replays captured messages with their original relative timing
pub struct Replayer {
    entries: Arc<[LogEntry]>,
    epoch: Option<f64>,
    bus: Arc<dyn BusClient>,
    cancel: Mutex<CancellationToken>,
    span: tracing::Span,
}

impl Replayer {
    /// Load the replay set from the store and connect to the bus.
    ///
    /// The store is only read here; it is closed before this returns.
    pub async fn new(
        config: &ReplayerConfig,
        bus: Arc<dyn BusClient>,
    ) -> Result<Self, ReplayError> {
        let span = tracing::info_span!("replayer", db = %config.database_path.display());
        let entries = span.in_scope(|| load_replay_set(config))?;
        Self::connect(entries, bus, span).await
    }

    /// Replay an already loaded set of entries
    pub async fn with_entries(
        entries: Vec<LogEntry>,
        bus: Arc<dyn BusClient>,
    ) -> Result<Self, ReplayError> {
        let span = tracing::info_span!("replayer", db = "memory");
        Self::connect(entries, bus, span).await
    }

    async fn connect(
        entries: Vec<LogEntry>,
        bus: Arc<dyn BusClient>,
        span: tracing::Span,
    ) -> Result<Self, ReplayError> {
        // Deliveries are never consumed; the handle is dropped right away
        let _handle = bus.connect().instrument(span.clone()).await?;

        let epoch = entries
            .iter()
            .map(|entry| entry.unix_time)
            .min_by(f64::total_cmp);

        Ok(Self {
            entries: entries.into(),
            epoch,
            bus,
            cancel: Mutex::new(CancellationToken::new()),
            span,
        })
    }

    /// Number of entries in the replay set
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Earliest capture time of the replay set
    pub fn epoch(&self) -> Option<f64> {
        self.epoch
    }

    /// Offsets at which each entry would be published at `speed`, in replay set order
    pub fn schedule(&self, speed: f64) -> Result<Vec<ScheduledEmission<'_>>, ReplayError> {
        validate_speed(speed)?;
        let epoch = self.epoch.ok_or(ReplayError::EmptyReplaySet)?;

        Ok(self
            .entries
            .iter()
            .map(|entry| ScheduledEmission {
                offset: scaled_offset(entry.unix_time, epoch, speed),
                entry,
            })
            .collect())
    }

    /// Publish the replay set, `speed` times faster than it was captured.
    ///
    /// Returns once every emission has been published, failed or cancelled.
    /// A failed publish is logged and does not affect the others.
    ///
    /// The playback is armed when this is called, so a [`Replayer::stop`]
    /// between the call and the first poll still cancels it.
    pub fn play(
        &self,
        speed: f64,
    ) -> impl Future<Output = Result<PlaybackReport, ReplayError>> + Send + '_ {
        let token = self.arm();
        self.run_playback(speed, token).instrument(self.span.clone())
    }

    async fn run_playback(
        &self,
        speed: f64,
        token: CancellationToken,
    ) -> Result<PlaybackReport, ReplayError> {
        validate_speed(speed)?;
        let epoch = self.epoch.ok_or(ReplayError::EmptyReplaySet)?;

        tracing::info!(entries = self.entries.len(), "Playback initiated at {speed}x speed");
        let start = Instant::now();

        let mut emissions = JoinSet::new();
        for index in 0..self.entries.len() {
            let entries = Arc::clone(&self.entries);
            let bus = Arc::clone(&self.bus);
            let token = token.clone();
            let offset = scaled_offset(entries[index].unix_time, epoch, speed);
            let deadline = start
                .checked_add(offset)
                .unwrap_or_else(|| start + FAR_FUTURE);

            emissions.spawn(
                async move { emit(bus.as_ref(), &entries[index], deadline, token).await }
                    .in_current_span(),
            );
        }

        let mut report = PlaybackReport::default();
        while let Some(joined) = emissions.join_next().await {
            match joined {
                Ok(Emission::Published) => report.published += 1,
                Ok(Emission::Failed) => report.failed += 1,
                Ok(Emission::Cancelled) => report.cancelled += 1,
                Err(err) => {
                    tracing::error!(error = %err, "Emission task failed");
                    report.failed += 1;
                }
            }
        }

        if report.was_interrupted() {
            tracing::info!(
                published = report.published,
                cancelled = report.cancelled,
                "Playback interrupted"
            );
        } else {
            tracing::info!(
                published = report.published,
                failed = report.failed,
                "Playback finished"
            );
        }
        Ok(report)
    }

    /// Cancel every emission of the playback in progress that is not yet due.
    ///
    /// Idempotent. Has no effect on a playback requested afterwards.
    pub fn stop(&self) {
        let _enter = self.span.enter();
        let token = self.cancel.lock();
        if !token.is_cancelled() {
            token.cancel();
            tracing::info!("Playback stop requested");
        }
    }

    /// Close the bus connection
    pub async fn disconnect(&self) -> Result<(), ReplayError> {
        self.bus.disconnect().instrument(self.span.clone()).await?;
        Ok(())
    }

    /// Token for a new playback, replacing one left cancelled by an earlier stop
    fn arm(&self) -> CancellationToken {
        let mut token = self.cancel.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }
}

fn load_replay_set(config: &ReplayerConfig) -> Result<Vec<LogEntry>, ReplayError> {
    let db = Database::open_existing(config.database_path.clone())?;
    if !db.schema_exists()? {
        db.close()?;
        return Err(ReplayError::MissingSchema(config.database_path.clone()));
    }

    let filters = config
        .topics
        .as_deref()
        .map(|topics| to_like_patterns(topics));
    let logs = LogStore::new(db.clone());
    let entries = match config.run {
        Some(run_id) => logs.query_run_entries(run_id, filters.as_deref())?,
        None => logs.query_entries(filters.as_deref())?,
    };
    db.close()?;

    tracing::info!(entries = entries.len(), "Loaded replay set");
    Ok(entries)
}

async fn emit(
    bus: &dyn BusClient,
    entry: &LogEntry,
    deadline: Instant,
    token: CancellationToken,
) -> Emission {
    tokio::select! {
        biased;
        _ = token.cancelled() => Emission::Cancelled,
        _ = tokio::time::sleep_until(deadline) => {
            match bus.publish(&entry.topic, &entry.payload).await {
                Ok(()) => {
                    tracing::info!("{:>4} bytes -> {}", entry.payload.len(), entry.topic);
                    Emission::Published
                }
                Err(err) => {
                    tracing::error!(
                        topic = %entry.topic,
                        error = %err,
                        "Failed to publish message"
                    );
                    Emission::Failed
                }
            }
        }
    }
}

/// Speeds must be positive and finite
pub fn validate_speed(speed: f64) -> Result<(), ReplayError> {
    if speed.is_finite() && speed > 0.0 {
        Ok(())
    } else {
        Err(ReplayError::InvalidSpeed(speed))
    }
}

/// Delay of a capture time relative to the epoch, compressed by `speed`
fn scaled_offset(unix_time: f64, epoch: f64, speed: f64) -> Duration {
    let secs = ((unix_time - epoch) / speed).max(0.0);
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
