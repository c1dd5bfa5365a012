//! Data models for runs and captured messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned identifier of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub i64);

impl RunId {
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RunId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// One bounded recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    /// Wall-clock seconds since the Unix epoch when the run began
    pub start_unix_time: f64,
    /// Wall-clock seconds when the run ended (None while recording)
    pub end_unix_time: Option<f64>,
}

impl Run {
    pub fn is_active(&self) -> bool {
        self.end_unix_time.is_none()
    }

    /// Elapsed seconds between start and end, if the run has ended
    pub fn duration_secs(&self) -> Option<f64> {
        self.end_unix_time.map(|end| end - self.start_unix_time)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        datetime_from_unix(self.start_unix_time)
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.end_unix_time.and_then(datetime_from_unix)
    }
}

/// One captured message
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: i64,
    pub run_id: RunId,
    /// Capture wall-clock time in seconds since the Unix epoch
    pub unix_time: f64,
    pub topic: String,
    /// Raw payload, not necessarily valid UTF-8
    pub payload: Vec<u8>,
}

impl LogEntry {
    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Current wall-clock time as fractional Unix seconds (microsecond precision).
///
/// The wall clock may jump backwards; consumers must not assume monotonicity.
pub fn unix_time_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn datetime_from_unix(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1_000_000_000.0).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}
