//! Recording bus traffic into runs and replaying it with its original timing

mod recorder;
mod replayer;

pub use recorder::{Recorder, RecorderConfig, RecorderError, RecorderState};
pub use replayer::{
    validate_speed, PlaybackReport, ReplayError, Replayer, ReplayerConfig, ScheduledEmission,
};
