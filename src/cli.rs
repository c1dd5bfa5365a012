//! Command-line harness
//!
//! - `mqtt-logger record` - Capture messages into a new run until Ctrl-C
//! - `mqtt-logger play` - Re-publish captured messages with their original timing
//! - `mqtt-logger runs` - List recorded runs
//!
//! Global flags override values from the config file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use crate::bus::MqttBusClient;
use crate::capture::{validate_speed, Recorder, Replayer};
use crate::config::{Config, ConfigError};
use crate::data::{Database, DatabaseError, LogStore, Run, RunId, RunStore};

/// Record MQTT traffic into SQLite and play it back
#[derive(Parser, Debug)]
#[command(name = "mqtt-logger")]
#[command(about = "Record MQTT traffic into SQLite and play it back with its original timing")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to <config dir>/mqtt-logger/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log every captured or replayed message
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// SQLite database file
    #[arg(long, global = true, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Broker host name or address
    #[arg(long, global = true, value_name = "ADDR")]
    pub broker: Option<String>,

    /// Broker port
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Connect over TLS
    #[arg(long, global = true)]
    pub tls: bool,

    /// Connect over TLS without verifying the server certificate
    #[arg(long, global = true)]
    pub tls_insecure: bool,

    #[arg(long, global = true, requires = "password")]
    pub username: Option<String>,

    #[arg(long, global = true, requires = "username")]
    pub password: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record messages into a new run until Ctrl-C (or --duration)
    Record(RecordArgs),

    /// Re-publish captured messages; Ctrl-C stops playback
    Play(PlayArgs),

    /// List recorded runs
    Runs(RunsArgs),
}

#[derive(Args, Debug)]
pub struct RecordArgs {
    /// Topic pattern to subscribe to (repeatable)
    #[arg(short, long = "topic", value_name = "TOPIC")]
    pub topics: Vec<String>,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECS")]
    pub duration: Option<u64>,
}

#[derive(Args, Debug)]
pub struct PlayArgs {
    /// Playback speed multiplier
    #[arg(short, long, allow_negative_numbers = true)]
    pub speed: Option<f64>,

    /// Only replay messages matching this topic pattern (repeatable)
    #[arg(short, long = "topic", value_name = "TOPIC")]
    pub topics: Vec<String>,

    /// Only replay messages of this run
    #[arg(long, value_name = "ID")]
    pub run: Option<i64>,
}

#[derive(Args, Debug)]
pub struct RunsArgs {
    /// Print runs as JSON
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Config from `--config`, or the user config file when present
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        match &self.config {
            Some(path) => Config::load_from(path),
            None => Config::load(),
        }
    }

    /// Apply command-line overrides on top of a loaded config
    pub fn apply_overrides(&self, config: &mut Config) {
        if self.verbose {
            config.verbose = true;
        }
        if let Some(path) = &self.database {
            config.sqlite_database_path = path.clone();
        }
        if let Some(address) = &self.broker {
            config.broker.address = address.clone();
        }
        if let Some(port) = self.port {
            config.broker.port = port;
        }
        if self.tls {
            config.broker.use_tls = true;
        }
        if self.tls_insecure {
            config.broker.tls_insecure = true;
        }
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            config.broker.username = Some(username.clone());
            config.broker.password = Some(password.clone());
        }

        let topics = match &self.command {
            Command::Record(args) => &args.topics,
            Command::Play(args) => &args.topics,
            Command::Runs(_) => return,
        };
        if !topics.is_empty() {
            config.topics = topics.clone();
        }
    }
}

/// Run the selected command
pub async fn run(cli: Cli, mut config: Config) -> Result<()> {
    cli.apply_overrides(&mut config);

    match cli.command {
        Command::Record(args) => record(&config, args).await,
        Command::Play(args) => play(&config, args).await,
        Command::Runs(args) => list_runs(&config, args),
    }
}

async fn record(config: &Config, args: RecordArgs) -> Result<()> {
    let bus = Arc::new(MqttBusClient::new(&config.broker));
    let recorder = Recorder::new(&config.recorder_config(), bus)
        .await
        .with_context(|| {
            format!(
                "Failed to start recording to {}",
                config.sqlite_database_path.display()
            )
        })?;

    let run_id = recorder.start()?;
    eprintln!(
        "Recording run {run_id} from {}:{} ({}), press Ctrl-C to stop",
        config.broker.address,
        config.broker.port,
        recorder.topics().join(", ")
    );

    match args.duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                Ok(()) = tokio::signal::ctrl_c() => {}
            }
        }
        None => tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?,
    }

    let run_id = recorder.stop().await.unwrap_or_else(|err| {
        tracing::error!(error = %err, "Failed to stop recording cleanly");
        run_id
    });

    let db = Database::open_existing(config.sqlite_database_path.clone())?;
    let count = LogStore::new(db.clone()).count_for_run(run_id)?;
    db.close()?;
    eprintln!("Recorded {count} messages in run {run_id}");
    Ok(())
}

async fn play(config: &Config, args: PlayArgs) -> Result<()> {
    let speed = args.speed.unwrap_or(config.speed);
    validate_speed(speed)?;

    let bus = Arc::new(MqttBusClient::new(&config.broker));
    let replayer = Replayer::new(&config.replayer_config(args.run.map(RunId)), bus)
        .await
        .with_context(|| {
            format!(
                "Failed to load replay set from {}",
                config.sqlite_database_path.display()
            )
        })?;

    eprintln!(
        "Replaying {} messages to {}:{} at {speed}x, press Ctrl-C to stop",
        replayer.len(),
        config.broker.address,
        config.broker.port
    );

    let playback = replayer.play(speed);
    tokio::pin!(playback);
    let result = tokio::select! {
        result = &mut playback => result,
        Ok(()) = tokio::signal::ctrl_c() => {
            replayer.stop();
            playback.await
        }
    };

    if let Err(err) = replayer.disconnect().await {
        tracing::warn!(error = %err, "Disconnect failed");
    }

    let report = result?;
    if report.was_interrupted() {
        eprintln!(
            "Playback interrupted: {} published, {} failed, {} skipped",
            report.published, report.failed, report.cancelled
        );
    } else {
        eprintln!(
            "Playback finished: {} published, {} failed",
            report.published, report.failed
        );
    }
    Ok(())
}

/// One line of `runs` output
#[derive(Debug, Serialize)]
struct RunSummary {
    #[serde(flatten)]
    run: Run,
    entries: u64,
}

fn list_runs(config: &Config, args: RunsArgs) -> Result<()> {
    let path = &config.sqlite_database_path;
    let db = Database::open_existing(path.clone())
        .with_context(|| format!("Failed to open {}", path.display()))?;
    if !db.schema_exists()? {
        bail!("No capture tables found in {}", path.display());
    }

    let logs = LogStore::new(db.clone());
    let summaries = RunStore::new(db.clone())
        .list()?
        .into_iter()
        .map(|run| {
            Ok(RunSummary {
                entries: logs.count_for_run(run.id)?,
                run,
            })
        })
        .collect::<Result<Vec<_>, DatabaseError>>()?;
    db.close()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    println!(
        "{:>5}  {:<19}  {:<19}  {:>10}  {:>8}",
        "RUN", "STARTED", "ENDED", "DURATION", "MESSAGES"
    );
    for summary in &summaries {
        println!("{}", format_run_line(summary));
    }
    Ok(())
}

fn format_run_line(summary: &RunSummary) -> String {
    const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    let started = summary
        .run
        .started_at()
        .map(|at| at.format(TIME_FORMAT).to_string())
        .unwrap_or_else(|| "-".to_string());
    let ended = match summary.run.ended_at() {
        Some(at) => at.format(TIME_FORMAT).to_string(),
        None if summary.run.is_active() => "recording".to_string(),
        None => "-".to_string(),
    };
    let duration = summary
        .run
        .duration_secs()
        .map(|secs| format!("{secs:.1}s"))
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{:>5}  {:<19}  {:<19}  {:>10}  {:>8}",
        summary.run.id, started, ended, duration, summary.entries
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("mqtt-logger").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_apply_on_top_of_config() {
        let cli = parse(&[
            "--database",
            "/tmp/other.db",
            "--broker",
            "10.0.0.5",
            "--port",
            "8883",
            "--tls",
            "--username",
            "user",
            "--password",
            "pass",
            "record",
            "--topic",
            "a/#",
            "-t",
            "b/+",
        ]);
        let mut config = Config::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.sqlite_database_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.broker.address, "10.0.0.5");
        assert_eq!(config.broker.port, 8883);
        assert!(config.broker.use_tls);
        assert_eq!(config.broker.credentials(), Some(("user", "pass")));
        assert_eq!(config.topics, vec!["a/#".to_string(), "b/+".to_string()]);
    }

    #[test]
    fn test_missing_flags_keep_config_values() {
        let cli = parse(&["play"]);
        let mut config = Config {
            topics: vec!["keep/#".to_string()],
            speed: 3.0,
            ..Config::default()
        };
        cli.apply_overrides(&mut config);

        assert_eq!(config.topics, vec!["keep/#".to_string()]);
        assert_eq!(config.broker.address, "localhost");
        assert!(!config.verbose);
    }

    #[test]
    fn test_username_requires_password() {
        let result = Cli::try_parse_from(["mqtt-logger", "--username", "user", "runs"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_play_accepts_negative_speed_for_validation() {
        let cli = parse(&["play", "--speed", "-1", "--run", "2"]);
        match cli.command {
            Command::Play(args) => {
                assert_eq!(args.speed, Some(-1.0));
                assert_eq!(args.run, Some(2));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_format_run_line() {
        let summary = RunSummary {
            run: Run {
                id: RunId(7),
                start_unix_time: 0.0,
                end_unix_time: Some(90.5),
            },
            entries: 12,
        };
        let line = format_run_line(&summary);
        assert!(line.contains("1970-01-01 00:00:00"));
        assert!(line.contains("1970-01-01 00:01:30"));
        assert!(line.contains("90.5s"));
        assert!(line.trim_end().ends_with("12"));

        let active = RunSummary {
            run: Run {
                id: RunId(8),
                start_unix_time: 0.0,
                end_unix_time: None,
            },
            entries: 0,
        };
        assert!(format_run_line(&active).contains("recording"));
    }
}
