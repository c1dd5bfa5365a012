use anyhow::Result;
use clap::Parser;
use mqtt_logger::{cli, Cli, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Loaded before logging is set up so the file can turn on verbose output
    let loaded = cli.load_config();
    let verbose = cli.verbose || loaded.as_ref().is_ok_and(|config| config.verbose);

    let level = if verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match loaded {
        Ok(config) => config,
        // A broken default config file is not fatal, an explicit one is
        Err(err) if cli.config.is_none() => {
            tracing::warn!(error = %err, "Ignoring config file");
            Config::default()
        }
        Err(err) => return Err(err.into()),
    };

    cli::run(cli, config).await
}
