//! joywake daemon
//!
//! Keeps the screen awake while game controllers are in use.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use joywake_config::LogLevel;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

#[derive(Parser, Debug)]
#[command(name = "joywaked")]
#[command(about = "Keeps the screen awake while game controllers are in use")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/joywake/config.kdl")]
    config: String,

    /// Minimum seconds between two wake attempts
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    cooldown: Option<u64>,

    /// Shell command to run as an extra waker
    #[arg(long)]
    command: Option<String>,

    /// Hold an idle-inhibition lease while controllers are active
    #[arg(long)]
    inhibit: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<LogLevel>,
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Install the subscriber. The returned handle lets the level be replaced
/// once the config file has been read.
fn init_tracing(level: Option<LogLevel>) -> FilterHandle {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or_default().as_filter()));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    handle
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = init_tracing(args.log_level);

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&args.config).into_owned().into();

    tracing::info!("Loading configuration from {}", config_path.display());

    let mut config = joywake_config::load_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    // Command line wins over the file
    if let Some(cooldown) = args.cooldown {
        config.cooldown = cooldown;
    }
    if let Some(command) = args.command {
        config.command = Some(command);
    }
    if args.inhibit {
        config.inhibit = true;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    if std::env::var_os("RUST_LOG").is_none() {
        filter
            .reload(EnvFilter::new(config.log_level.as_filter()))
            .context("Failed to apply log level")?;
    }

    let desktops = joywake_config::desktop_environments();
    if !desktops.is_empty() {
        tracing::debug!("Desktop environment: {}", desktops.join(":"));
    }

    joywake_daemon::daemon::run(&config, &desktops).await
}
