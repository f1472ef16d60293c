//! joywake CLI
//!
//! Checks the configuration and shows which devices the daemon would watch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use joywake_daemon::device::{self, DeviceInfo};
use joywake_daemon::watcher::DEFAULT_PREFERRED_PREFIX;

#[derive(Parser, Debug)]
#[command(name = "joywake")]
#[command(about = "Inspect joywake configuration and devices")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/joywake/config.kdl")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file
    Validate,

    /// List joystick devices
    Devices,
}

fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&cli.config).into_owned().into();

    match cli.command {
        Commands::Validate => cmd_validate(&config_path),
        Commands::Devices => cmd_devices(),
    }
}

fn cmd_validate(config_path: &Path) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = joywake_config::parse_config(config_path)?;
    let desktops = joywake_config::desktop_environments();
    let chain = joywake_daemon::waker::build_chain(&config, &desktops)
        .map_err(|e| miette::miette!("{}", e))?;

    println!("Configuration is valid!");
    println!("  Log level: {}", config.log_level.as_filter());
    println!("  Cooldown: {}s", config.cooldown);
    if let Some(command) = &config.command {
        println!("  Command: {}", command);
    }
    println!("  Inhibit idle: {}", if config.inhibit { "yes" } else { "no" });
    println!(
        "  Desktop: {}",
        if desktops.is_empty() {
            "<unknown>".to_string()
        } else {
            desktops.join(":")
        }
    );
    println!("  Wakers: {}", chain.len());
    for waker in &chain {
        println!("    - {}", waker.name());
    }

    Ok(())
}

/// Name the kernel reports for an evdev node
fn evdev_name(node: &Path) -> Option<String> {
    let device = evdev::Device::open(node).ok()?;
    device.name().map(str::to_string)
}

fn cmd_devices() -> miette::Result<()> {
    let devices = device::enumerate_joysticks().map_err(|e| miette::miette!("{:#}", e))?;

    if devices.is_empty() {
        println!("No joysticks found.");
        return Ok(());
    }

    // Interfaces of one controller share a parent
    let mut by_parent: BTreeMap<&str, Vec<&DeviceInfo>> = BTreeMap::new();
    for device in &devices {
        by_parent.entry(device.parent_key.as_str()).or_default().push(device);
    }

    println!("Joysticks:\n");

    for (parent, interfaces) in by_parent {
        let name = interfaces
            .iter()
            .filter_map(|device| device.node().and_then(evdev_name))
            .next()
            .unwrap_or_else(|| "Unknown".to_string());
        let id = interfaces
            .iter()
            .find_map(|device| device.vendor_product())
            .unwrap_or_else(|| "????:????".to_string());

        println!("  {} [{}]", name, id);
        println!("    Parent: {}", parent);
        for device in interfaces {
            let marker = if device.sys_name.starts_with(DEFAULT_PREFERRED_PREFIX) {
                " (preferred)"
            } else {
                ""
            };
            let node = device
                .node()
                .map(|node| node.display().to_string())
                .unwrap_or_default();
            println!("    {}: {}{}", device.sys_name, node, marker);
        }
        println!();
    }

    Ok(())
}
