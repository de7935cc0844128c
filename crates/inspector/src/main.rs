//! usb-inspect
//!
//! Lists USB devices with their configurations, interfaces and endpoints,
//! reading each endpoint once, or watches hotplug events and tracks the
//! devices that come and go.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::setup_logging;
use inspector::config::{self, InspectorConfig};
use inspector::usb::{RusbBackend, TopologyWalker, TrackingMode, Watcher};
use model::{ConfigurationReport, DeviceReport, SessionEvent, TransitionOutcome};
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-inspect")]
#[command(
    author,
    version,
    about = "USB inspector - walk the device topology and watch hotplug events"
)]
#[command(long_about = "
Enumerates every USB device, classifies its interfaces, and reads each
endpoint once. In watch mode, opens devices as they arrive and closes
them as they leave.

EXAMPLES:
    # List devices and read every endpoint once
    usb-inspect

    # List devices as JSON without reading
    usb-inspect list --json --no-read

    # Watch hotplug events until the first device is opened
    usb-inspect watch --exit-after 1

    # Run with debug logging
    usb-inspect --log-level debug

CONFIGURATION:
    The inspector looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-inspect/inspector.toml
    3. /etc/usb-inspect/inspector.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk every device and print what was found (default)
    List {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Do not read endpoints
        #[arg(long)]
        no_read: bool,
    },

    /// Watch hotplug events until Ctrl+C
    Watch {
        /// Stop after this many devices were opened
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
        exit_after: Option<u64>,

        /// Track a single device at a time
        #[arg(long)]
        single_slot: bool,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,

        /// Read the first configuration of each opened device
        #[arg(long)]
        read: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = InspectorConfig::default();
        let path = InspectorConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::load_config(path).context("Failed to load configuration")?
    } else {
        InspectorConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-inspect v{}", env!("CARGO_PKG_VERSION"));
    debug!("Log level: {}", log_level);

    match args.command.unwrap_or(Command::List {
        json: false,
        no_read: false,
    }) {
        Command::List { json, no_read } => list_mode(&config, json, no_read).await,
        Command::Watch {
            exit_after,
            single_slot,
            json,
            read,
        } => watch_mode(&config, exit_after, single_slot, json, read).await,
    }
}

/// Walk the bus and print every device
async fn list_mode(config: &InspectorConfig, json: bool, no_read: bool) -> Result<()> {
    let mut options = config.walk_options()?;
    if no_read {
        options.read_endpoints = false;
    }

    let backend = Arc::new(RusbBackend::new().context("Failed to initialize USB")?);
    let reports = tokio::task::spawn_blocking(move || TopologyWalker::new(backend, options).walk())
        .await
        .context("USB walk task failed")?
        .context("Failed to enumerate USB devices")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("List of USB interfaces:");
    for report in &reports {
        print_device(report);
    }
    Ok(())
}

fn print_device(report: &DeviceReport) {
    match &report.descriptor {
        Some(descriptor) => println!(
            "Device {:04x}:{:04x} ({}, USB {})",
            descriptor.vendor_id,
            descriptor.product_id,
            report.address,
            descriptor.usb_version_string()
        ),
        None => println!("Device ????:???? ({})", report.address),
    }
    for error in &report.errors {
        println!("  Error: {}", error);
    }
    for configuration in &report.configurations {
        print_configuration(configuration);
    }
}

fn print_configuration(configuration: &ConfigurationReport) {
    for interface in &configuration.interfaces {
        println!("  Interface {}", interface.number);
        println!("   Class: {} {}", interface.class, interface.class_label);
        println!("   Subclass: {}", interface.subclass);
        println!("   Protocol: {} {}", interface.protocol, interface.protocol_label);

        for endpoint in &interface.endpoints {
            println!(
                "    Endpoint {:#04x} ({:?}, {:?})",
                endpoint.address, endpoint.direction, endpoint.transfer_type
            );
            println!("     Max Packet Length: {}", endpoint.max_packet_size);
            if let Some(read) = &endpoint.read {
                println!("     {}", read);
            }
            if let Some(decoded) = &endpoint.decoded {
                println!("     {:?}", decoded);
            }
        }
    }
}

/// Watch hotplug events until Ctrl+C or the arrival limit
async fn watch_mode(
    config: &InspectorConfig,
    exit_after: Option<u64>,
    single_slot: bool,
    json: bool,
    read: bool,
) -> Result<()> {
    let mut options = config.watch_options()?;
    if let Some(limit) = exit_after {
        options.exit_after_arrivals = Some(limit);
    }
    if single_slot {
        options.tracking = TrackingMode::SingleSlot;
    }
    let read_options = config.read_options();

    let backend = Arc::new(RusbBackend::new().context("Failed to initialize USB")?);
    let watcher = Watcher::spawn(backend, options).context("Failed to start hotplug watch")?;
    let events = watcher.events().clone();
    let session = watcher.session().clone();

    info!("Watching for USB hotplug events, press Ctrl+C to stop");

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                match result {
                    Ok(()) => info!("Received Ctrl+C, stopping watch..."),
                    Err(e) => error!("Error waiting for Ctrl+C: {}", e),
                }
                break;
            }
            event = events.recv() => {
                // The channel closes when the watch ends on its own
                let Ok(event) = event else { break };
                print_event(&event, json)?;

                if read && matches!(event.outcome, TransitionOutcome::Opened { .. }) {
                    let session = session.clone();
                    let address = event.device;
                    let result = tokio::task::spawn_blocking(move || {
                        session.read_configuration(address, &read_options)
                    })
                    .await
                    .context("Read task failed")?;

                    match result {
                        Ok(Some(configuration)) if json => {
                            println!("{}", serde_json::to_string(&configuration)?)
                        }
                        Ok(Some(configuration)) => print_configuration(&configuration),
                        Ok(None) => debug!("{} left before it could be read", address),
                        Err(e) => warn!("Failed to read {}: {}", address, e),
                    }
                }
            }
        }
    }

    let summary = tokio::task::spawn_blocking(move || watcher.stop())
        .await
        .context("Watch thread join failed")?
        .context("Hotplug watch failed")?;

    if json {
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        println!(
            "{} arrivals ({} opened), {} departures, {} unhandled",
            summary.arrivals, summary.opened, summary.departures, summary.unhandled
        );
        if let Some(first) = summary.first_device {
            let d = first.descriptor;
            println!(
                "Vendor:Device:USBType:Class:Subclass:Protocol = {:04x}:{:04x}:{:04x}:{:02x}:{:02x}:{:02x}",
                d.vendor_id, d.product_id, d.usb_version, d.class, d.subclass, d.protocol
            );
        }
    }
    Ok(())
}

fn print_event(event: &SessionEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!("{}", event);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_after_zero_rejected() {
        let err = Args::try_parse_from(["usb-inspect", "watch", "--exit-after", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_exit_after_accepts_positive() {
        let args = Args::try_parse_from(["usb-inspect", "watch", "--exit-after", "2"]).unwrap();
        match args.command {
            Some(Command::Watch { exit_after, .. }) => assert_eq!(exit_after, Some(2)),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_list_is_default() {
        let args = Args::try_parse_from(["usb-inspect"]).unwrap();
        assert!(args.command.is_none());
    }
}
