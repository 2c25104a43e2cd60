//! usbctrl test harness
//!
//! Exercises the `usbctrl` device manager against the live udev database:
//! lists attached devices, queries single properties and prints hotplug
//! events until interrupted.

mod config;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use common::setup_logging;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use usbctrl::{
    DeviceId, DeviceManager, HotplugEvent, SUPPORTED_PROPERTIES, UdevSource, event_bridge,
};

type Manager = Arc<DeviceManager<UdevSource>>;

#[derive(Parser, Debug)]
#[command(name = "usbctrl-test")]
#[command(author, version, about = "usbctrl test harness - USB hotplug monitor")]
#[command(long_about = "
Test harness for the usbctrl device registry.

EXAMPLES:
    # Print hotplug events until Ctrl+C
    usbctrl-test watch

    # List attached devices with their properties
    usbctrl-test list

    # Query one property of one device
    usbctrl-test get 1 idVendor

    # Run with debug logging
    usbctrl-test --log-level debug watch

CONFIGURATION:
    The harness looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usbctrl/config.toml
    3. /etc/usbctrl/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices and exit
    List,
    /// Print one property of one device and exit
    Get {
        /// Device identifier as printed by `list`
        id: u32,
        /// Property key (e.g. idVendor, product)
        key: String,
    },
    /// Print hotplug events until interrupted (default)
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = config::HarnessConfig::default();
        let path = config::HarnessConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::HarnessConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        config::HarnessConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usbctrl-test v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let filter = config.monitor.filter();
    let manager: Manager = Arc::new(
        DeviceManager::open(&filter).context("Failed to open the device notification subsystem")?,
    );
    info!(
        "Monitoring subsystem '{}' (devtype: {})",
        filter.subsystem,
        filter.devtype.as_deref().unwrap_or("any")
    );

    // Enumeration and the monitor thread spawn block; keep them off the runtime
    run_blocking(&manager, |manager| manager.init())
        .await
        .context("Failed to initialize device manager")?;

    let result = match args.command.unwrap_or(Command::Watch) {
        Command::List => list_mode(&manager),
        Command::Get { id, key } => get_mode(&manager, DeviceId(id), &key),
        Command::Watch => watch_mode(&manager, config.events.queue_capacity).await,
    };

    info!("Shutting down device manager...");
    if let Err(e) = run_blocking(&manager, |manager| manager.terminate()).await {
        error!("Error shutting down device manager: {:#}", e);
    }

    result
}

async fn run_blocking<F>(manager: &Manager, op: F) -> Result<()>
where
    F: FnOnce(&DeviceManager<UdevSource>) -> usbctrl::Result<()> + Send + 'static,
{
    let manager = Arc::clone(manager);
    tokio::task::spawn_blocking(move || op(&manager))
        .await
        .context("Blocking task failed")?
        .map_err(Into::into)
}

fn list_mode(manager: &Manager) -> Result<()> {
    let devices = manager.devices();
    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for id in devices {
        let node = manager
            .device_node(id)
            .unwrap_or_else(|_| "<detached>".to_string());
        println!("Device {}: {}", id, node);
        for key in SUPPORTED_PROPERTIES {
            match manager.get_property(id, key) {
                Ok(value) => println!("  {:<14} {}", key, value),
                Err(e) if e.is_not_found() => println!("  {:<14} -", key),
                Err(e) => return Err(e.into()),
            }
        }
        println!();
    }

    Ok(())
}

fn get_mode(manager: &Manager, id: DeviceId, key: &str) -> Result<()> {
    let value = manager
        .get_property(id, key)
        .with_context(|| format!("Failed to read '{}' of device {}", key, id))?;
    println!("{}", value);
    Ok(())
}

async fn watch_mode(manager: &Manager, queue_capacity: usize) -> Result<()> {
    let (callback, events) = event_bridge(queue_capacity);
    let present = manager.register_shared_callback(callback);
    let resolver = manager.resolver();

    println!("{} device(s) present at startup", present.len());
    for id in &present {
        println!("  device {} ({})", id, describe(&resolver, *id));
    }
    println!("Waiting for hotplug events, press Ctrl+C to stop.");

    let mut hotplugged = Vec::new();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(HotplugEvent { id, connected: true }) => {
                    println!("device {} is connected ({})", id, describe(&resolver, id));
                    hotplugged.push(id);
                }
                Ok(HotplugEvent { id, connected: false }) => {
                    println!("device {} was removed", id);
                    hotplugged.retain(|seen| *seen != id);
                }
                Err(_) => {
                    warn!("Event stream closed");
                    break;
                }
            },
            res = signal::ctrl_c() => {
                res.map_err(|e| anyhow!("Failed to listen for Ctrl+C: {}", e))?;
                info!("Received Ctrl+C");
                break;
            }
        }
    }

    manager.unregister_callback();

    if !hotplugged.is_empty() {
        let ids: Vec<String> = hotplugged.iter().map(ToString::to_string).collect();
        println!("Hot-plugged devices still attached: {}", ids.join(", "));
    }

    Ok(())
}

fn describe(resolver: &usbctrl::PropertyResolver<UdevSource>, id: DeviceId) -> String {
    let product = resolver.get_property(id, "product");
    let node = resolver.device_node(id);
    match (product, node) {
        (Ok(product), Ok(node)) => format!("{} at {}", product, node),
        (Err(_), Ok(node)) => node,
        (_, Err(_)) => "gone".to_string(),
    }
}
