//! BikeSpeed - Cycling Speed & Cadence sensor client
//!
//! Main entry point for the command-line application.

use anyhow::Context;
use bikespeed::metrics::RideSnapshot;
use bikespeed::sensors::{
    BleCentral, CentralCoordinator, EventSink, LinkEvent, SensorEvent, SensorIdentity,
};
use bikespeed::storage::config::{get_config_path, load_config_from, AppConfig, SensorSettings};
use bikespeed::{MonitorOptions, RideMonitor};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "bikespeed")]
#[command(about = "Read speed, cadence and distance from a BLE CSC sensor", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List nearby Cycling Speed and Cadence sensors
    Scan {
        /// Scan duration in seconds (default from config)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Connect to a sensor and print live readings
    Ride {
        /// Device id of the sensor (defaults to the last one used)
        #[arg(long)]
        sensor: Option<String>,

        /// Wheel circumference in millimeters
        #[arg(long)]
        wheel: Option<u32>,

        /// Connect to the first sensor found
        #[arg(long)]
        first: bool,

        /// Print readings as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct ReadingLine<'a> {
    sensor: &'a str,
    #[serde(flatten)]
    snapshot: RideSnapshot,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting BikeSpeed v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(get_config_path);
    let config = load_config_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    match cli.command {
        Command::Scan { timeout } => {
            let timeout = timeout.unwrap_or(config.sensor.scan_timeout_secs);
            scan(Duration::from_secs(timeout)).await
        }
        Command::Ride {
            sensor,
            wheel,
            first,
            json,
        } => {
            let mut config = config;
            if let Some(mm) = wheel {
                config
                    .sensor
                    .set_wheel_circumference(mm)
                    .context("invalid --wheel")?;
            }
            let options = MonitorOptions {
                sensor_id: sensor,
                auto_connect_first: first,
                config_path: Some(config_path),
            };
            ride(config, options, json).await
        }
    }
}

async fn scan(timeout: Duration) -> anyhow::Result<()> {
    let (link_tx, mut link_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = crossbeam::channel::unbounded();

    let central = BleCentral::new(link_tx)
        .await
        .context("opening Bluetooth adapter")?;
    let mut coordinator = CentralCoordinator::new(central, Box::new(EventSink::new(event_tx)));

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut requested = false;
    loop {
        if !requested && coordinator.adapter_state().is_powered_on() {
            coordinator.start_scan().context("starting scan")?;
            requested = true;
        }

        tokio::select! {
            Some(event) = link_rx.recv() => {
                if let LinkEvent::Adapter(event) = event {
                    coordinator.handle_event(event);
                }
            }
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }

        while let Ok(event) = event_rx.try_recv() {
            match event {
                SensorEvent::Discovered(identity) => {
                    println!("{:<40} {}", identity.device_id, identity.name.as_deref().unwrap_or("-"));
                }
                SensorEvent::AdapterStateChanged(state) => println!("{}", state),
                SensorEvent::CentralError(error) => eprintln!("{}", error),
                _ => {}
            }
        }
    }

    coordinator.stop_scan().context("stopping scan")?;
    Ok(())
}

async fn ride(config: AppConfig, options: MonitorOptions, json: bool) -> anyhow::Result<()> {
    if options.sensor_id.is_none()
        && !options.auto_connect_first
        && config.sensor.last_sensor_id.is_none()
    {
        anyhow::bail!("no sensor selected: pass --sensor <id> or --first, or run `bikespeed scan`");
    }
    if !SensorSettings::validate_wheel_circumference(config.sensor.wheel_circumference_mm) {
        anyhow::bail!("invalid wheel circumference in configuration");
    }

    let (link_tx, mut link_rx) = mpsc::unbounded_channel();
    let central = BleCentral::new(link_tx)
        .await
        .context("opening Bluetooth adapter")?;
    let mut monitor = RideMonitor::new(central, config, options);

    let events = monitor.begin();
    report(&monitor, events, json);

    loop {
        tokio::select! {
            Some(event) = link_rx.recv() => {
                let events = monitor.handle_link_event(event);
                report(&monitor, events, json);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let events = monitor.shutdown();
    report(&monitor, events, json);
    Ok(())
}

fn report<C: bikespeed::sensors::CentralLink>(
    monitor: &RideMonitor<C>,
    events: Vec<SensorEvent>,
    json: bool,
) {
    for event in events {
        match event {
            SensorEvent::Reading { identity, .. } => print_reading(monitor, &identity, json),
            SensorEvent::AdapterStateChanged(state) => eprintln!("{}", state),
            SensorEvent::Connected(identity) => eprintln!("Connected to {}", identity),
            SensorEvent::Ready(identity) => eprintln!("{} ready", identity.display_name()),
            SensorEvent::ConnectionFailed { identity, error } => {
                eprintln!("Error connecting to {}: {}", identity, error)
            }
            SensorEvent::Disconnected { identity, .. } => eprintln!("{} disconnected", identity),
            SensorEvent::Error { identity, error } => eprintln!("{}: {}", identity, error),
            SensorEvent::CentralError(error) => eprintln!("{}", error),
            _ => {}
        }
    }
}

fn print_reading<C: bikespeed::sensors::CentralLink>(
    monitor: &RideMonitor<C>,
    identity: &SensorIdentity,
    json: bool,
) {
    let snapshot = monitor.odometer().snapshot();

    if json {
        let line = ReadingLine {
            sensor: &identity.device_id,
            snapshot,
        };
        match serde_json::to_string(&line) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Failed to encode reading: {}", e),
        }
        return;
    }

    let speed = snapshot
        .speed_kmh
        .map(|s| format!("{:.1} km/h", s))
        .unwrap_or_else(|| "N/A".to_string());
    let cadence = snapshot
        .cadence_rpm
        .map(|c| format!("{:.2} RPM", c))
        .unwrap_or_else(|| "N/A".to_string());
    let distance = snapshot
        .distance_m
        .map(|d| {
            if d >= 1000.0 {
                format!("{:.1} km", d / 1000.0)
            } else {
                format!("{:.1} m", d)
            }
        })
        .unwrap_or_else(|| "N/A".to_string());

    println!("Speed: {:>12} | Cadence: {:>11} | Distance: {}", speed, cadence, distance);
}
