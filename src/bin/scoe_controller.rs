use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aocs_scoe::client::ScoeLink;
use aocs_scoe::config::{self, ControllerConfig};
use aocs_scoe::decoder::{BufferedPointWriter, TelemetryStore};
use clap::{App, Arg};
use colored::*;

const STATUS_PERIOD: Duration = Duration::from_secs(2);
const POINT_BUFFER_CAPACITY: usize = 4096;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("scoe-controller")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🎛️  SCOE controller - drives the AOCS endpoint and caches telemetry")
        .arg(
            Arg::with_name("host")
                .long("host")
                .value_name("HOST")
                .help("AOCS endpoint address")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("AOCS endpoint port")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("quiet")
                .short("q")
                .long("quiet")
                .help("Suppress the periodic status line"),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => config::load::<ControllerConfig>(Path::new(path))?,
        None => ControllerConfig::default(),
    };
    if let Some(host) = matches.value_of("host") {
        config.aocs_host = host.to_owned();
    }
    if let Some(port) = matches.value_of("port") {
        config.aocs_port = port.parse()?;
    }
    let quiet = matches.is_present("quiet");

    println!("{}", "🎛️  SCOE Controller".bright_blue().bold());
    println!("================================");
    println!(
        "   Endpoint: {}",
        format!("{}:{}", config.aocs_host, config.aocs_port).bright_cyan()
    );

    // The buffered writer stands in for an external time-series sink; its
    // contents are drained with the status line so the buffer never fills.
    let store = Arc::new(TelemetryStore::new());
    let points = Arc::new(BufferedPointWriter::new(POINT_BUFFER_CAPACITY));
    store.add_sink(points.clone());

    let link = ScoeLink::spawn(config, Arc::clone(&store));

    let mut ticker = tokio::time::interval(STATUS_PERIOD);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let drained = points.drain().len();
                if quiet {
                    continue;
                }
                let status = link.status();
                let connected = if status.connected {
                    "CONNECTED".bright_green()
                } else {
                    "DISCONNECTED".bright_red()
                };
                let age = status
                    .last_update_seconds
                    .map(|age| format!("{age:.1}s ago"))
                    .unwrap_or_else(|| "never".to_owned());
                println!(
                    "{} link={} parameters={} last_update={} points={}",
                    "📡".bright_blue(),
                    connected,
                    status.telemetry_count,
                    age,
                    drained
                );
            }
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    println!("\n{}", "🛑 Shutting down...".yellow());
                }
                break;
            }
        }
    }

    link.shutdown();
    println!("{}", "SCOE controller stopped".bright_green());
    Ok(())
}
