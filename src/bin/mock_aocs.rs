use std::path::Path;

use aocs_scoe::config::{self, EndpointConfig};
use aocs_scoe::server::MockAocsServer;
use clap::{App, Arg};
use colored::*;
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("mock-aocs")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  Mock AOCS endpoint - EDEN/PUS services over TCP")
        .arg(
            Arg::with_name("host")
                .long("host")
                .value_name("HOST")
                .help("Listen address")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Listen port")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .value_name("SEED")
                .help("Simulation RNG seed for reproducible runs")
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
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => config::load::<EndpointConfig>(Path::new(path))?,
        None => EndpointConfig::default(),
    };
    if let Some(host) = matches.value_of("host") {
        config.host = host.to_owned();
    }
    if let Some(port) = matches.value_of("port") {
        config.port = port.parse()?;
    }
    if let Some(seed) = matches.value_of("seed") {
        config.seed = Some(seed.parse()?);
    }

    println!("{}", "🛰️  Mock AOCS Endpoint".bright_blue().bold());
    println!("================================");

    let server = MockAocsServer::bind(config).await?;
    let addr = server.local_addr()?;
    println!("   Simulation Core: {}", "✓".green());
    println!("   Housekeeping Scheduler: {}", "✓".green());
    println!("   PUS Services 1/3/8/17/20: {}", "✓".green());
    println!(
        "{} Ready for telecommands on {}",
        "📡".bright_blue(),
        addr.to_string().bright_cyan()
    );

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n{}", "🛑 Shutting down...".yellow());
            shutdown.shutdown();
        }
    });

    if let Err(err) = server.serve().await {
        error!(%err, "endpoint error");
    }

    println!("{}", "Mock AOCS endpoint stopped".bright_green());
    Ok(())
}
