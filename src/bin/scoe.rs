use std::sync::Arc;
use std::time::Duration;

use aocs_scoe::client::ScoeLink;
use aocs_scoe::config::{ControllerConfig, DEFAULT_ENDPOINT_PORT};
use aocs_scoe::decoder::TelemetryStore;
use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;

const DEFAULT_HOST: &str = "127.0.0.1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(6);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("scoe")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  AOCS SCOE operator CLI - sends EDEN/PUS telecommands")
        .arg(
            Arg::with_name("host")
                .long("host")
                .value_name("HOST")
                .help("AOCS endpoint address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("AOCS endpoint port")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("ping")
                .about("🏓 Connection test (TC[17,1], expects TM[17,2])"),
        )
        .subcommand(SubCommand::with_name("status").about("📊 Link status and telemetry summary"))
        .subcommand(
            SubCommand::with_name("sim")
                .about("⚙️  Simulation lifecycle")
                .arg(
                    Arg::with_name("action")
                        .help("Lifecycle action")
                        .required(true)
                        .possible_values(&["start", "stop", "reset", "self-test"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("rw")
                .about("🔄 Reaction wheel torque command")
                .arg(Arg::with_name("wheel").help("Wheel index 0-3").required(true))
                .arg(
                    Arg::with_name("torque")
                        .help("Commanded torque in N·m (clamped to ±0.2)")
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("thruster")
                .about("🔥 Thruster firing control")
                .arg(Arg::with_name("id").help("Thruster index 0-3").required(true))
                .arg(
                    Arg::with_name("state")
                        .help("Firing state")
                        .required(true)
                        .possible_values(&["on", "off"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("torquerod")
                .about("🧲 Torque rod dipole command")
                .arg(Arg::with_name("id").help("Rod index 0-2").required(true))
                .arg(
                    Arg::with_name("dipole")
                        .help("Dipole moment in A·m² (saturated at ±50)")
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("sada")
                .about("☀️  SADA angle command")
                .arg(Arg::with_name("id").help("SADA index 0-1").required(true))
                .arg(Arg::with_name("angle").help("Commanded angle in degrees").required(true)),
        )
        .subcommand(
            SubCommand::with_name("hk")
                .about("📦 Housekeeping report control")
                .subcommand(
                    SubCommand::with_name("enable")
                        .about("Enable periodic reports for a structure")
                        .arg(Arg::with_name("id").help("Structure id").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("disable")
                        .about("Disable periodic reports for a structure")
                        .arg(Arg::with_name("id").help("Structure id").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("request")
                        .about("One-shot report for a structure")
                        .arg(Arg::with_name("id").help("Structure id").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("interval")
                        .about("Change a structure's report interval")
                        .arg(Arg::with_name("id").help("Structure id").required(true))
                        .arg(Arg::with_name("seconds").help("Interval in seconds").required(true)),
                ),
        )
        .subcommand(
            SubCommand::with_name("param")
                .about("🔧 Parameter management (staged writes)")
                .subcommand(
                    SubCommand::with_name("set")
                        .about("Stage one parameter write (TC[20,3])")
                        .arg(Arg::with_name("id").help("Parameter id").required(true))
                        .arg(Arg::with_name("value").help("Parameter value").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("apply")
                        .about("Commit all staged writes atomically"),
                ),
        )
        .subcommand(
            SubCommand::with_name("raw")
                .about("📨 Raw telecommand")
                .arg(Arg::with_name("service").help("PUS service").required(true))
                .arg(Arg::with_name("subtype").help("PUS subtype").required(true))
                .arg(Arg::with_name("data").help("Hex-encoded payload")),
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("📡 Stream decoded housekeeping telemetry")
                .arg(
                    Arg::with_name("count")
                        .short("n")
                        .long("count")
                        .value_name("N")
                        .help("Stop after N snapshots")
                        .takes_value(true),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port: u16 = match matches.value_of("port") {
        Some(port) => port.parse()?,
        None => DEFAULT_ENDPOINT_PORT,
    };
    let format = matches.value_of("format").unwrap_or("table").to_owned();

    match matches.subcommand() {
        ("ping", _) => {
            let link = connect(host, port).await?;
            let ok = link.send_connection_test().await?;
            print_result("Connection test", ok, &format);
            link.shutdown();
        }
        ("status", _) => {
            let link = connect(host, port).await?;
            // Give periodic housekeeping a moment to land.
            tokio::time::sleep(Duration::from_millis(1500)).await;
            print_status(&link, &format);
            link.shutdown();
        }
        ("sim", Some(sub)) => {
            let link = connect(host, port).await?;
            let action = sub.value_of("action").unwrap_or("start");
            let ok = match action {
                "stop" => link.stop_simulation().await?,
                "reset" => link.reset_simulation().await?,
                "self-test" => link.run_self_test().await?,
                _ => link.start_simulation().await?,
            };
            print_result(&format!("Simulation {action}"), ok, &format);
            link.shutdown();
        }
        ("rw", Some(sub)) => {
            let wheel: u8 = required(sub, "wheel")?.parse()?;
            let torque: f32 = required(sub, "torque")?.parse()?;
            let link = connect(host, port).await?;
            let ok = link.set_rw_torque(wheel, torque).await?;
            print_result(&format!("RW{wheel} torque {torque} N·m"), ok, &format);
            link.shutdown();
        }
        ("thruster", Some(sub)) => {
            let id: u8 = required(sub, "id")?.parse()?;
            let firing = required(sub, "state")? == "on";
            let link = connect(host, port).await?;
            let ok = link.set_thruster(id, firing).await?;
            print_result(
                &format!("Thruster {id} {}", if firing { "ON" } else { "OFF" }),
                ok,
                &format,
            );
            link.shutdown();
        }
        ("torquerod", Some(sub)) => {
            let id: u8 = required(sub, "id")?.parse()?;
            let dipole: f32 = required(sub, "dipole")?.parse()?;
            let link = connect(host, port).await?;
            let ok = link.set_torque_rod(id, dipole).await?;
            print_result(&format!("Torque rod {id} dipole {dipole} A·m²"), ok, &format);
            link.shutdown();
        }
        ("sada", Some(sub)) => {
            let id: u8 = required(sub, "id")?.parse()?;
            let angle: f32 = required(sub, "angle")?.parse()?;
            let link = connect(host, port).await?;
            let ok = link.set_sada_angle(id, angle).await?;
            print_result(&format!("SADA {id} angle {angle}°"), ok, &format);
            link.shutdown();
        }
        ("hk", Some(sub)) => {
            let link = connect(host, port).await?;
            match sub.subcommand() {
                ("enable", Some(args)) => {
                    let id: u16 = required(args, "id")?.parse()?;
                    let ok = link.enable_hk_report(id).await?;
                    print_result(&format!("HK {id} enable"), ok, &format);
                }
                ("disable", Some(args)) => {
                    let id: u16 = required(args, "id")?.parse()?;
                    let ok = link.disable_hk_report(id).await?;
                    print_result(&format!("HK {id} disable"), ok, &format);
                }
                ("request", Some(args)) => {
                    let id: u16 = required(args, "id")?.parse()?;
                    let ok = link.request_hk_report(id).await?;
                    print_result(&format!("HK {id} one-shot"), ok, &format);
                }
                ("interval", Some(args)) => {
                    let id: u16 = required(args, "id")?.parse()?;
                    let seconds: f32 = required(args, "seconds")?.parse()?;
                    let ok = link.set_hk_interval(id, seconds).await?;
                    print_result(&format!("HK {id} interval {seconds}s"), ok, &format);
                }
                _ => println!(
                    "{}",
                    "HK subcommand required. Use 'scoe hk --help' for options.".yellow()
                ),
            }
            link.shutdown();
        }
        ("param", Some(sub)) => {
            let link = connect(host, port).await?;
            match sub.subcommand() {
                ("set", Some(args)) => {
                    let id: u16 = required(args, "id")?.parse()?;
                    let value: f32 = required(args, "value")?.parse()?;
                    let ok = link.stage_parameter(id, value).await?;
                    print_result(&format!("Stage parameter {id} = {value}"), ok, &format);
                }
                ("apply", _) => {
                    let ok = link.apply_parameters().await?;
                    print_result("Apply staged parameters", ok, &format);
                }
                _ => println!(
                    "{}",
                    "Param subcommand required. Use 'scoe param --help' for options.".yellow()
                ),
            }
            link.shutdown();
        }
        ("raw", Some(sub)) => {
            let service: u8 = required(sub, "service")?.parse()?;
            let subtype: u8 = required(sub, "subtype")?.parse()?;
            let data = match sub.value_of("data") {
                Some(text) => hex::decode(text)?,
                None => Vec::new(),
            };
            let link = connect(host, port).await?;
            let ok = link.send_raw(service, subtype, &data).await?;
            print_result(&format!("TC[{service},{subtype}]"), ok, &format);
            link.shutdown();
        }
        ("monitor", Some(sub)) => {
            let count: Option<u64> = match sub.value_of("count") {
                Some(n) => Some(n.parse()?),
                None => None,
            };
            monitor(host, port, count, &format).await?;
        }
        _ => {
            println!("{}", "🛰️  AOCS SCOE operator CLI".bright_blue().bold());
            println!();
            println!("{}", "Quick start:".bright_green());
            println!("  {} Start the endpoint", "mock-aocs".bright_cyan());
            println!("  {} Test the link", "scoe ping".bright_cyan());
            println!("  {} Start the simulation", "scoe sim start".bright_cyan());
            println!("  {} Watch telemetry", "scoe monitor".bright_cyan());
        }
    }

    Ok(())
}

/// Dial the endpoint with a short retry period and wait for the link.
async fn connect(host: &str, port: u16) -> Result<ScoeLink, Box<dyn std::error::Error>> {
    let config = ControllerConfig {
        aocs_host: host.to_owned(),
        aocs_port: port,
        retry_period_ms: 1000,
        ..ControllerConfig::default()
    };
    let store = Arc::new(TelemetryStore::new());
    let link = ScoeLink::spawn(config, store);

    if !link.wait_connected(CONNECT_TIMEOUT).await {
        link.shutdown();
        return Err(format!("could not reach AOCS endpoint at {host}:{port}").into());
    }
    Ok(link)
}

fn required<'a>(matches: &'a ArgMatches<'_>, name: &str) -> Result<&'a str, String> {
    matches
        .value_of(name)
        .ok_or_else(|| format!("missing argument: {name}"))
}

fn print_result(action: &str, ok: bool, format: &str) {
    match format {
        "json" => println!("{}", serde_json::json!({ "action": action, "success": ok })),
        "compact" => println!("{}", if ok { "OK".bright_green() } else { "FAIL".bright_red() }),
        _ => {
            if ok {
                println!("{} {}", "✅".green(), format!("{action} verified").bright_green());
            } else {
                println!("{} {}", "❌".red(), format!("{action} failed").bright_red());
            }
        }
    }
}

fn print_status(link: &ScoeLink, format: &str) {
    let status = link.status();
    match format {
        "json" => {
            let payload = serde_json::json!({
                "status": status,
                "telemetry": link.store().snapshot(),
            });
            println!("{payload}");
        }
        "compact" => println!(
            "{} {} params",
            if status.connected {
                "CONNECTED".bright_green()
            } else {
                "DISCONNECTED".bright_red()
            },
            status.telemetry_count
        ),
        _ => {
            println!("{} {}", "📊".bright_blue(), "Link Status".bright_blue().bold());
            println!(
                "{} {}",
                "Connected:".bright_white(),
                if status.connected {
                    "yes".bright_green()
                } else {
                    "no".bright_red()
                }
            );
            println!(
                "{} {}",
                "Parameters cached:".bright_white(),
                status.telemetry_count.to_string().bright_cyan()
            );
            if let Some(age) = status.last_update_seconds {
                println!(
                    "{} {}",
                    "Last update:".bright_white(),
                    format!("{age:.1}s ago").bright_cyan()
                );
            }
        }
    }
}

async fn monitor(
    host: &str,
    port: u16,
    count: Option<u64>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "{}",
        "📡 Monitoring housekeeping telemetry (Press Ctrl+C to stop)..."
            .bright_blue()
            .bold()
    );

    let link = connect(host, port).await?;
    let mut updates = link.store().subscribe(16);
    let mut seen = 0u64;

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(snapshot) = update else { break };
                seen += 1;
                match format {
                    "json" => println!("{}", serde_json::json!(snapshot.values)),
                    "compact" => {
                        let time = snapshot.values.get("sim_time").copied().unwrap_or(0.0);
                        println!("t={time:<10.2} parameters={}", snapshot.values.len());
                    }
                    _ => {
                        let mut names: Vec<_> = snapshot.values.keys().collect();
                        names.sort();
                        println!("{}", format!("--- update {seen} ---").dimmed());
                        for name in names {
                            println!("  {:<20} {:>14.4}", name, snapshot.values[name]);
                        }
                    }
                }
                if count.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    link.shutdown();
    Ok(())
}
