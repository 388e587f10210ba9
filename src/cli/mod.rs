pub mod config;
pub mod handlers;

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};
use std::{path::Path, sync::Arc, time::Duration};

use crate::{
    api::courier::{Courier, CourierState, LoggingListener},
    protocol::{
        codec::RawFrame,
        ports::{available_ports_sorted, describe_port},
        transport::SerialTransport,
    },
};
use config::CourierConfig;
use handlers::ChannelListener;

/// How often the runner reports on comms health while no events arrive
const HEALTH_REPORT_INTERVAL: Duration = Duration::from_secs(5);

pub fn build_command() -> Command {
    Command::new("ptalk")
        .about("Poll a serial slave device and print every response")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("TOML configuration file")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .help("Serial port the slave is attached to")
                .value_name("PORT"),
        )
        .arg(
            Arg::new("baud")
                .long("baud")
                .short('b')
                .help("Baud rate")
                .value_name("BAUD")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("interval")
                .long("interval")
                .short('i')
                .help("Poll interval in milliseconds")
                .value_name("MS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .short('t')
                .help("Response timeout in milliseconds")
                .value_name("MS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("command")
                .long("command")
                .help("Command frame sent every cycle, as hex (e.g. \"02 08 10 7F\")")
                .value_name("HEX"),
        )
        .arg(
            Arg::new("max-response")
                .long("max-response")
                .help("Maximum response size in bytes")
                .value_name("BYTES")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .short('l')
                .help("List all available serial ports and exit")
                .action(clap::ArgAction::SetTrue),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    build_command().get_matches()
}

/// Merge the config file (if any) with command line overrides
pub fn resolve_config(matches: &ArgMatches) -> Result<CourierConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => CourierConfig::load(Path::new(path))?,
        None => CourierConfig::default(),
    };

    if let Some(port) = matches.get_one::<String>("port") {
        config.port_name = port.clone();
    }
    if let Some(baud) = matches.get_one::<u32>("baud") {
        config.baud_rate = *baud;
    }
    if let Some(interval) = matches.get_one::<u64>("interval") {
        config.poll_interval_ms = *interval;
    }
    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        config.timeout_ms = *timeout;
    }
    if let Some(command) = matches.get_one::<String>("command") {
        config.command = command.clone();
    }
    if let Some(max) = matches.get_one::<usize>("max-response") {
        config.max_response_size = *max;
    }

    config.validate()?;
    Ok(config)
}

pub fn list_ports() {
    let ports = available_ports_sorted();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in &ports {
        println!("{}", describe_port(port));
    }
}

/// Run a courier until Ctrl-C, printing every decoded response
pub fn run(matches: &ArgMatches) -> Result<()> {
    if matches.get_flag("list-ports") {
        list_ports();
        return Ok(());
    }

    let config = resolve_config(matches)?;
    let codec = config.build_codec()?;
    let transport =
        SerialTransport::open(&config.port_name, config.baud_rate, config.timeout())?;

    let courier = Arc::new(Courier::new(
        Box::new(transport),
        codec,
        config.poll_interval_ms,
    )?);

    let (listener, events) = ChannelListener::<RawFrame>::new();
    let listener = Arc::new(listener);
    let logger = Arc::new(LoggingListener);
    courier.register(&listener);
    courier.register(&logger);

    {
        let courier = Arc::clone(&courier);
        ctrlc::set_handler(move || courier.stop())
            .map_err(|err| anyhow!("Failed to install Ctrl-C handler: {err}"))?;
    }

    courier.start()?;
    log::info!(
        "Polling {} every {} ms",
        config.port_name,
        config.poll_interval_ms
    );

    let mut fault_reported = false;
    while courier.state() != CourierState::Stopped {
        match events.recv_timeout(HEALTH_REPORT_INTERVAL.min(courier.poll_interval() * 10)) {
            Ok(event) => println!(
                "[{}] #{} {}",
                event.received_at().format("%H:%M:%S%.3f"),
                event.cycle(),
                event.payload()
            ),
            Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }

        // The courier never restores health by itself, so one report is enough
        if !fault_reported && !courier.is_comms_healthy() {
            eprintln!("Comms fault on {}, still polling", config.port_name);
            fault_reported = true;
        }
    }

    courier.join().context("Courier loop did not shut down cleanly")?;

    let stats = courier.stats();
    log::info!("Final courier stats: {stats:?}");
    eprintln!("{}", toml::to_string(&stats).unwrap_or_default());
    Ok(())
}
