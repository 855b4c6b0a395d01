use std::process;

use clap::{Arg, ArgAction, Command};
use env_logger::Env;
use log::{error, info};
use tokio::signal;

mod config;
mod daemon;
mod stats;

use config::Config;
use daemon::Daemon;

const DEFAULT_CONFIG_PATH: &str = "/etc/mir/mird.toml";

#[tokio::main]
async fn main() {
    let matches = Command::new("mird")
        .version(env!("CARGO_PKG_VERSION"))
        .about("MIR Daemon - named-data forwarding daemon")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .help("Validate the configuration and exit")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);
    let check_only = matches.get_flag("check");

    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration {}: {}", config_path, e);
            process::exit(1);
        }
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(config.logging.level.as_str()))
        .init();

    info!("Config file: {}", config_path);

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        process::exit(1);
    }
    if check_only {
        info!("Configuration is valid");
        return;
    }

    info!("Starting MIR Daemon");
    let mut daemon = Daemon::new(config);

    if let Err(e) = daemon.start().await {
        error!("Failed to start daemon: {:#}", e);
        process::exit(1);
    }

    info!("MIR Daemon started successfully");

    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for ctrl+c: {}", e);
    }

    info!("Shutting down MIR Daemon");
    daemon.stop().await;
}
