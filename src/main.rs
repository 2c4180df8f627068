//! Nightscout live-socket follower
//!
//! Connects to a Nightscout server's live socket, interprets its delta
//! updates and publishes named facts (latest glucose, pump status, cannula
//! and sensor age) into a local SQLite fact store.
//!
//! Usage:
//!   nslink                - Follow the configured server
//!   nslink path           - Show data file locations
//!   nslink --help         - Show help
//!   NSLINK_DBG=1 nslink   - Enable debug output

mod ages;
mod client;
mod config;
mod error;
mod interpret;
mod model;
mod store;

use std::env;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::client::Session;
use crate::config::{config_file_path, default_database_path, ensure_data_dir, get_data_dir, Config};
use crate::error::NsLinkError;
use crate::interpret::Interpreter;
use crate::store::Storage;

/// Pause between reconnect attempts
const RECONNECT_PAUSE: Duration = Duration::from_secs(5);

fn main() -> Result<(), NsLinkError> {
    let args: Vec<String> = env::args().collect();

    // Check for debug mode
    let debug_mode = env::var("NSLINK_DBG").is_ok();

    // Initialize logger
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if debug_mode { "debug" } else { "info" }),
    )
    .format_timestamp(None)
    .init();

    // Ensure data directory exists
    if let Err(e) = ensure_data_dir() {
        eprintln!("Warning: Could not create data directory: {}", e);
    }

    // Create default config if it doesn't exist
    let cfg_path = config_file_path();
    if !cfg_path.exists() {
        if let Err(e) = Config::create_default(&cfg_path) {
            warn!("Could not create default config: {}", e);
        }
    }

    // Try loading config from data directory first, then current directory
    let config = Config::load(config_file_path())
        .or_else(|_| Config::load("config.txt"))
        .unwrap_or_else(|e| {
            warn!("Could not load config: {}. Using defaults.", e);
            Config::default()
        });

    match args.get(1).map(|s| s.as_str()) {
        None => cmd_follow(&config),
        Some("path") | Some("paths") => {
            cmd_show_paths();
            Ok(())
        }
        Some("--version") | Some("-V") => {
            println!("nslink {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        _ => {
            print_help();
            Ok(())
        }
    }
}

/// Follow the configured server until interrupted
fn cmd_follow(config: &Config) -> Result<(), NsLinkError> {
    // Use configured path or default OS-specific path
    let db_path = config
        .database_path
        .clone()
        .unwrap_or_else(|| default_database_path().to_string_lossy().to_string());

    let storage = Storage::new(&db_path)?;
    let interpreter = Interpreter::new(&storage);
    info!("publishing facts to {}", db_path);

    // Deliberately dumb retry: connect, follow until the session ends, pause
    loop {
        match Session::connect(config) {
            Ok(mut session) => {
                if let Err(e) = client::run(&mut session, &interpreter) {
                    error!("session error: {}", e);
                }
            }
            Err(e) => error!("connection failed: {}", e),
        }
        info!("reconnecting in {:?}", RECONNECT_PAUSE);
        thread::sleep(RECONNECT_PAUSE);
    }
}

/// Show data paths
fn cmd_show_paths() {
    println!("nslink Data Paths:");
    println!("  Data directory:  {}", get_data_dir().display());
    println!("  Database:        {}", default_database_path().display());
    println!("  Config file:     {}", config_file_path().display());
}

fn print_help() {
    eprintln!("nslink v{} - Nightscout live-socket follower", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("  nslink                      Follow the configured server");
    eprintln!("  nslink path                 Show data file locations");
    eprintln!("  nslink --help               Show this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("  NSLINK_DBG=1                Enable debug output");
    eprintln!();
    eprintln!("DATA LOCATIONS:");
    eprintln!("  Database:  {}", default_database_path().display());
    eprintln!("  Config:    {}", config_file_path().display());
}
