//! Serve static files out of a bounded in-memory cache, one scheduled
//! quantum at a time.
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::error;

mod app_config;
mod http;
mod server;
mod trc;

use crate::app_config::Config;
use crate::trc::Trc;

#[derive(Parser)]
#[command(
    version,
    about = "Static file server with cache-backed, scheduled transfers."
)]
struct Args {
    #[arg(
        short,
        long,
        value_parser,
        help = "Optional path to a fairserve config TOML."
    )]
    config_path: Option<PathBuf>,

    /// Address to listen on, overriding the configuration.
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Directory to serve files from, overriding the configuration.
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Scheduling policy (SJF, RR or MLFB), overriding the configuration.
    #[arg(short, long)]
    policy: Option<String>,
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    // Load config first so overrides land before validation.
    // Errors use eprintln since tracing isn't initialized yet.
    let mut config = Config::load_or_create(args.config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });
    config.apply_overrides(args.listen, args.root, args.policy);
    if let Err(error_messages) = config.validate() {
        eprintln!("Configuration is invalid.");
        for msg in &error_messages {
            eprintln!(" - {msg}");
        }
        std::process::exit(1);
    }

    Trc::default().init().unwrap_or_else(|e| {
        eprintln!(
            "Failed to initialize logging. Without logging, we can't provide any useful error \
             messages, so we have to exit: {e}"
        );
        std::process::exit(1);
    });

    if let Err(e) = server::run(&config) {
        error!("Server failed: {e}");
        std::process::exit(1);
    }
}
