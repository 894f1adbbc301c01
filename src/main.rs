mod api;
mod backend;
mod cli;
mod config;
mod logging;
mod shell;
mod triage;

use api::client::ApiClient;
use api::types::InboxQuery;
use config::{Config, ConfigError};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use triage::Coordinator;

fn default_config_path() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("mailtriage").join("config.toml")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home)
            .join(".config")
            .join("mailtriage")
            .join("config.toml")
    } else {
        PathBuf::from("config.toml")
    }
}

fn show_log() {
    let path = logging::log_path();
    if !path.exists() {
        eprintln!("No log file found at {}", path.display());
        std::process::exit(1);
    }
    let pager = std::env::var("PAGER").unwrap_or_else(|_| "less".to_string());
    let status = Command::new(&pager).arg(&path).status();
    match status {
        Ok(s) if s.success() => {}
        Ok(s) => std::process::exit(s.code().unwrap_or(1)),
        Err(e) => {
            eprintln!("Failed to launch pager '{}': {}", pager, e);
            std::process::exit(1);
        }
    }
}

fn print_help_config() {
    let config_path = default_config_path();
    println!("Default config file: {}", config_path.display());
    println!("A missing default config file means built-in defaults.");
    println!();
    println!("Available options:");
    println!();
    println!("[backend]");
    println!("  base_url = \"http://localhost:8000\"  # Triage backend URL (default: http://localhost:8000)");
    println!("  timeout_secs = 30                   # Per-request timeout (default: 30)");
    println!("  workers = 4                         # Concurrent backend requests (default: 4)");
    println!();
    println!("[inbox]");
    println!("  priority = \"Urgent\"    # Only list emails with this priority (default: all)");
    println!("  limit = 100            # Maximum emails per refresh (default: 100)");
    println!();
    println!("[policy]");
    println!("  send_during_generate = false  # Allow send while a draft is being generated (default: false)");
    println!();
    println!("Environment:");
    println!("  MAILTRIAGE_LOG    Log level: error, warn, info, debug, trace (default: info)");
    println!("  EDITOR            Editor used by the shell 'edit' command (default: vi)");
}

/// Explicit paths must exist; the default path may be absent.
fn load_config(explicit: Option<PathBuf>) -> Result<(PathBuf, Config), (PathBuf, ConfigError)> {
    match explicit {
        Some(path) => match Config::load(&path) {
            Ok(c) => Ok((path, c)),
            Err(e) => Err((path, e)),
        },
        None => {
            let path = default_config_path();
            if !path.exists() {
                return Ok((path, Config::default()));
            }
            match Config::load(&path) {
                Ok(c) => Ok((path, c)),
                Err(e) => Err((path, e)),
            }
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("Usage: mailtriage [OPTIONS]");
        eprintln!();
        eprintln!("Options:");
        eprintln!("  --config=PATH    Use config file at PATH instead of default");
        eprintln!("  --clear-log      Truncate the log file at startup");
        eprintln!("  --log            View the log file in $PAGER");
        eprintln!("  --cli            Run in JSON-over-stdin/stdout CLI mode");
        eprintln!("  --help-cli       Print CLI mode protocol documentation");
        eprintln!("  --help-config    Print default config path and all options");
        eprintln!("  --help           Show this help");
        std::process::exit(0);
    }

    if args.iter().any(|a| a == "--clear-log") {
        if let Err(e) = logging::clear() {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }

    if args.iter().any(|a| a == "--log") {
        show_log();
        std::process::exit(0);
    }

    if args.iter().any(|a| a == "--help-cli") {
        cli::print_help_cli();
        std::process::exit(0);
    }

    if args.iter().any(|a| a == "--help-config") {
        print_help_config();
        std::process::exit(0);
    }

    logging::init();

    let explicit = args
        .iter()
        .find(|a| a.starts_with("--config="))
        .map(|a| PathBuf::from(&a["--config=".len()..]));

    let (config_path, config) = match load_config(explicit) {
        Ok(loaded) => loaded,
        Err((path, e)) => {
            eprintln!("Error loading config from {}: {}", path.display(), e);
            eprintln!("See --help-config for the available options.");
            std::process::exit(1);
        }
    };
    let client = ApiClient::new(
        &config.backend.base_url,
        Duration::from_secs(config.backend.timeout_secs),
    );
    log::info!(
        "starting (config {}, backend {}, {} worker(s))",
        config_path.display(),
        client.base_url(),
        config.backend.workers
    );
    let (cmd_tx, resp_rx) = backend::spawn(Arc::new(client), config.backend.workers);
    let coord = Coordinator::new(cmd_tx, config.policy).with_query(InboxQuery {
        priority: config.inbox.priority.clone(),
        limit: config.inbox.limit,
    });

    if args.iter().any(|a| a == "--cli") {
        cli::run_cli(coord, resp_rx);
        std::process::exit(0);
    }

    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    if let Err(e) = shell::run(coord, resp_rx, editor) {
        eprintln!("Shell error: {}", e);
        std::process::exit(1);
    }
}
