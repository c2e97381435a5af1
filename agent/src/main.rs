//! AutoEnroll Agent - Entry Point
//!
//! Inspects and resets the enrollment checkpoint on a device. The workflow
//! itself is driven by the embedding application, which supplies the
//! remote service clients.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use autoenroll::app::clock::SystemClock;
use autoenroll::app::context::state_store;
use autoenroll::app::diagnostic;
use autoenroll::deploy::fsm::{read_checkpoint, DeploymentStateMachine, StatusReport};
use autoenroll::device::DeviceIdentity;
use autoenroll::errors::EnrollError;
use autoenroll::filesys::file::File;
use autoenroll::logs::{init_logging, LogOptions};
use autoenroll::storage::layout::StorageLayout;
use autoenroll::storage::settings::Settings;
use autoenroll::utils::version_info;

use colored::Colorize;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        return print_json(&version_info());
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };
    let json = cli_args.contains_key("json");

    // Run diagnostics
    if cli_args.contains_key("diagnostic") || cli_args.contains_key("diag") {
        let report = diagnostic::collect(&layout, DeviceIdentity::detect()).await;
        return print_json(&report);
    }

    // Retrieve the settings file
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    // Status and reset only need the checkpoint location
    let settings = match Settings::load_local(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {}", "Using default settings:".yellow(), e);
            Settings::default()
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        ..Default::default()
    };
    let _guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let result = if cli_args.contains_key("reset") {
        reset(&layout, &settings).await
    } else {
        status(&layout, &settings, json).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to serialize output: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn status(
    layout: &StorageLayout,
    settings: &Settings,
    json: bool,
) -> Result<(), EnrollError> {
    let store = state_store(layout, settings);
    let report = match read_checkpoint(&store).await? {
        Some(state) => StatusReport::from_state(&state),
        None => {
            println!("No deployment checkpoint found");
            return Ok(());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let phase = report.current_phase.to_string();
    let phase = match report.current_phase {
        p if p.is_terminal() && report.last_error.is_none() => phase.green(),
        _ if report.last_error.is_some() => phase.red(),
        _ => phase.yellow(),
    };
    println!("{} {}", "Session:".bold(), report.session_id);
    println!("{} {}", "Device serial:".bold(), report.device_serial);
    println!("{} {} (rank {})", "Phase:".bold(), phase, report.phase_rank);
    println!("{} {}", "Resume point:".bold(), report.resume_point);
    println!("{} {}", "Started:".bold(), report.started_at);
    println!("{} {}", "Last checkpoint:".bold(), report.last_checkpoint);
    println!("{} {}", "Records removed:".bold(), report.cleaned_device_count);
    if let Some(err) = &report.last_error {
        println!("{} {}", "Last error:".bold(), err.red());
    }
    for entry in &report.phases {
        let mark = if entry.success { "ok".green() } else { "failed".red() };
        println!("  {:<22} {:<6} {}", entry.phase.to_string(), mark, entry.message);
    }
    Ok(())
}

async fn reset(layout: &StorageLayout, settings: &Settings) -> Result<(), EnrollError> {
    let identity = DeviceIdentity::detect();
    let serial = identity.serial().unwrap_or_default();
    if serial.is_empty() {
        warn!("Resetting without a known device serial");
    }

    let store = state_store(layout, settings);
    let mut sm = DeploymentStateMachine::load(
        std::sync::Arc::new(store),
        std::sync::Arc::new(SystemClock),
        serial,
        settings.state.max_age(),
    )
    .await;
    sm.reset().await?;
    info!("Deployment checkpoint removed");
    println!("{}", "Deployment checkpoint removed".green());
    Ok(())
}
