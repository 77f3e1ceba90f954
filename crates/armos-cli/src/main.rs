//! `armos-cli` – ArmOS command line interface
//!
//! This binary is the operator's entry point to the arm. It:
//!
//! 1. Loads `~/.armos/config.toml`, writing the defaults on first run, then
//!    applies `ARMOS_*` environment overrides and command-line flags.
//! 2. Opens one arm session: the link on the configured port, the position
//!    ledger, and the AR3 kinematics. The session resumes from the newest
//!    ledger row when there is one.
//! 3. Runs the given subcommand, or drops into an interactive REPL when none
//!    is given.
//! 4. Intercepts **Ctrl-C** so the REPL finishes the current command and
//!    exits cleanly.

mod commands;
mod config;
mod repl;
mod session;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use armos_runtime::{ArmController, Reseed};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::warn;

use crate::commands::{ArmCommand, Speeds};

#[derive(Parser, Debug)]
#[command(name = "armos", version, about = "Drive an AR3 robot arm")]
struct Cli {
    /// Serial port of the controller board
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Position ledger (SQLite file, or `:memory:`)
    #[arg(short, long, global = true)]
    db: Option<String>,

    /// Motion speed, 1–100
    #[arg(short, long, global = true)]
    speed: Option<u32>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Interactive shell (the default without a subcommand)
    Repl,
    #[command(flatten)]
    Arm(ArmCommand),
}

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG selects the level (defaults to "info"); ARMOS_LOG_FORMAT=json
    // switches to newline-delimited JSON. Operator output stays on println!.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("ARMOS_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    let cli = Cli::parse();
    let interactive = matches!(cli.command, None | Some(Command::Repl));
    if interactive {
        print_banner();
    }

    let cfg = match resolve_config(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let arm = match session::open(&cfg) {
        Ok(arm) => arm,
        Err(e) => {
            eprintln!("{}: {}", "Session error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    report_reseed(&arm, interactive);

    let speeds = Speeds {
        motion: cfg.speed,
        calibration: cfg.calibration_speed,
    };

    match cli.command {
        Some(Command::Arm(command)) => match commands::execute(&arm, &command, speeds) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{}: {}", "Error".red().bold(), e);
                ExitCode::FAILURE
            }
        },
        None | Some(Command::Repl) => {
            // ── Shared shutdown flag ──────────────────────────────────────
            let shutdown = Arc::new(AtomicBool::new(false));
            let shutdown_clone = shutdown.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                println!();
                println!("{}", "⚠  Ctrl-C received – stopping after the current command …".yellow().bold());
                shutdown_clone.store(true, Ordering::SeqCst);
            }) {
                warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
            }

            println!(
                "  Type {} for a list of commands.\n",
                "/help".bold().cyan()
            );
            repl::run(&arm, speeds, shutdown);
            ExitCode::SUCCESS
        }
    }
}

/// File config, first-run defaults, then environment, then flags.
fn resolve_config(cli: &Cli) -> Result<config::Config, String> {
    let mut cfg = match config::load()? {
        Some(cfg) => cfg,
        None => {
            let cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => warn!(error = %e, "could not write default config"),
            }
            cfg
        }
    };
    config::apply_env_overrides(&mut cfg);
    if let Some(port) = &cli.port {
        cfg.port = port.clone();
    }
    if let Some(db) = &cli.db {
        cfg.database = db.clone();
    }
    if let Some(speed) = cli.speed {
        cfg.speed = speed;
    }
    Ok(cfg)
}

fn report_reseed(arm: &ArmController, verbose: bool) {
    match arm.reseed() {
        Reseed::Restored { record_id } if verbose => println!(
            "  {} Position restored from ledger record {}",
            "✓".green().bold(),
            record_id
        ),
        Reseed::Restored { .. } => {}
        Reseed::Empty => println!(
            "  {} No recorded position; run {} first.",
            "!".yellow().bold(),
            "calibrate".bold()
        ),
        Reseed::Failed(e) => println!(
            "  {} Position ledger unusable ({}); run {} first.",
            "!".yellow().bold(),
            e,
            "calibrate".bold()
        ),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    ___                ____  _____"#.bold().cyan());
    println!("{}", r#"   /   |  _________ _/ __ \/ ___/"#.bold().cyan());
    println!("{}", r#"  / /| | / ___/ __ `__ \ / /\__ \ "#.bold().cyan());
    println!("{}", r#" / ___ |/ /  / / / / / / /___/ / "#.bold().cyan());
    println!("{}", r#"/_/  |_/_/  /_/ /_/ /_/\____/____/ "#.bold().cyan());
    println!();
    println!("  {} {}",
        "ArmOS".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  AR3 arm controller");
    println!();
}
