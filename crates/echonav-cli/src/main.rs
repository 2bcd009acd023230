//! `echonav-cli` – EchoNav operator console
//!
//! This binary is the ignition switch for the parking assistant.  It:
//!
//! 1. Loads `~/.echonav/config.toml`, writing the defaults on first run, and
//!    applies `ECHONAV_*` environment overrides.
//! 2. Builds the simulated rig and the supervisor on top of it.
//! 3. Drops the operator into an **interactive REPL** (`/toggle`, `/status`,
//!    `/obstacle`, `/rate`, `/help`).
//! 4. Intercepts **Ctrl-C** to stop every loop and release the hardware.

mod config;
mod repl;

use std::sync::Arc;

use colored::Colorize;
use echonav_hal::sim::SimRig;
use echonav_runtime::{Supervisor, init_tracing};
use tracing::{error, warn};

fn main() {
    // Console output stays on println!; diagnostics go through tracing.
    let _telemetry = init_tracing("echonav");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let mut cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => first_run(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);

    // ── Rig and supervisor ────────────────────────────────────────────────
    let rig = build_rig(&cfg.sim);
    print!("\n  Warming up {} ranger(s) … ", cfg.nav.range.corners.len());
    let supervisor = match Supervisor::new(
        &rig.context(),
        cfg.nav.clone(),
        rig.audio_sink(),
        rig.display_driver(),
    ) {
        Ok(s) => {
            println!("{}", "ready".green());
            Arc::new(s)
        }
        Err(e) => {
            println!("{}", "failed".red());
            error!(error = %e, "supervisor could not be built");
            std::process::exit(1);
        }
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let supervisor_ctrlc = supervisor.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        if let Err(e) = supervisor_ctrlc.shutdown() {
            warn!(error = %e, "shutdown finished with errors");
        }
        println!("{}", "  ✓ Hardware released.".green());
        std::process::exit(0);
    }) {
        warn!(
            error = %e,
            "Failed to install Ctrl-C handler; hardware will not be released on Ctrl-C"
        );
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&supervisor, &rig);

    if let Err(e) = supervisor.shutdown() {
        warn!(error = %e, "shutdown finished with errors");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// First run
// ─────────────────────────────────────────────────────────────────────────────

fn first_run() -> config::Config {
    println!();
    println!("  No configuration found.  Writing defaults.");
    let cfg = config::Config::default();
    match config::save(&cfg) {
        Ok(()) => println!(
            "  {} Config saved to {}",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

fn build_rig(sim: &config::SimConfig) -> SimRig {
    sim.obstacles
        .iter()
        .fold(SimRig::new().with_gyro_bias(sim.gyro_bias_dps), |rig, o| {
            rig.with_obstacle(o.corner, o.distance_cm)
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ____     __        _  __         "#.bold().cyan());
    println!("{}", r#"  / __/____/ /  ___  / |/ /__ __  __"#.bold().cyan());
    println!("{}", r#" / _// __/ _ \/ _ \/    / _ `/ |/ /"#.bold().cyan());
    println!("{}", r#"/___/\__/_//_/\___/_/|_/\_,_/|___/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "EchoNav".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Reversing assistant – ultrasonic ranging with turn guidance");
    println!();
}
