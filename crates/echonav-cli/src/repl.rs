//! REPL – operator shell for a running EchoNav rig.
//!
//! Supported slash-commands:
//!   /toggle                      – start or stop the sensing loops
//!   /status                      – yaw, turn, nearest obstacle, cadence
//!   /obstacle <corner> <cm|none> – move a simulated obstacle
//!   /rate <deg/s>                – set the simulated yaw rate
//!   /help                        – show this list
//!   /quit | /exit                – shut down and exit

use std::io::{self, BufRead, Write};

use colored::Colorize;
use echonav_hal::sim::SimRig;
use echonav_runtime::Supervisor;
use echonav_types::CarCorner;
use tracing::warn;

/// One parsed operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Toggle,
    Status,
    Obstacle {
        corner: CarCorner,
        distance_cm: Option<f64>,
    },
    Rate(f64),
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, String> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Err("empty command".into());
        };
        let args: Vec<&str> = words.collect();

        match (head, args.as_slice()) {
            ("/toggle", []) => Ok(Command::Toggle),
            ("/status", []) => Ok(Command::Status),
            ("/help", []) => Ok(Command::Help),
            ("/quit" | "/exit", []) => Ok(Command::Quit),
            ("/rate", [rate]) => rate
                .parse::<f64>()
                .ok()
                .filter(|r| r.is_finite())
                .map(Command::Rate)
                .ok_or_else(|| format!("'{rate}' is not a rate in deg/s")),
            ("/obstacle", [corner, distance]) => {
                let corner = CarCorner::parse(corner)
                    .ok_or_else(|| format!("unknown corner '{corner}'"))?;
                let distance_cm = match *distance {
                    "none" | "-" => None,
                    d => Some(
                        d.parse::<f64>()
                            .ok()
                            .filter(|d| d.is_finite() && *d >= 0.0)
                            .ok_or_else(|| format!("'{d}' is not a distance in cm"))?,
                    ),
                };
                Ok(Command::Obstacle { corner, distance_cm })
            }
            ("/toggle" | "/status" | "/help" | "/quit" | "/exit" | "/rate" | "/obstacle", _) => {
                Err(format!("wrong arguments for {head}; see /help"))
            }
            (other, _) => Err(format!("unknown command '{other}'")),
        }
    }
}

/// Run the shell until `/quit` or end of input.
pub fn run(supervisor: &Supervisor, rig: &SimRig) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        let marker = if supervisor.is_running() { "●".green() } else { "○".dimmed() };
        print!("{} {} ", marker, "echonav>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        match Command::parse(&line) {
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                break;
            }
            Ok(cmd) => execute(cmd, supervisor, rig),
            Err(msg) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                msg,
                "/help".bold()
            ),
        }
    }
}

fn execute(cmd: Command, supervisor: &Supervisor, rig: &SimRig) {
    match cmd {
        Command::Toggle => cmd_toggle(supervisor),
        Command::Status => cmd_status(supervisor, rig),
        Command::Obstacle { corner, distance_cm } => {
            rig.gpio().set_obstacle(corner, distance_cm);
            match distance_cm {
                Some(cm) => println!("  {} now {} cm away", corner.to_string().bold(), cm),
                None => println!("  {} is clear", corner.to_string().bold()),
            }
        }
        Command::Rate(rate) => {
            rig.gyro().set_rate(rate);
            println!("  yaw rate set to {rate} °/s");
        }
        Command::Help => cmd_help(),
        Command::Quit => {}
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "EchoNav Commands".bold().underline());
    println!("  {}                       – start or stop sensing", "/toggle".bold().cyan());
    println!("  {}                       – show the live readings", "/status".bold().cyan());
    println!("  {} – move a simulated obstacle", "/obstacle <corner> <cm|none>".bold().cyan());
    println!("  {}                 – set the simulated yaw rate", "/rate <deg/s>".bold().cyan());
    println!("  {}                 – shut down and exit", "/quit  /exit".bold().cyan());
    println!();
    println!(
        "  Corners: {}",
        CarCorner::ALL
            .iter()
            .map(|c| c.label().to_ascii_lowercase().replace(' ', "_"))
            .collect::<Vec<_>>()
            .join(", ")
            .dimmed()
    );
    println!();
}

fn cmd_toggle(supervisor: &Supervisor) {
    if supervisor.is_running() {
        match supervisor.stop() {
            Ok(()) => println!("  {} EchoNav {}", "✓".green().bold(), "STOPPED".yellow().bold()),
            Err(e) => {
                warn!(error = %e, "stop finished with errors");
                println!("  {} stopped with errors: {}", "!".yellow().bold(), e);
            }
        }
        return;
    }

    print!("  Calibrating gyroscope – keep the vehicle still … ");
    io::stdout().flush().ok();
    match supervisor.start() {
        Ok(()) => {
            println!("{}", "OK".green());
            println!("  {} EchoNav {}", "✓".green().bold(), "RUNNING".green().bold());
        }
        Err(e) => println!("{}: {}", "FAILED".red(), e),
    }
}

fn cmd_status(supervisor: &Supervisor, rig: &SimRig) {
    let status = supervisor.status();
    let state = if status.released {
        "RELEASED".red().bold()
    } else if status.running {
        "RUNNING".green().bold()
    } else {
        "STOPPED".yellow().bold()
    };

    println!("{}", "EchoNav Status".bold().underline());
    println!("  State    : {}", state);
    println!("  Yaw      : {:+.1}°", status.yaw_deg);
    println!("  Turn     : {}", status.turn.to_string().bold());
    match status.beep.closest_cm {
        Some(cm) => println!("  Nearest  : {:.1} cm", cm),
        None => println!("  Nearest  : {}", "none".dimmed()),
    }
    match status.beep.interval {
        Some(i) => println!("  Beep     : every {} ms", i.as_millis()),
        None => println!("  Beep     : {}", "silent".dimmed()),
    }
    match rig.display().current() {
        Some(pattern) => println!("  Display  : {:?}", pattern),
        None => println!("  Display  : {}", "blank".dimmed()),
    }
    println!("  Tones    : {}", rig.audio().played());
}
