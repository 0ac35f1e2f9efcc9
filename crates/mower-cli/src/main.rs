//! `mowerd` – robot mower daemon.
//!
//! ```text
//! mowerd [mower] [--loopback]   run the controller on simulated drivers
//! mowerd relay                  run the relay server
//! ```
//!
//! 1. Initialises tracing (`RUST_LOG`, `MOWER_LOG_FORMAT=json`,
//!    `OTEL_EXPORTER_OTLP_ENDPOINT`).
//! 2. Loads `~/.mower/config.toml`, writing the defaults on first run.
//! 3. Runs the selected mode until **Ctrl-C**.  In mower mode the handler
//!    stops the drivetrain and the blade immediately, before the orderly
//!    shutdown of the control loops.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use mower_hal::{
    FrameSource, ObjectDetector, SimActuation, SimFrameSource, SimObjectDetector, SimRangeSensor,
};
use mower_kernel::SafetyState;
use mower_middleware::{EventBus, LoopbackLink, TelemetryLink, WsTelemetryLink};
use mower_relay::{RelayServer, SessionRegistry};
use mower_runtime::{Coordinator, Drivers};
use mower_types::MowerError;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// What the daemon should run.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Mower { loopback: bool },
    Relay,
    Help,
}

impl Mode {
    fn from_args<I, S>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut relay = false;
        let mut loopback = false;
        for arg in args {
            match arg.as_ref() {
                "mower" => {}
                "relay" => relay = true,
                "--loopback" => loopback = true,
                "-h" | "--help" => return Ok(Mode::Help),
                other => return Err(format!("unknown argument `{other}`")),
            }
        }
        match (relay, loopback) {
            (true, true) => Err("--loopback only applies to mower mode".to_string()),
            (true, false) => Ok(Mode::Relay),
            (false, _) => Ok(Mode::Mower { loopback }),
        }
    }
}

fn main() -> ExitCode {
    let _tracing = mower_runtime::init_tracing("mowerd");

    let mode = match Mode::from_args(std::env::args().skip(1)) {
        Ok(Mode::Help) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    print_banner();
    let cfg = load_config();

    // Built after tracing so the OTLP exporter never needs a runtime.
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async move {
        match mode {
            Mode::Mower { loopback } => run_mower(cfg, loopback).await,
            Mode::Relay => run_relay(cfg).await,
            Mode::Help => Ok(()),
        }
    });

    match result {
        Ok(()) => {
            println!("{}", "  ✓ mowerd exited cleanly.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "mowerd failed");
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Modes
// ─────────────────────────────────────────────────────────────────────────────

async fn run_mower(cfg: config::Config, loopback: bool) -> Result<(), MowerError> {
    let link: Arc<dyn TelemetryLink> = if loopback {
        println!("  Link: {}", "in-process loopback".bold());
        Arc::new(LoopbackLink::new(Arc::new(EventBus::default())))
    } else {
        println!("  Link: {}", cfg.relay_url.bold());
        Arc::new(WsTelemetryLink::new(cfg.relay_url.clone()))
    };

    let camera = cfg.video_enabled.then(|| {
        (
            Box::new(SimFrameSource::new("front_rgb")) as Box<dyn FrameSource>,
            Box::new(SimObjectDetector::new()) as Box<dyn ObjectDetector>,
        )
    });
    let drivers = Drivers {
        actuation: Box::new(SimActuation::new()),
        range_sensor: Box::new(SimRangeSensor::new("front_ultrasonic", 200.0)),
        camera,
    };

    let mut coordinator = Coordinator::new(cfg.controller.clone(), drivers, link);
    let stop = Arc::new(Notify::new());
    install_ctrlc(Some(coordinator.safety_state().clone()), Arc::clone(&stop));

    coordinator.start().await?;
    println!("  Controller running. Press {} to stop.\n", "Ctrl-C".bold());

    stop.notified().await;
    coordinator.stop().await;
    Ok(())
}

async fn run_relay(cfg: config::Config) -> Result<(), MowerError> {
    let bus = Arc::new(EventBus::default());
    let registry = Arc::new(SessionRegistry::new());
    let stop = Arc::new(Notify::new());
    install_ctrlc(None, Arc::clone(&stop));

    println!("  Relay on port {}", cfg.relay_port.to_string().bold());
    let server = RelayServer::new(bus, Arc::clone(&registry)).with_port(cfg.relay_port);
    tokio::select! {
        result = server.run() => result?,
        _ = stop.notified() => info!(sessions = registry.len(), "relay stopping"),
    }
    Ok(())
}

/// Ctrl-C: stop the motors right away (mower mode), then wake `stop`.
fn install_ctrlc(state: Option<SafetyState>, stop: Arc<Notify>) {
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping …".yellow().bold());
        if let Some(state) = &state {
            match state.force_stop(true) {
                Ok(()) => println!("{}", "  ✓ Drive stopped, blade off.".green()),
                Err(e) => eprintln!("{}: {e}", "  ✗ Emergency stop failed".red()),
            }
        }
        stop.notify_one();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not stop the mower cleanly");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

fn load_config() -> config::Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            match config::save(&config::Config::default()) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __ _  ___ _    _____ ___  ___/ /"#.bold().green());
    println!("{}", r#"  /  ' \/ _ \ |/|/ / -_) _ \/ _  / "#.bold().green());
    println!("{}", r#" /_/_/_/\___/__,__/\__/_//_/\_,_/  "#.bold().green());
    println!();
    println!(
        "  {} {}",
        "mowerd".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Robot mower control coordinator");
    println!();
}

fn print_usage() {
    println!("usage: mowerd [mower] [--loopback]");
    println!("       mowerd relay");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_mower_over_websocket() {
        assert_eq!(
            Mode::from_args(Vec::<String>::new()),
            Ok(Mode::Mower { loopback: false })
        );
        assert_eq!(Mode::from_args(["mower"]), Ok(Mode::Mower { loopback: false }));
    }

    #[test]
    fn loopback_and_relay_modes() {
        assert_eq!(Mode::from_args(["--loopback"]), Ok(Mode::Mower { loopback: true }));
        assert_eq!(Mode::from_args(["relay"]), Ok(Mode::Relay));
        assert_eq!(Mode::from_args(["--help"]), Ok(Mode::Help));
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(Mode::from_args(["relay", "--loopback"]).is_err());
        assert!(Mode::from_args(["--fast"]).is_err());
    }
}
