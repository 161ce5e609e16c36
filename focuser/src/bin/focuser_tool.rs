//! Command-line control tool for Owlto focusers.
//!
//! Subcommands:
//! - `query`: Print position, travel and motion state
//! - `move`: Absolute, relative or timed move
//! - `sync`: Redefine the current position
//! - `abort`: Stop immediately
//! - `reverse`: Invert motor direction
//! - `calibrate`: Start (or reset) travel calibration
//! - `stallguard`: Read or set the stallguard threshold
//! - `current`: Set the motor move current
//! - `run`: Poll the focuser and print events as JSON lines
//! - `models`: List supported controllers

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use focuser::{
    Capabilities, DeviceModel, FocusDirection, FocuserConfig, FocuserEvent, FocuserSession,
    HostRequest, PropertyState, Runner, SerialTransport, SimulatedFocuser, Transport,
};
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

type DynTransport = Box<dyn Transport + Send>;

/// Owlto Focuser Control Tool
#[derive(Parser, Debug)]
#[command(name = "focuser_tool")]
#[command(about = "Control tool for Owlto-family telescope focusers")]
#[command(version)]
struct Args {
    /// Serial port (overrides config)
    #[arg(long, global = true)]
    port: Option<String>,

    /// Controller model (overrides config)
    #[arg(long, global = true, value_enum)]
    model: Option<DeviceModel>,

    /// Baud rate (overrides config)
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Config file [default: ~/.cf_config/focuser.json]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Talk to a simulated focuser instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Device(DeviceCommand),

    /// List supported controller models
    Models,
}

/// Subcommands that open a session with the focuser
#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// Query current position and status
    Query,

    /// Move the focuser
    Move {
        /// Absolute target position in ticks
        #[arg(short, long, conflicts_with_all = ["relative", "timed"])]
        position: Option<u32>,

        /// Relative distance in ticks (negative moves inward)
        #[arg(short, long, allow_hyphen_values = true, conflicts_with = "timed")]
        relative: Option<i64>,

        /// Run for this many milliseconds then abort
        #[arg(long)]
        timed: Option<u64>,

        /// Direction for a timed move
        #[arg(long, value_enum, default_value = "outward")]
        direction: FocusDirection,

        /// Timeout in seconds for motion to complete
        #[arg(short, long, default_value = "120")]
        timeout: u64,

        /// Don't wait for motion to complete
        #[arg(long)]
        no_wait: bool,
    },

    /// Redefine the current position without moving
    Sync {
        /// New position in ticks
        position: u32,
    },

    /// Stop immediately
    Abort,

    /// Invert (or restore) motor direction
    Reverse {
        /// Restore normal direction instead
        #[arg(long)]
        off: bool,
    },

    /// Start travel calibration
    Calibrate {
        /// Discard stored calibration instead
        #[arg(long)]
        reset: bool,

        /// Don't wait for calibration to finish
        #[arg(long)]
        no_wait: bool,
    },

    /// Read or set the stallguard threshold
    Stallguard {
        /// New threshold (-64..=64); reads if omitted
        #[arg(allow_hyphen_values = true)]
        value: Option<i32>,
    },

    /// Set the motor move current (0..=32)
    Current {
        /// New current setting
        value: u32,
    },

    /// Poll the focuser and print events as JSON lines
    Run {
        /// Stop after this many seconds (0 = until interrupted)
        #[arg(short, long, default_value = "0")]
        seconds: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match &args.command {
        Command::Models => cmd_models(),
        Command::Device(command) => cmd_device(&args, command),
    }
}

/// Resolve the config, connect, and run one device subcommand.
fn cmd_device(args: &Args, command: &DeviceCommand) -> Result<()> {
    let config = resolve_config(args)?;
    let (mut session, events) = open_session(&config, args.simulate)?;

    match *command {
        DeviceCommand::Query => cmd_query(&mut session),
        DeviceCommand::Move {
            position,
            relative,
            timed,
            direction,
            timeout,
            no_wait,
        } => cmd_move(
            &mut session,
            &config,
            position,
            relative,
            timed.map(|ms| (direction, Duration::from_millis(ms))),
            Duration::from_secs(timeout),
            no_wait,
        ),
        DeviceCommand::Sync { position } => {
            session.sync(position)?;
            info!("Synced position to {}", position);
            Ok(())
        }
        DeviceCommand::Abort => {
            session.abort()?;
            info!("Abort sent");
            Ok(())
        }
        DeviceCommand::Reverse { off } => {
            session.set_reverse(!off)?;
            info!("Reverse {}", if off { "disabled" } else { "enabled" });
            Ok(())
        }
        DeviceCommand::Calibrate { reset, no_wait } => {
            cmd_calibrate(&mut session, &config, reset, no_wait)
        }
        DeviceCommand::Stallguard { value } => cmd_stallguard(&mut session, value),
        DeviceCommand::Current { value } => {
            session.set_move_current(value)?;
            info!("Move current set to {}", value);
            Ok(())
        }
        DeviceCommand::Run { seconds } => cmd_run(session, events, &config, seconds),
    }
}

/// Load the config file and apply command-line overrides.
fn resolve_config(args: &Args) -> Result<FocuserConfig> {
    let path = args.config.clone().unwrap_or_else(FocuserConfig::default_path);
    let mut config = FocuserConfig::load_or_default(&path)
        .with_context(|| format!("loading {}", path.display()))?;

    if let Some(model) = args.model {
        if model != config.model {
            let port = config.port.clone();
            config = FocuserConfig {
                port,
                ..FocuserConfig::default_for(model)
            };
        }
    }
    if let Some(port) = &args.port {
        config.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if args.simulate {
        config.handshake_delay_ms = 0;
    }

    config.validate()?;
    debug!("Using config: {:?}", config);
    Ok(config)
}

fn open_session(
    config: &FocuserConfig,
    simulate: bool,
) -> Result<(FocuserSession<DynTransport>, Receiver<FocuserEvent>)> {
    let transport: DynTransport = if simulate {
        info!("Using simulated {}", config.model.display_name());
        Box::new(SimulatedFocuser::new(config.model).with_position(25_000))
    } else {
        info!("Opening {} at {} baud...", config.port, config.baud_rate);
        Box::new(
            SerialTransport::open(&config.port, config.baud_rate)
                .with_context(|| format!("opening {}", config.port))?,
        )
    };

    let (tx, rx) = crossbeam_channel::unbounded();
    let mut session = FocuserSession::new(transport, config.model, Box::new(tx))
        .with_options(config.session_options());
    session.connect()?;
    Ok((session, rx))
}

/// Poll until no move or calibration is busy, or `timeout` elapses.
fn wait_until_idle(
    session: &mut FocuserSession<DynTransport>,
    config: &FocuserConfig,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        session.fire_due_timers(Instant::now());
        let busy = session.motion_state() == PropertyState::Busy
            || session.calibration_state() == PropertyState::Busy;
        if !busy {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!(
                "Motion did not complete within {:?} (position {})",
                timeout,
                session.position()
            );
        }
        std::thread::sleep(config.poll_interval());
        session.poll_tick();
        debug!("Position: {}", session.position());
    }
}

// ==================== Query Command ====================

fn cmd_query(session: &mut FocuserSession<DynTransport>) -> Result<()> {
    let moving = session.is_moving()?;
    let status = session.status();
    info!(
        "{}: position={}, max={}, moving={}, stallguard={:?}",
        status.model.display_name(),
        status.position,
        status.max_position,
        moving,
        status.stallguard
    );
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

// ==================== Move Command ====================

fn cmd_move(
    session: &mut FocuserSession<DynTransport>,
    config: &FocuserConfig,
    position: Option<u32>,
    relative: Option<i64>,
    timed: Option<(FocusDirection, Duration)>,
    timeout: Duration,
    no_wait: bool,
) -> Result<()> {
    let state = match (position, relative, timed) {
        (Some(target), _, _) => {
            info!("Moving to {}...", target);
            session.move_absolute(target)
        }
        (None, Some(delta), _) => {
            let direction = if delta < 0 {
                FocusDirection::Inward
            } else {
                FocusDirection::Outward
            };
            let ticks = u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX);
            info!("Moving {:?} by {} ticks...", direction, ticks);
            session.move_relative(direction, ticks)
        }
        (None, None, Some((direction, duration))) => {
            info!("Moving {:?} for {:?}...", direction, duration);
            session.move_timed(direction, duration)
        }
        (None, None, None) => bail!("Specify --position, --relative or --timed"),
    };

    if state == PropertyState::Alert {
        bail!("Move command failed");
    }

    if no_wait {
        info!("Move started, not waiting");
        return Ok(());
    }

    wait_until_idle(session, config, timeout)?;
    session.read_position()?;
    info!("Position: {}", session.position());
    Ok(())
}

// ==================== Calibrate Command ====================

fn cmd_calibrate(
    session: &mut FocuserSession<DynTransport>,
    config: &FocuserConfig,
    reset: bool,
    no_wait: bool,
) -> Result<()> {
    if reset {
        if !session.capabilities().contains(Capabilities::CALIBRATION_RESET) {
            bail!("{} cannot reset calibration", session.model().display_name());
        }
        session.reset_calibration()?;
    } else {
        session.calibrate()?;
    }
    info!("Calibration started");

    if !no_wait {
        wait_until_idle(session, config, Duration::from_secs(600))?;
        info!("Calibration finished at {}", session.position());
    }
    Ok(())
}

// ==================== Stallguard Command ====================

fn cmd_stallguard(session: &mut FocuserSession<DynTransport>, value: Option<i32>) -> Result<()> {
    match value {
        Some(threshold) => {
            session.set_stallguard(threshold)?;
            info!("Stallguard threshold set to {}", threshold);
        }
        None => {
            let threshold = session.read_stallguard()?;
            info!("Stallguard threshold: {}", threshold);
        }
    }
    Ok(())
}

// ==================== Run Command ====================

fn cmd_run(
    session: FocuserSession<DynTransport>,
    events: Receiver<FocuserEvent>,
    config: &FocuserConfig,
    seconds: u64,
) -> Result<()> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let handle = Runner::new(session, rx, config.poll_interval())?.spawn()?;

    let deadline = (seconds > 0).then(|| Instant::now() + Duration::from_secs(seconds));
    info!("Polling every {:?}; Ctrl-C to stop", config.poll_interval());

    loop {
        let wait = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::from_secs(3600),
        };
        match events.recv_timeout(wait) {
            Ok(event) => println!("{}", serde_json::to_string(&event)?),
            Err(_) if deadline.is_some_and(|d| Instant::now() >= d) => break,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                warn!("Event channel closed");
                break;
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
        }
    }

    tx.send(HostRequest::Shutdown)?;
    let session = handle
        .join()
        .map_err(|_| anyhow::anyhow!("Focuser runner thread panicked"))?;
    info!("Final position: {}", session.position());
    Ok(())
}

// ==================== Models Command ====================

fn cmd_models() -> Result<()> {
    for model in DeviceModel::iter() {
        let caps = model.dialect().capabilities();
        let names: Vec<&str> = caps.iter_names().map(|(name, _)| name).collect();
        println!(
            "{:<22} {:<22} max={:<7} {}",
            model.as_str(),
            model.display_name(),
            model.default_max_position(),
            names.join(",")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_models_parses_without_device_arguments() {
        let args = Args::try_parse_from([
            "focuser_tool",
            "models",
            "--config",
            "/nonexistent/focuser.json",
        ])
        .unwrap();
        assert!(matches!(args.command, Command::Models));
    }

    #[test]
    fn test_models_runs_without_opening_a_session() {
        let args = Args::try_parse_from(["focuser_tool", "--port", "/dev/null-port", "models"])
            .unwrap();
        match &args.command {
            Command::Models => cmd_models().unwrap(),
            Command::Device(_) => panic!("models parsed as a device command"),
        }
    }

    #[test]
    fn test_device_subcommands_parse() {
        let args = Args::try_parse_from(["focuser_tool", "--simulate", "move", "-p", "500"])
            .unwrap();
        assert!(args.simulate);
        assert!(matches!(
            args.command,
            Command::Device(DeviceCommand::Move {
                position: Some(500),
                ..
            })
        ));

        let args = Args::try_parse_from(["focuser_tool", "stallguard", "-12"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Device(DeviceCommand::Stallguard { value: Some(-12) })
        ));
    }
}
