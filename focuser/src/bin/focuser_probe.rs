//! Raw protocol probe - send each supported query and print the reply bytes

use anyhow::Result;
use clap::Parser;
use focuser::protocol::{Capabilities, Command};
use focuser::transport::{DEFAULT_READ_TIMEOUT, MAX_RESPONSE_LEN};
use focuser::{DeviceModel, SerialTransport, Transport};
use tracing::{info, warn};

/// Send raw queries to an Owlto controller
#[derive(Parser, Debug)]
#[command(name = "focuser_probe")]
struct Args {
    /// Serial port
    #[arg(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Controller model
    #[arg(long, value_enum, default_value = "owlto-focus")]
    model: DeviceModel,

    /// Baud rate
    #[arg(long, default_value_t = focuser::transport::DEFAULT_BAUD_RATE)]
    baud: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let dialect = args.model.dialect();

    info!("Opening {} for {}...", args.port, args.model.display_name());
    let mut port = SerialTransport::open(&args.port, args.baud)?;

    let delay = args.model.handshake_delay();
    if !delay.is_zero() {
        info!("Waiting {:?} for controller reset...", delay);
        std::thread::sleep(delay);
    }

    let caps = dialect.capabilities();
    let queries = [
        (Command::GetPosition, Capabilities::empty()),
        (Command::GetMaxPosition, Capabilities::MAX_POSITION),
        (Command::IsMoving, Capabilities::empty()),
        (Command::GetStallguard, Capabilities::STALLGUARD),
    ];

    for (command, needs) in queries {
        if !caps.contains(needs) {
            continue;
        }
        let frame = dialect.encode(&command)?;
        info!("Sending {} query...", frame.text);

        port.clear_buffers()?;
        port.write_all(frame.text.as_bytes())?;
        match port.read_until(dialect.delimiter(), MAX_RESPONSE_LEN, DEFAULT_READ_TIMEOUT) {
            Ok(raw) => {
                let decoded = dialect.decode_value(&raw);
                info!(
                    "Got: {:?} -> {:?}",
                    String::from_utf8_lossy(&raw),
                    decoded.map_err(|e| e.to_string())
                );
            }
            Err(e) => warn!("{} failed: {}", command.name(), e),
        }
    }

    info!("Done!");
    Ok(())
}
