#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use anyhow::{anyhow, Context};

use eprom_uart_programmer::sim::SimBus;
use eprom_uart_programmer::{Options, Programmer, State};

/// Drive the programmer firmware core against a simulated device socket.
#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Command to issue: read, write, blank-check, identify, set-device,
    /// reset or init-baud
    command: String,

    /// Device selection code for set-device (A = 8755, B = 8748, 0 = none)
    #[structopt(long, default_value = "A")]
    device_code: String,

    /// Hex payload for write, e.g. from `xxd -p image.bin`
    #[structopt(long, default_value = "")]
    data: String,

    /// Size of the simulated device in bytes
    #[structopt(long, default_value = "2048")]
    size: usize,

    /// Preload the simulated device with this hex image instead of blank
    #[structopt(long, default_value = "")]
    preload: String,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let args = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(args.log_level, Config::default());

    // Build the simulated device socket
    let bus = if args.preload.is_empty() {
        SimBus::blank(args.size)
    } else {
        let mut mem = hex::decode(&args.preload).context("invalid preload hex")?;
        mem.resize(args.size, 0xFF);
        SimBus::preloaded(mem)
    };

    let idle_delay = std::time::Duration::from_millis(u64::from(args.options.idle_delay_ms));
    let mut p = Programmer::simulated(bus, args.options.clone());

    // Compose the wire bytes for the requested command
    let mut wire: Vec<u8> = Vec::new();
    match args.command.as_str() {
        "read" => wire.extend_from_slice(b"$1"),
        "write" => {
            let image = hex::decode(&args.data).context("invalid payload hex")?;
            if image.len() != args.size {
                return Err(anyhow!(
                    "payload is {} bytes, device is {}",
                    image.len(),
                    args.size
                ));
            }
            wire.extend_from_slice(b"$2");
            wire.extend_from_slice(hex::encode_upper(&image).as_bytes());
        }
        "blank-check" => wire.extend_from_slice(b"$3"),
        "identify" => wire.extend_from_slice(b"$4"),
        "set-device" => {
            wire.extend_from_slice(b"$5");
            wire.extend_from_slice(args.device_code.as_bytes());
        }
        "reset" => wire.extend_from_slice(b"$9"),
        "init-baud" => wire.extend_from_slice(b"$U"),
        other => return Err(anyhow!("unknown command: {}", other)),
    }

    info!("sending {} bytes to the firmware", wire.len());
    p.port_mut().push_host_bytes(&wire);

    // Run the dispatcher until the link is drained and the loop is idle
    loop {
        let state = p.poll().map_err(|e| anyhow!("firmware fault: {}", e))?;
        if state == State::Idle {
            if p.port_mut().pending_input() == 0 {
                break;
            }
            std::thread::sleep(idle_delay);
        }
    }

    let output = p.port_mut().take_output();
    print!("{}", String::from_utf8_lossy(&output));

    debug!(
        "session counters: {} pushed, {} popped",
        p.session().bytes_pushed(),
        p.session().bytes_popped()
    );

    Ok(())
}
