mod component;
mod config_flow;
mod entries;
mod error;
mod i2c;
mod io_worker;
mod karisma_ctl;
mod karisma_types;
mod redis_shim;
mod registry;
mod switch;

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use log::debug;
use log::error;
use log::info;
use log::warn;

use component::Component;
use config_flow::ConfigFlow;
use config_flow::FlowResult;
use config_flow::JumperSet;
use config_flow::PlatformConfig;
use config_flow::UserInput;
use entries::EntryStore;
use i2c::LinuxI2cTransport;
use io_worker::IoWorker;
use karisma_types::Pin;
use karisma_types::SwitchState;
use karisma_types::DEFAULT_BUS;
use karisma_types::DEFAULT_I2C_ADDRESS;
use redis_shim::SwitchStream;
use registry::AddressRegistry;

#[derive(Parser, Debug)]
#[command(author, version, about = "Switch control for Karisma I2C relay boards")]
struct Args {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Silence all log output
    #[arg(short, long)]
    quiet: bool,

    /// Prefix log lines with a timestamp
    #[arg(short, long)]
    timestamp: bool,

    /// I2C bus number, i.e. the N of /dev/i2c-N
    #[arg(short, long, default_value_t = DEFAULT_BUS)]
    bus: u8,

    /// JSON file holding the configured switch entries
    #[arg(short, long, default_value = "karisma_entries.json")]
    entries: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Configure all 16 switches of a board from its address jumpers
    Configure {
        /// Closed address jumpers, e.g. "AB"; "N" for none
        #[arg(short, long, default_value = "N")]
        jumpers: JumperSet,

        /// Relay board type
        #[arg(long, default_value = "16 ports")]
        relay_type: String,

        /// Name of a pin, e.g. "0=Kitchen"; may be repeated
        #[arg(short = 'n', long = "pin-name", value_parser = parse_pin_name)]
        pin_names: Vec<(u8, String)>,
    },

    /// Import switches for explicitly numbered pins
    Import {
        /// I2C address of the board
        #[arg(short, long, default_value_t = DEFAULT_I2C_ADDRESS)]
        address: u8,

        /// Pin and name, e.g. "3=Pump"; may be repeated
        #[arg(short, long = "pin", value_parser = parse_pin_name, required = true)]
        pins: Vec<(u8, String)>,
    },

    /// Print the configured entries
    List,

    /// Delete an entry; a running service unloads its switch on the next read
    Remove {
        /// Entry id as printed by `list`, e.g. "karisma.108.3"
        unique_id: String,
    },

    /// Switch one pin and exit
    Set {
        #[arg(short, long)]
        address: u8,

        #[arg(short, long)]
        pin: u8,

        #[arg(short, long, value_parser = parse_state)]
        state: SwitchState,
    },

    /// Activate all entries and follow switch commands from a redis stream
    Run {
        #[arg(long, default_value = "redis://127.0.0.1/")]
        redis_url: String,

        #[arg(long, default_value = "karisma")]
        stream_key: String,

        #[arg(long, default_value = "karisma_last_entry_id")]
        last_entry_id_key: String,

        /// Milliseconds a stream read blocks before it is retried
        #[arg(long, default_value_t = 5000)]
        block_ms: usize,
    },
}

fn parse_pin_name(s: &str) -> Result<(u8, String), String> {
    let (pin, name) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected PIN=NAME but got '{}'", s))?;
    let pin = pin
        .trim()
        .parse::<u8>()
        .map_err(|e| format!("Invalid pin '{}': {}", pin, e))?;
    Pin::try_from(pin).map_err(|e| e.to_string())?;
    Ok((pin, name.trim().to_string()))
}

fn parse_state(s: &str) -> Result<SwitchState, String> {
    match s.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Ok(SwitchState::On),
        "off" | "0" | "false" => Ok(SwitchState::Off),
        _ => Err(format!("Invalid switch state '{}'", s)),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    stderrlog::new()
        .module(module_path!())
        .quiet(args.quiet)
        .verbosity(usize::from(args.verbose) + 1)
        .timestamp(match args.timestamp {
            true => stderrlog::Timestamp::Second,
            false => stderrlog::Timestamp::Off,
        })
        .init()?;

    match args.command {
        Command::Configure {
            jumpers,
            relay_type,
            pin_names,
        } => {
            let mut input = UserInput::new(jumpers);
            input.relay_type = relay_type;
            input.pin_names = pin_names.into_iter().collect();
            configure(&args.entries, |flow| flow.step_user(&input))
        }
        Command::Import { address, pins } => {
            let config = PlatformConfig {
                i2c_address: address,
                pins: pins.into_iter().collect::<BTreeMap<_, _>>(),
            };
            configure(&args.entries, |flow| flow.import_platform(&config))
        }
        Command::List => list(&args.entries),
        Command::Remove { unique_id } => remove(&args.entries, &unique_id),
        Command::Set {
            address,
            pin,
            state,
        } => set(args.bus, address, pin, state),
        Command::Run {
            redis_url,
            stream_key,
            last_entry_id_key,
            block_ms,
        } => run(
            args.bus,
            &args.entries,
            &redis_url,
            &stream_key,
            &last_entry_id_key,
            block_ms,
        ),
    }
}

fn configure<F>(entries: &Path, step: F) -> Result<()>
where
    F: FnOnce(&mut ConfigFlow) -> Result<Vec<FlowResult>, error::KarismaError>,
{
    let mut store = EntryStore::open(entries)?;
    let results = step(&mut ConfigFlow::new(&mut store))?;
    for result in &results {
        match result {
            FlowResult::Created(entry) => println!("{}\t{}", entry.unique_id, entry.title),
            FlowResult::Aborted(reason) => warn!("Configuration aborted: {}", reason),
        }
    }
    store.save()?;
    Ok(())
}

fn list(entries: &Path) -> Result<()> {
    let store = EntryStore::open(entries)?;
    for entry in store.entries() {
        println!(
            "{}\t0x{:02x}\t{}\t{}",
            entry.unique_id, entry.data.i2c_address, entry.data.pin_number, entry.title
        );
    }
    Ok(())
}

fn remove(entries: &Path, unique_id: &str) -> Result<()> {
    let mut store = EntryStore::open(entries)?;
    let entry = store
        .remove(unique_id)
        .ok_or_else(|| anyhow!("No entry '{}' in '{}'", unique_id, entries.display()))?;
    store.save()?;
    println!("{}\t{}", entry.unique_id, entry.title);
    Ok(())
}

fn set(bus: u8, address: u8, pin: u8, state: SwitchState) -> Result<()> {
    let pin = Pin::try_from(pin)?;
    let registry = AddressRegistry::new(bus, Arc::new(LinuxI2cTransport::new()));
    let device = registry.get_or_create(address)?;
    device
        .set_pin_value(pin, state.is_on())
        .with_context(|| format!("Failed to set pin {} of 0x{:02x}", pin, address))?;
    registry.remove(address);
    Ok(())
}

fn run(
    bus: u8,
    entries: &Path,
    redis_url: &str,
    stream_key: &str,
    last_entry_id_key: &str,
    block_ms: usize,
) -> Result<()> {
    let mut store = EntryStore::open(entries)?;
    let registry = Arc::new(AddressRegistry::new(bus, Arc::new(LinuxI2cTransport::new())));
    let mut component = Component::setup(registry, IoWorker::spawn("karisma-io")?);

    if component.sync_entries(&mut store) > 0 {
        store.save()?;
    }
    for notification in component.notifications() {
        eprintln!("{}: {}", notification.title, notification.message);
    }
    component.on_start();

    for switch in component.switches() {
        let board = component
            .device_info(switch.address())
            .map(|info| info.name.as_str())
            .unwrap_or("?");
        info!(
            "{} '{}' ({} on pin {} of {})",
            switch.unique_id(),
            switch.name(),
            switch.device_info().model,
            switch.pin(),
            board
        );
    }

    match component.switches().count() {
        0 => warn!("No switch active, waiting for entries in '{}'", entries.display()),
        loaded => info!("{} switches active", loaded),
    }

    let client = redis::Client::open(redis_url)?;
    let mut con = client.get_connection()?;
    let stream = SwitchStream::new(stream_key, last_entry_id_key, block_ms);

    let result = stream.dispatch(
        &mut con,
        |e| {
            error!("{}", e);
            None
        },
        |batch| {
            reload_entries(&mut component, entries);
            let written = component.apply_switch_states(&batch.switch_states);
            if !batch.switch_states.is_empty() {
                debug!("{} of {} commands written", written, batch.switch_states.len());
            }
            Ok(())
        },
    );

    component.on_stop();
    result?;
    Ok(())
}

/// Picks up entries added, changed or removed by other invocations.
fn reload_entries(component: &mut Component, entries: &Path) {
    let mut store = match EntryStore::open(entries) {
        Ok(store) => store,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };
    if component.sync_entries(&mut store) > 0 {
        if let Err(e) = store.save() {
            error!("{}", e);
        }
    }
}
