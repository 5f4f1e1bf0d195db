//! nrfdfu CLI - Command-line tool for updating nRF5x firmware over serial DFU.
//!
//! ## Features
//!
//! - Flash application/softdevice/bootloader images over the serial DFU
//!   bootloader
//! - Optional init packet (image metadata) upload
//! - Touch reset or DTR reset to put the device into DFU mode
//! - Serial port listing
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use env_logger::Env;
use std::path::PathBuf;

mod commands;

/// nrfdfu - update nRF5x firmware over the serial DFU bootloader.
///
/// Environment variables:
///   NRFDFU_PORT   - Default serial port
///   NRFDFU_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "nrfdfu")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (e.g. /dev/ttyUSB0, COM3).
    #[arg(short, long, global = true, env = "NRFDFU_PORT")]
    port: Option<String>,

    /// Baud rate for the transfer.
    #[arg(
        short,
        long,
        global = true,
        default_value = "115200",
        env = "NRFDFU_BAUD"
    )]
    baud: u32,

    /// Enable hardware (RTS/CTS) flow control.
    #[arg(long, global = true)]
    flow_control: bool,

    /// Pulse the port open at this baud rate first to reset the device
    /// into DFU mode (instead of the DTR pulse).
    #[arg(long, global = true, value_name = "BAUD")]
    touch: Option<u32>,

    /// The device runs a single-bank bootloader (shortens activation for
    /// application-only updates).
    #[arg(long, global = true)]
    single_bank: bool,

    /// Serial read timeout in seconds.
    #[arg(long, global = true, default_value = "1.0", value_name = "SECS")]
    timeout: f64,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Flash firmware images over serial DFU.
    Flash {
        /// Application image (.bin).
        #[arg(long, value_name = "BIN")]
        application: Option<PathBuf>,

        /// Softdevice image (.bin).
        #[arg(long, value_name = "BIN")]
        softdevice: Option<PathBuf>,

        /// Bootloader image (.bin).
        #[arg(long, value_name = "BIN")]
        bootloader: Option<PathBuf>,

        /// Init packet with image metadata (.dat).
        #[arg(long, value_name = "DAT")]
        init_packet: Option<PathBuf>,
    },

    /// List available serial ports.
    ListPorts,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Flash {
            application,
            softdevice,
            bootloader,
            init_packet,
        } => commands::flash::cmd_flash(
            cli,
            application.as_deref(),
            softdevice.as_deref(),
            bootloader.as_deref(),
            init_packet.as_deref(),
        ),
        Commands::ListPorts => commands::ports::cmd_list_ports(),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(1);
    }
}
