//! dc210 CLI - Command-line tool for Kodak DC210 cameras.
//!
//! ## Features
//!
//! - Show camera status
//! - List stored pictures
//! - Download one picture, a range, or all of them
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use dc210::{Operation, protocol::frame::SUPPORTED_BAUDS};
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use commands::camera::Settings;
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars and colors should be used.
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// dc210 - Download pictures from a Kodak DC210 over a serial link.
///
/// Environment variables:
///   DC210_PORT         - Serial port
///   DC210_BAUD         - Negotiated baud rate (default: 115200)
///   DC210_OUTPUT_DIR   - Directory for downloaded pictures
#[derive(Parser)]
#[command(name = "dc210")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  dc210 -p /dev/ttyUSB0 status\n  dc210 -p /dev/ttyUSB0 get all\n  dc210 -p COM1 get 3 7")]
struct Cli {
    /// Serial port the camera is connected to.
    #[arg(short, long, global = true, env = "DC210_PORT")]
    port: Option<String>,

    /// Baud rate to negotiate with the camera (9600, 19200, 38400, 57600, 115200).
    #[arg(short, long, global = true, env = "DC210_BAUD")]
    baud: Option<String>,

    /// Camera is already at the negotiated speed; skip SET_SPEED.
    #[arg(long, global = true)]
    no_baud: bool,

    /// Directory to write downloaded pictures into.
    #[arg(short, long, global = true, env = "DC210_OUTPUT_DIR", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Show camera status.
    Status {
        /// Output status as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List pictures stored in the camera.
    List {
        /// Output the listing as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Download pictures: `all`, a zero-based index, or an inclusive range.
    Get {
        /// `all`, `N`, or `START END`.
        #[arg(required = true, num_args = 1.., value_name = "all|N|START END")]
        target: Vec<String>,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a baud rate the camera can negotiate.
fn parse_baud(s: &str) -> Result<u32> {
    let baud: u32 = s
        .trim()
        .parse()
        .with_context(|| format!("Invalid baud rate '{s}'"))?;
    if !SUPPORTED_BAUDS.contains(&baud) {
        bail!("Unsupported baud rate {baud}, expected one of {SUPPORTED_BAUDS:?}");
    }
    Ok(baud)
}

/// Parse the `get` operands into an operation.
fn parse_get_target(args: &[String]) -> Result<Operation> {
    let index = |s: &str| -> Result<u16> {
        s.parse::<u16>()
            .with_context(|| format!("Invalid picture number '{s}'"))
    };

    match args {
        [one] if one.eq_ignore_ascii_case("all") => Ok(Operation::GetAll),
        [one] => Ok(Operation::Get(index(one)?)),
        [start, end] => {
            let (start, end) = (index(start)?, index(end)?);
            if end < start {
                bail!("Invalid range {start} {end}: end is before start");
            }
            Ok(Operation::GetRange { start, end })
        },
        _ => bail!(
            "Expected 'all', a picture number, or a START END range, got {} operands",
            args.len()
        ),
    }
}

/// Route Ctrl-C into the library's interrupt checker.
fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    dc210::set_interrupt_checker(|| INTERRUPTED.load(Ordering::SeqCst));
}

fn main() -> Result<()> {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "dc210 v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Commands::Completions { shell } = &cli.command {
        commands::completions::cmd_completions(*shell);
        return Ok(());
    }

    // Validate operands before touching the port.
    let operation = match &cli.command {
        Commands::Status { .. } => Operation::Status,
        Commands::List { .. } => Operation::List,
        Commands::Get { target } => parse_get_target(target)?,
        Commands::Completions { .. } => return Ok(()),
    };
    let baud = cli.baud.as_deref().map(parse_baud).transpose()?;

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    let settings = Settings::resolve(&cli, baud, &config)?;

    install_interrupt_handler();

    match &cli.command {
        Commands::Status { json } => commands::camera::cmd_status(&settings, *json),
        Commands::List { json } => commands::camera::cmd_list(&settings, *json),
        _ => commands::camera::cmd_get(&settings, operation),
    }
}
