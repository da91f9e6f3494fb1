//! CLI argument parsing and configuration.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration from CLI arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Receive cycle timeout; falls back to the config file value
    pub timeout: Option<Duration>,
    pub config_path: Option<PathBuf>,
}

/// What the command line asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(CliConfig),
    Help,
    Version,
}

/// Print usage information
pub fn print_usage() {
    eprintln!("iexec - Run a program interactively, relaying its stdin, stdout and stderr");
    eprintln!();
    eprintln!("Usage: iexec [OPTIONS] [--] <program> [args...]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <program>            Program to launch (looked up in PATH)");
    eprintln!("  [args...]            Passed to the program unchanged");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -t, --timeout <MS>   Receive cycle timeout in milliseconds (default: 1000)");
    eprintln!("  -c, --config <PATH>  JSON config file (default: ./iexec.json or user config)");
    eprintln!("  -h, --help           Show this help message");
    eprintln!("  -V, --version        Show version");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  IEXEC_LOG            Log filter, e.g. debug or iexec=trace (default: warn)");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  iexec bash -i                 # Drive an interactive shell");
    eprintln!("  iexec -t 250 -- python3 -i    # Poll output every 250ms");
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}

/// Parse CLI arguments, exiting on --help and --version
pub fn parse_args() -> io::Result<CliConfig> {
    match parse_arg_list(std::env::args().skip(1)) {
        Ok(Command::Run(config)) => Ok(config),
        Ok(Command::Help) => {
            print_usage();
            std::process::exit(0);
        }
        Ok(Command::Version) => {
            println!("iexec {}", VERSION);
            std::process::exit(0);
        }
        Err(e) => {
            print_usage();
            Err(e)
        }
    }
}

/// Parse arguments (without the binary name).
///
/// Options are only recognised before the program name; everything after
/// it belongs to the program.
pub fn parse_arg_list<I>(args: I) -> io::Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut timeout: Option<Duration> = None;
    let mut config_path: Option<PathBuf> = None;

    let program = loop {
        let Some(arg) = args.next() else {
            return Err(invalid("Missing program to run".to_string()));
        };
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-V" | "--version" => return Ok(Command::Version),
            "-t" | "--timeout" => {
                let value = args
                    .next()
                    .ok_or_else(|| invalid("Missing value for --timeout".to_string()))?;
                let ms: u64 = value
                    .parse()
                    .map_err(|_| invalid(format!("Invalid timeout value: {}", value)))?;
                timeout = Some(Duration::from_millis(ms));
            }
            "-c" | "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| invalid("Missing value for --config".to_string()))?;
                config_path = Some(PathBuf::from(value));
            }
            "--" => {
                break args
                    .next()
                    .ok_or_else(|| invalid("Missing program to run".to_string()))?;
            }
            _ if arg.starts_with('-') => {
                return Err(invalid(format!("Unknown argument: {}", arg)));
            }
            _ => break arg,
        }
    };

    Ok(Command::Run(CliConfig {
        program,
        args: args.collect(),
        timeout,
        config_path,
    }))
}
