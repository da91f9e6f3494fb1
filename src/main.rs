use std::error::Error;
use std::io;
use std::process::{Command, ExitCode};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;
use tracing_subscriber::EnvFilter;

use iexec::utils::exit_code;
use iexec::{InteractiveProcess, ProcessConfig};

mod cli;

use cli::{parse_args, spawn_stdin_forwarder, CliConfig, Echo};

/// How long a child that closed its output gets to exit before being killed
const EXIT_GRACE: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    init_tracing();

    let config = match parse_args() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    match run(config) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("iexec: {}", e);
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {}", cause);
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr, filtered by IEXEC_LOG (default: warn)
fn init_tracing() {
    let filter = EnvFilter::try_from_env("IEXEC_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: CliConfig) -> Result<u8, Box<dyn Error>> {
    let config = match &cli.config_path {
        Some(path) => ProcessConfig::load(path)?,
        None => {
            let (config, source) = ProcessConfig::find()?;
            if let Some(path) = source {
                debug!(path = %path.display(), "loaded config");
            }
            config
        }
    };
    let timeout = cli.timeout.unwrap_or_else(|| config.receive_timeout());

    let mut command = Command::new(&cli.program);
    command.args(&cli.args);
    let process = Arc::new(InteractiveProcess::launch_with(command, &config)?);
    let started = Instant::now();

    // The forwarder blocks on terminal input, so it is never joined
    let _forwarder = spawn_stdin_forwarder(Arc::clone(&process))?;

    let mut echo = Echo::default();
    while !echo.finished() {
        process.receive(Some(&mut echo), timeout);
    }

    if echo.terminal_closed() {
        debug!("terminal closed, stopping child");
    } else {
        let deadline = Instant::now() + EXIT_GRACE;
        while process.try_exit_status()?.is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }

    let status = process.shutdown()?;
    debug!(?status, elapsed = ?started.elapsed(), "child finished");
    Ok(exit_code(status))
}
