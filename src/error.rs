//! Error type shared by the interactive controller, the one-shot runner
//! and configuration loading.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::process::{Stream, StreamError};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The program could not be started (missing, not executable, ...)
    #[error("failed to launch `{program}`")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} pipe was not captured")]
    MissingPipe(Stream),

    #[error("failed to start {stream} pump")]
    PumpSpawn {
        stream: Stream,
        #[source]
        source: io::Error,
    },

    #[error("process is not running")]
    NotRunning,

    #[error("stdin is closed")]
    StdinClosed,

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("failed to kill process")]
    Kill(#[source] io::Error),

    #[error("failed to wait for process")]
    Wait(#[source] io::Error),

    #[error("{0} pump thread panicked")]
    PumpPanicked(Stream),

    #[error("failed to read config {}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The one-shot runner treats any stderr output as failure; stdout is
    /// still handed back.
    #[error("{stderr}")]
    Stderr { stdout: String, stderr: String },
}
