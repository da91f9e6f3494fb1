//! Stream identity and stream-level failures.

use std::fmt;
use std::io;

use thiserror::Error;

/// One of the three standard streams of a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Stdin,
    Stdout,
    Stderr,
}

impl Stream {
    pub fn label(&self) -> &'static str {
        match self {
            Stream::Stdin => "stdin",
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An I/O failure observed by a pump on one of the child's streams.
///
/// Kept `Clone` (unlike `io::Error`) so it can be carried by readiness
/// tokens and remembered as the last stdin failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stream} {kind}: {message}")]
pub struct StreamError {
    pub stream: Stream,
    pub kind: io::ErrorKind,
    pub message: String,
}

impl StreamError {
    pub fn new(stream: Stream, err: &io::Error) -> Self {
        Self {
            stream,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
