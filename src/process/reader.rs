//! Callbacks invoked by [`InteractiveProcess::receive`](super::InteractiveProcess::receive).

use super::{Stream, StreamError};

/// Consumer of one receive cycle.
///
/// Callbacks run on the thread calling `receive`, one at a time. Returning
/// `true` from a callback ends the cycle right after it.
pub trait Reader {
    /// New bytes on the child's stdout
    fn on_data(&mut self, data: &[u8]) -> bool;

    /// New bytes on the child's stderr
    fn on_error(&mut self, data: &[u8]) -> bool;

    /// The cycle's deadline passed with nothing left to dispatch
    fn on_timeout(&mut self);

    /// `stream` reached end of file. Called at most once per stream for
    /// the lifetime of the process; skipped if the data delivered in the
    /// same wake-up already ended the cycle.
    fn on_eof(&mut self, stream: Stream) -> bool {
        let _ = stream;
        false
    }

    /// A pump failed reading or writing one of the child's streams
    fn on_stream_error(&mut self, err: &StreamError) -> bool {
        let _ = err;
        false
    }
}

/// Reader that accumulates everything it is given.
///
/// `stop_on` makes it end the cycle as soon as the accumulated stdout
/// contains the given needle.
#[derive(Debug, Default)]
pub struct Collector {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timeouts: usize,
    pub closed: Vec<Stream>,
    pub failures: Vec<StreamError>,
    stop_on: Option<Vec<u8>>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_on(needle: impl Into<Vec<u8>>) -> Self {
        Self {
            stop_on: Some(needle.into()),
            ..Self::default()
        }
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Both output streams have reached end of file
    pub fn output_closed(&self) -> bool {
        self.closed.contains(&Stream::Stdout) && self.closed.contains(&Stream::Stderr)
    }
}

impl Reader for Collector {
    fn on_data(&mut self, data: &[u8]) -> bool {
        self.stdout.extend_from_slice(data);
        match &self.stop_on {
            Some(needle) => contains(&self.stdout, needle),
            None => false,
        }
    }

    fn on_error(&mut self, data: &[u8]) -> bool {
        self.stderr.extend_from_slice(data);
        false
    }

    fn on_timeout(&mut self) {
        self.timeouts += 1;
    }

    fn on_eof(&mut self, stream: Stream) -> bool {
        self.closed.push(stream);
        false
    }

    fn on_stream_error(&mut self, err: &StreamError) -> bool {
        self.failures.push(err.clone());
        false
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}
