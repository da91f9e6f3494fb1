//! Terminal relay: the reader used by the binary and the stdin forwarder.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use iexec::{InteractiveProcess, Reader, Stream, StreamError};

/// Writes child output straight to the matching terminal stream
#[derive(Debug, Default)]
pub struct Echo {
    closed: Vec<Stream>,
    terminal_closed: bool,
}

impl Echo {
    /// Both child output streams have reached EOF
    pub fn output_closed(&self) -> bool {
        self.closed.contains(&Stream::Stdout) && self.closed.contains(&Stream::Stderr)
    }

    /// Writing to our own stdout or stderr failed
    pub fn terminal_closed(&self) -> bool {
        self.terminal_closed
    }

    /// Nothing more will be shown: the child is done or the terminal is gone
    pub fn finished(&self) -> bool {
        self.terminal_closed || self.output_closed()
    }

    fn relay<W: Write>(&mut self, mut out: W, data: &[u8]) -> bool {
        if !self.terminal_closed && out.write_all(data).and_then(|()| out.flush()).is_err() {
            debug!("terminal closed, discarding child output");
            self.terminal_closed = true;
        }
        self.terminal_closed
    }
}

impl Reader for Echo {
    fn on_data(&mut self, data: &[u8]) -> bool {
        self.relay(io::stdout().lock(), data)
    }

    fn on_error(&mut self, data: &[u8]) -> bool {
        self.relay(io::stderr().lock(), data)
    }

    fn on_timeout(&mut self) {}

    fn on_eof(&mut self, stream: Stream) -> bool {
        debug!(%stream, "child closed stream");
        self.closed.push(stream);
        self.output_closed()
    }

    fn on_stream_error(&mut self, err: &StreamError) -> bool {
        warn!(error = %err, "stream failed");
        if err.stream != Stream::Stdin {
            self.closed.push(err.stream);
        }
        self.output_closed()
    }
}

/// Forward terminal stdin to the child until either side closes
pub fn spawn_stdin_forwarder(
    process: Arc<InteractiveProcess>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("iexec-forward".to_string())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut buf = [0u8; 4096];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = process.send(&buf[..n]) {
                            debug!(error = %e, "child no longer accepts input");
                            return;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!(error = %e, "terminal read failed");
                        break;
                    }
                }
            }
            process.close_stdin();
        })
}
