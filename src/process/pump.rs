//! Background threads moving bytes between the child's pipes and the
//! byte channels.

use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use super::channel::{ByteReader, ByteWriter};
use super::{Stream, StreamError};

/// Handle to a running pump thread
pub struct Pump {
    pub stream: Stream,
    pub handle: JoinHandle<()>,
}

fn spawn_named<F>(stream: Stream, body: F) -> io::Result<Pump>
where
    F: FnOnce() + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(format!("iexec-{}", stream))
        .spawn(body)?;
    Ok(Pump { stream, handle })
}

/// Spawn a thread draining `source` (child stdout or stderr) into `writer`.
///
/// Each non-empty read becomes one append. EOF finishes the channel
/// cleanly, any other read error finishes it with a failure.
pub fn spawn_output_pump<R>(
    stream: Stream,
    source: R,
    writer: ByteWriter,
    chunk_size: usize,
) -> io::Result<Pump>
where
    R: Read + Send + 'static,
{
    spawn_named(stream, move || pump_output(stream, source, writer, chunk_size))
}

fn pump_output<R: Read>(stream: Stream, mut source: R, writer: ByteWriter, chunk_size: usize) {
    debug!(%stream, "output pump started");
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        match source.read(&mut buf) {
            Ok(0) => {
                debug!(%stream, "end of stream");
                writer.finish(None);
                return;
            }
            Ok(n) => {
                trace!(%stream, bytes = n, "chunk");
                if writer.append(&buf[..n]).is_err() {
                    debug!(%stream, "consumer gone, output pump exiting");
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(%stream, error = %e, "read failed");
                writer.finish(Some(StreamError::new(stream, &e)));
                return;
            }
        }
    }
}

/// Spawn a thread flushing the stdin channel into the child's stdin.
///
/// The thread runs until the writer end of `reader` is dropped, then drops
/// `sink` so the child sees EOF. A failed write is handed to `on_failure`
/// and ends the pump.
pub fn spawn_input_pump<W, F>(sink: W, reader: ByteReader, on_failure: F) -> io::Result<Pump>
where
    W: Write + Send + 'static,
    F: FnOnce(StreamError) + Send + 'static,
{
    spawn_named(Stream::Stdin, move || pump_input(sink, reader, on_failure))
}

fn pump_input<W, F>(mut sink: W, reader: ByteReader, on_failure: F)
where
    W: Write,
    F: FnOnce(StreamError),
{
    debug!(stream = %Stream::Stdin, "input pump started");
    // Iteration ends when every writer has been dropped.
    for _token in reader.ready().iter() {
        let bytes = reader.drain_all();
        if bytes.is_empty() {
            continue;
        }
        trace!(stream = %Stream::Stdin, bytes = bytes.len(), "chunk");
        if let Err(e) = sink.write_all(&bytes).and_then(|()| sink.flush()) {
            warn!(stream = %Stream::Stdin, error = %e, "write failed");
            on_failure(StreamError::new(Stream::Stdin, &e));
            return;
        }
    }
    debug!(stream = %Stream::Stdin, "stdin closed, input pump exiting");
}
