//! Byte channel: a growable byte buffer paired with a bounded queue of
//! readiness tokens.
//!
//! The channel is split into a [`ByteWriter`] and a [`ByteReader`] held by
//! exactly one consumer. Writer clones share the buffer and the queue; the
//! queue disconnects once every clone is gone. Tokens only say
//! "something changed"; a consumer woken by a token drains everything that
//! is buffered at that moment, which may include bytes whose token it has
//! not seen yet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender};

use super::{lock, StreamError};

/// Readiness signal posted once per append, or once at end of stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Data,
    Eof,
    Failed(StreamError),
}

impl Token {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Token::Data)
    }
}

/// The consumer end is gone; nothing will ever drain this channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClosed;

type Buffer = Arc<Mutex<Vec<u8>>>;

/// Create a connected writer/reader pair whose readiness queue holds at most
/// `capacity` tokens.
pub fn byte_channel(capacity: usize) -> (ByteWriter, ByteReader) {
    let buf: Buffer = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = bounded(capacity.max(1));
    (
        ByteWriter {
            buf: Arc::clone(&buf),
            tx,
        },
        ByteReader {
            buf,
            rx,
            closed: AtomicBool::new(false),
        },
    )
}

/// Producer end of a byte channel
#[derive(Debug, Clone)]
pub struct ByteWriter {
    buf: Buffer,
    tx: Sender<Token>,
}

impl ByteWriter {
    /// Append `bytes` and post one readiness token.
    ///
    /// Blocks while the readiness queue is full. The whole slice is appended
    /// under one lock, so concurrent appends never interleave.
    pub fn append(&self, bytes: &[u8]) -> Result<(), ChannelClosed> {
        if bytes.is_empty() {
            return Ok(());
        }
        lock(&self.buf).extend_from_slice(bytes);
        self.tx.send(Token::Data).map_err(|_| ChannelClosed)
    }

    /// Post the terminal token and give up the producer end
    pub fn finish(self, failure: Option<StreamError>) {
        let token = match failure {
            Some(err) => Token::Failed(err),
            None => Token::Eof,
        };
        let _ = self.tx.send(token);
    }
}

/// Consumer end of a byte channel
#[derive(Debug)]
pub struct ByteReader {
    buf: Buffer,
    rx: Receiver<Token>,
    closed: AtomicBool,
}

impl ByteReader {
    pub fn ready(&self) -> &Receiver<Token> {
        &self.rx
    }

    /// Take every buffered byte without waiting; may return an empty Vec
    pub fn drain_all(&self) -> Vec<u8> {
        std::mem::take(&mut *lock(&self.buf))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Record that the terminal token (or a disconnect) has been seen
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
