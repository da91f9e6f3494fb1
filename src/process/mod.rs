//! Interactive child process handling.
//!
//! This module encapsulates all process-related functionality:
//! - `channel`: byte buffer + readiness queue shared by one producer and one consumer
//! - `pump`: background threads moving bytes between pipes and channels
//! - `reader`: callback contract for receive cycles
//! - `controller`: the `InteractiveProcess` handle and its receive loop

mod channel;
mod controller;
mod pump;
mod reader;
mod stream;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use channel::{byte_channel, ByteReader, ByteWriter, ChannelClosed, Token};
pub use controller::{InteractiveProcess, ReceiveState};
pub use reader::{Collector, Reader};
pub use stream::{Stream, StreamError};

/// Lock ignoring poison; every value guarded in this module stays
/// consistent even if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
