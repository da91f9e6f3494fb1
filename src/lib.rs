//! Interactive child process execution.
//!
//! [`InteractiveProcess`] launches a program in the background and lets the
//! caller write to its stdin with [`send`](InteractiveProcess::send) and
//! consume its stdout/stderr through timeout-bounded
//! [`receive`](InteractiveProcess::receive) cycles driven by a [`Reader`].
//! [`run`] is the one-shot sibling: run to completion or timeout and
//! return the captured output.
//!
//! ```no_run
//! use std::time::Duration;
//! use iexec::{Collector, InteractiveProcess};
//!
//! let process = InteractiveProcess::launch("sh", ["-i"])?;
//! process.send("echo hello\n")?;
//!
//! let mut collector = Collector::stop_on("hello");
//! process.receive(Some(&mut collector), Duration::from_secs(5));
//! println!("{}", collector.stdout_text());
//!
//! process.shutdown()?;
//! # Ok::<(), iexec::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod process;
pub mod run;
pub mod utils;

pub use config::ProcessConfig;
pub use error::{Error, Result};
pub use process::{Collector, InteractiveProcess, ReceiveState, Reader, Stream, StreamError};
pub use run::{run, run_with_output, RunOutput};
