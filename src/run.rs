//! One-shot execution: run a program to completion or until a timeout,
//! capturing everything it printed.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::process::{lock, Stream};

/// How long pipe readers may keep going once the child is gone. Covers
/// descendants that inherited the pipes and outlive the child.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 4096;

/// Everything a one-shot run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the process was killed on timeout and could not be reaped
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
}

impl RunOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run `program` and return its stdout as text.
///
/// Any stderr output is reported as [`Error::Stderr`], even when the
/// process exited successfully; the error still carries stdout. On timeout
/// the process is killed and whatever it printed so far is returned.
pub async fn run<I, S>(timeout: Duration, program: &str, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_with_output(timeout, program, args).await?;
    let stdout = output.stdout_text();
    if output.stderr.is_empty() {
        Ok(stdout)
    } else {
        Err(Error::Stderr {
            stdout,
            stderr: output.stderr_text(),
        })
    }
}

/// Run `program` to completion or until `timeout`, killing it on timeout
pub async fn run_with_output<I, S>(timeout: Duration, program: &str, args: I) -> Result<RunOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| Error::Launch {
            program: program.to_string(),
            source,
        })?;
    debug!(pid = child.id(), %program, "one-shot process spawned");

    let stdout_pipe = child.stdout.take().ok_or(Error::MissingPipe(Stream::Stdout))?;
    let stderr_pipe = child.stderr.take().ok_or(Error::MissingPipe(Stream::Stderr))?;
    let stdout = Arc::new(Mutex::new(Vec::new()));
    let stderr = Arc::new(Mutex::new(Vec::new()));
    let stdout_task = spawn_collector(stdout_pipe, Arc::clone(&stdout));
    let stderr_task = spawn_collector(stderr_pipe, Arc::clone(&stderr));

    let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => (Some(status.map_err(Error::Wait)?), false),
        Err(_) => {
            debug!(%program, ?timeout, "timed out, killing");
            if let Err(e) = child.start_kill() {
                warn!(%program, error = %e, "kill failed");
            }
            (child.wait().await.ok(), true)
        }
    };

    for task in [stdout_task, stderr_task] {
        finish_collector(task).await;
    }

    let stdout = std::mem::take(&mut *lock(&stdout));
    let stderr = std::mem::take(&mut *lock(&stderr));
    Ok(RunOutput {
        stdout,
        stderr,
        status,
        timed_out,
    })
}

/// Accumulate a pipe into `sink` chunk by chunk, so partial output is
/// visible even if the task never reaches EOF.
fn spawn_collector<R>(mut pipe: R, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => return,
                Ok(n) => lock(&sink).extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "pipe read failed");
                    return;
                }
            }
        }
    })
}

async fn finish_collector(mut task: JoinHandle<()>) {
    if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
        debug!("pipe still open after exit, abandoning reader");
        task.abort();
    }
}
