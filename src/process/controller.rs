//! The interactive process handle and its receive loop.

use std::ffi::OsStr;
use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, never, select, unbounded, Receiver, Sender};
use tracing::{debug, warn};

use super::channel::{byte_channel, ByteReader, ByteWriter, Token};
use super::pump::{spawn_input_pump, spawn_output_pump, Pump};
use super::{lock, Reader, Stream, StreamError};
use crate::config::ProcessConfig;
use crate::error::{Error, Result};

/// Stand-in deadline when `now + timeout` overflows `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// How long `shutdown` waits for the pumps once the child is gone
const TEARDOWN_GRACE: Duration = Duration::from_millis(500);

/// What the receive side of a process is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    /// No receive cycle running, no cancellation pending
    Idle,
    /// A receive cycle is waiting for events
    Receiving,
    /// `cancel` was called while idle; the next receive returns immediately
    CancelPending,
}

struct ChildState {
    child: Child,
    status: Option<ExitStatus>,
    killed: bool,
}

impl ChildState {
    fn poll(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    fn is_running(&mut self) -> bool {
        !self.killed && matches!(self.poll(), Ok(None))
    }

    /// Kill the child and every process left in its group. Only called
    /// before the child is reaped, while its pid still names the group.
    fn kill_tree(&mut self) -> io::Result<()> {
        let pid = self.child.id();
        if let Err(e) = kill_group(pid) {
            warn!(pid, error = %e, "failed to kill process group");
        }
        self.child.kill()?;
        self.killed = true;
        Ok(())
    }
}

/// Make the child the leader of a new session and process group, detached
/// from any controlling terminal
#[cfg(unix)]
fn detach_session(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: setsid is async-signal-safe and touches no parent state
    unsafe {
        command.pre_exec(|| nix::unistd::setsid().map(drop).map_err(io::Error::from));
    }
}

#[cfg(not(unix))]
fn detach_session(_command: &mut Command) {}

#[cfg(unix)]
fn kill_group(pid: u32) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) -> io::Result<()> {
    Ok(())
}

/// A child process running in the background, driven through
/// [`send`](Self::send) and [`receive`](Self::receive).
///
/// All methods take `&self`; share it through an `Arc` to send or cancel
/// from other threads while one thread receives. Only one receive cycle
/// should run at a time.
pub struct InteractiveProcess {
    pid: u32,
    program: String,
    child: Mutex<ChildState>,
    stdin: Mutex<Option<ByteWriter>>,
    stdout: ByteReader,
    stderr: ByteReader,
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
    // Held so the failure queue never disconnects once the stdin pump exits
    _failures_tx: Sender<StreamError>,
    failures_rx: Receiver<StreamError>,
    stdin_failure: Arc<Mutex<Option<StreamError>>>,
    receiving: AtomicBool,
    pumps: Mutex<Vec<Pump>>,
}

struct Wiring {
    stdin: ByteWriter,
    stdout: ByteReader,
    stderr: ByteReader,
    failures_tx: Sender<StreamError>,
    failures_rx: Receiver<StreamError>,
    stdin_failure: Arc<Mutex<Option<StreamError>>>,
    pumps: Vec<Pump>,
}

impl InteractiveProcess {
    /// Start `program` with `args` and default settings
    pub fn launch<I, S>(program: &str, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(program);
        command.args(args);
        Self::launch_with(command, &ProcessConfig::default())
    }

    /// Start a prepared command. Its stdio is replaced by pipes; working
    /// directory and environment are kept as configured. On unix the child
    /// runs in its own session so `stop` reaches everything it spawns.
    pub fn launch_with(mut command: Command, config: &ProcessConfig) -> Result<Self> {
        let config = config.clone().normalized();
        let program = command.get_program().to_string_lossy().into_owned();

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        detach_session(&mut command);

        let mut child = command.spawn().map_err(|source| Error::Launch {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(pid, %program, "process launched");

        let wiring = match Self::wire(&mut child, &config) {
            Ok(wiring) => wiring,
            Err(e) => {
                warn!(pid, error = %e, "failed to start pumps, killing process");
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        let (cancel_tx, cancel_rx) = bounded(1);
        Ok(Self {
            pid,
            program,
            child: Mutex::new(ChildState {
                child,
                status: None,
                killed: false,
            }),
            stdin: Mutex::new(Some(wiring.stdin)),
            stdout: wiring.stdout,
            stderr: wiring.stderr,
            cancel_tx,
            cancel_rx,
            _failures_tx: wiring.failures_tx,
            failures_rx: wiring.failures_rx,
            stdin_failure: wiring.stdin_failure,
            receiving: AtomicBool::new(false),
            pumps: Mutex::new(wiring.pumps),
        })
    }

    /// Take the child's pipes and start one pump per stream
    fn wire(child: &mut Child, config: &ProcessConfig) -> Result<Wiring> {
        let stdin_pipe = child.stdin.take().ok_or(Error::MissingPipe(Stream::Stdin))?;
        let stdout_pipe = child.stdout.take().ok_or(Error::MissingPipe(Stream::Stdout))?;
        let stderr_pipe = child.stderr.take().ok_or(Error::MissingPipe(Stream::Stderr))?;

        let (stdin_writer, stdin_reader) = byte_channel(config.readiness_capacity);
        let (stdout_writer, stdout_reader) = byte_channel(config.readiness_capacity);
        let (stderr_writer, stderr_reader) = byte_channel(config.readiness_capacity);
        let (failures_tx, failures_rx) = unbounded();
        let stdin_failure = Arc::new(Mutex::new(None));

        let pump_err =
            |stream: Stream| move |source: io::Error| Error::PumpSpawn { stream, source };

        let mut pumps = Vec::with_capacity(3);
        pumps.push(
            spawn_output_pump(Stream::Stdout, stdout_pipe, stdout_writer, config.chunk_size)
                .map_err(pump_err(Stream::Stdout))?,
        );
        pumps.push(
            spawn_output_pump(Stream::Stderr, stderr_pipe, stderr_writer, config.chunk_size)
                .map_err(pump_err(Stream::Stderr))?,
        );

        let slot = Arc::clone(&stdin_failure);
        let report = failures_tx.clone();
        pumps.push(
            spawn_input_pump(stdin_pipe, stdin_reader, move |err: StreamError| {
                *lock(&slot) = Some(err.clone());
                let _ = report.send(err);
            })
            .map_err(pump_err(Stream::Stdin))?,
        );

        Ok(Wiring {
            stdin: stdin_writer,
            stdout: stdout_reader,
            stderr: stderr_reader,
            failures_tx,
            failures_rx,
            stdin_failure,
            pumps,
        })
    }

    pub fn id(&self) -> u32 {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// The process has neither exited nor been stopped
    pub fn is_running(&self) -> bool {
        lock(&self.child).is_running()
    }

    /// Exit status if the process has exited, without blocking
    pub fn try_exit_status(&self) -> Result<Option<ExitStatus>> {
        lock(&self.child).poll().map_err(Error::Wait)
    }

    /// Queue `data` for the child's stdin.
    ///
    /// Returns once the bytes are buffered; the stdin pump writes them in
    /// the background. One call's payload is never interleaved with another's.
    /// Blocks while the stdin readiness queue is full, which happens when the
    /// child stops reading; `close_stdin` and `stop` are not held up by it.
    pub fn send(&self, data: impl AsRef<[u8]>) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }
        let writer = lock(&self.stdin).clone().ok_or(Error::StdinClosed)?;
        writer.append(data.as_ref()).map_err(|_| match self.stdin_failure() {
            Some(err) => Error::Stream(err),
            None => Error::StdinClosed,
        })
    }

    /// Last failure of the stdin pump, if it died writing
    pub fn stdin_failure(&self) -> Option<StreamError> {
        lock(&self.stdin_failure).clone()
    }

    /// Close the child's stdin once everything already sent is written
    pub fn close_stdin(&self) {
        if lock(&self.stdin).take().is_some() {
            debug!(pid = self.pid, "stdin closed");
        }
    }

    /// Run one receive cycle.
    ///
    /// Blocks until `timeout` has elapsed (calling `on_timeout`), a callback
    /// asks to stop, or [`cancel`](Self::cancel) is signalled. With no reader,
    /// output is drained and discarded. A zero timeout times out immediately.
    pub fn receive(&self, reader: Option<&mut dyn Reader>, timeout: Duration) {
        let _receiving = ReceivingGuard::enter(&self.receiving);
        let mut dispatch = Dispatch { reader };

        if timeout.is_zero() {
            dispatch.timeout();
            return;
        }

        let start = Instant::now();
        let deadline = start
            .checked_add(timeout)
            .unwrap_or_else(|| start + FAR_FUTURE);
        let closed = never::<Token>();

        loop {
            // Always the time left until the fixed deadline, never `timeout`
            let remaining = deadline.saturating_duration_since(Instant::now());
            let stdout_rx = queue(&self.stdout, &closed);
            let stderr_rx = queue(&self.stderr, &closed);

            let event = select! {
                recv(stdout_rx) -> token => Event::Output(Stream::Stdout, token.ok()),
                recv(stderr_rx) -> token => Event::Output(Stream::Stderr, token.ok()),
                recv(self.cancel_rx) -> _ => Event::Cancelled,
                recv(self.failures_rx) -> err => Event::Failure(err.ok()),
                default(remaining) => Event::Deadline,
            };

            let stop = match event {
                Event::Deadline => {
                    dispatch.timeout();
                    true
                }
                Event::Cancelled => {
                    debug!(pid = self.pid, "receive cancelled");
                    true
                }
                Event::Output(stream, token) => self.dispatch_output(stream, token, &mut dispatch),
                Event::Failure(Some(err)) => dispatch.failure(&err),
                Event::Failure(None) => false,
            };

            if stop || Instant::now() >= deadline {
                break;
            }
        }
    }

    fn output(&self, stream: Stream) -> &ByteReader {
        match stream {
            Stream::Stderr => &self.stderr,
            _ => &self.stdout,
        }
    }

    /// Deliver whatever `stream` has buffered, then its end of stream if the
    /// token says so. A disconnected queue counts as end of stream.
    fn dispatch_output(
        &self,
        stream: Stream,
        token: Option<Token>,
        dispatch: &mut Dispatch<'_>,
    ) -> bool {
        let channel = self.output(stream);
        let bytes = channel.drain_all();
        let stop = !bytes.is_empty() && dispatch.data(stream, &bytes);

        match token {
            Some(Token::Data) => stop,
            Some(Token::Eof) | None => {
                channel.mark_closed();
                stop || dispatch.eof(stream)
            }
            Some(Token::Failed(err)) => {
                channel.mark_closed();
                stop || dispatch.failure(&err)
            }
        }
    }

    /// Interrupt the running receive cycle.
    ///
    /// If no cycle is running the cancellation stays pending and the next
    /// `receive` returns immediately. Repeated calls collapse into one.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.try_send(());
    }

    /// Drop a pending cancellation; returns whether one was pending
    pub fn clear_cancel(&self) -> bool {
        self.cancel_rx.try_recv().is_ok()
    }

    pub fn receive_state(&self) -> ReceiveState {
        if self.receiving.load(Ordering::Acquire) {
            ReceiveState::Receiving
        } else if !self.cancel_rx.is_empty() {
            ReceiveState::CancelPending
        } else {
            ReceiveState::Idle
        }
    }

    /// Kill the process, everything in its process group, and close its
    /// stdin.
    ///
    /// The output pumps see end of stream once the pipes close. Fails with
    /// [`Error::NotRunning`] if the process already exited or was stopped.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = lock(&self.child);
            if !state.is_running() {
                return Err(Error::NotRunning);
            }
            state.kill_tree().map_err(Error::Kill)?;
        }
        debug!(pid = self.pid, "process killed");
        self.close_stdin();
        Ok(())
    }

    /// Kill the process group unless the child was already reaped, reap
    /// the child, and join every pump.
    ///
    /// Pending output tokens are discarded so pumps blocked on a full queue
    /// can finish. A pump still busy after a short grace period (a process
    /// that left the session holds its pipe) is detached instead of joined.
    pub fn shutdown(&self) -> Result<ExitStatus> {
        self.close_stdin();

        let status = {
            let mut state = lock(&self.child);
            match state.status {
                Some(status) => status,
                None => {
                    // Killing an exited but unreaped child keeps its status
                    state.kill_tree().map_err(Error::Kill)?;
                    let status = state.child.wait().map_err(Error::Wait)?;
                    state.status = Some(status);
                    status
                }
            }
        };

        let deadline = Instant::now() + TEARDOWN_GRACE;
        for channel in [&self.stdout, &self.stderr] {
            while channel.ready().recv_deadline(deadline).is_ok() {}
            channel.mark_closed();
        }

        let pumps = std::mem::take(&mut *lock(&self.pumps));
        let mut panicked = None;
        for pump in pumps {
            while !pump.handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if !pump.handle.is_finished() {
                warn!(pid = self.pid, stream = %pump.stream, "pump still busy, detaching");
                continue;
            }
            if pump.handle.join().is_err() {
                warn!(pid = self.pid, stream = %pump.stream, "pump panicked");
                panicked.get_or_insert(pump.stream);
            }
        }
        if let Some(stream) = panicked {
            return Err(Error::PumpPanicked(stream));
        }

        debug!(pid = self.pid, ?status, "process shut down");
        Ok(status)
    }
}

impl Drop for InteractiveProcess {
    fn drop(&mut self) {
        let state = self.child.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.status.is_none() {
            let _ = state.kill_tree();
            let _ = state.child.wait();
        }
    }
}

/// Readiness queue of `channel`, or `closed` once it has ended
fn queue<'a>(channel: &'a ByteReader, closed: &'a Receiver<Token>) -> &'a Receiver<Token> {
    if channel.is_closed() {
        closed
    } else {
        channel.ready()
    }
}

enum Event {
    Output(Stream, Option<Token>),
    Failure(Option<StreamError>),
    Cancelled,
    Deadline,
}

/// Forwards events to an optional reader
struct Dispatch<'a> {
    reader: Option<&'a mut dyn Reader>,
}

impl Dispatch<'_> {
    fn data(&mut self, stream: Stream, bytes: &[u8]) -> bool {
        match (self.reader.as_deref_mut(), stream) {
            (Some(reader), Stream::Stderr) => reader.on_error(bytes),
            (Some(reader), _) => reader.on_data(bytes),
            (None, _) => false,
        }
    }

    fn eof(&mut self, stream: Stream) -> bool {
        self.reader.as_deref_mut().is_some_and(|r| r.on_eof(stream))
    }

    fn failure(&mut self, err: &StreamError) -> bool {
        self.reader.as_deref_mut().is_some_and(|r| r.on_stream_error(err))
    }

    fn timeout(&mut self) {
        if let Some(reader) = self.reader.as_deref_mut() {
            reader.on_timeout();
        }
    }
}

/// Marks a receive cycle as running until dropped
struct ReceivingGuard<'a>(&'a AtomicBool);

impl<'a> ReceivingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for ReceivingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::process::Collector;

    /// Receive until both output streams hit EOF or `limit` passes
    fn receive_until_closed(
        process: &InteractiveProcess,
        collector: &mut Collector,
        limit: Duration,
    ) {
        let start = Instant::now();
        while !collector.output_closed() && start.elapsed() < limit {
            process.receive(Some(&mut *collector), Duration::from_millis(200));
        }
    }

    fn wait_exit(process: &InteractiveProcess) -> ExitStatus {
        let start = Instant::now();
        loop {
            if let Some(status) = process.try_exit_status().unwrap() {
                return status;
            }
            assert!(start.elapsed() < Duration::from_secs(5), "process did not exit");
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn sh(script: &str) -> InteractiveProcess {
        InteractiveProcess::launch("sh", ["-c", script]).unwrap()
    }

    #[test]
    fn test_launch_missing_program_fails() {
        let err = InteractiveProcess::launch("iexec-definitely-not-a-program", ["x"])
            .err()
            .unwrap();
        match err {
            Error::Launch { program, source } => {
                assert_eq!(program, "iexec-definitely-not-a-program");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("Expected launch error, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_fires_once_without_activity() {
        let process = InteractiveProcess::launch("cat", Vec::<String>::new()).unwrap();
        let mut collector = Collector::new();

        let start = Instant::now();
        process.receive(Some(&mut collector), Duration::from_millis(200));
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(200), "returned early: {:?}", elapsed);
        assert_eq!(collector.timeouts, 1);
        assert!(collector.stdout.is_empty());
        assert!(collector.stderr.is_empty());
        process.shutdown().unwrap();
    }

    #[test]
    fn test_zero_timeout_is_immediate() {
        let process = InteractiveProcess::launch("cat", Vec::<String>::new()).unwrap();
        let mut collector = Collector::new();

        let start = Instant::now();
        process.receive(Some(&mut collector), Duration::ZERO);

        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(collector.timeouts, 1);
        process.shutdown().unwrap();
    }

    #[test]
    fn test_echo_through_shell() {
        let process = InteractiveProcess::launch("sh", ["-i"]).unwrap();
        process.send("echo hi\n").unwrap();

        let mut collector = Collector::stop_on("hi");
        process.receive(Some(&mut collector), Duration::from_secs(10));

        assert!(collector.stdout_text().contains("hi"));
        assert_eq!(collector.timeouts, 0);
        process.shutdown().unwrap();
    }

    #[test]
    fn test_callback_stop_ends_cycle_before_deadline() {
        let process = sh("echo ready; exec sleep 30");
        let mut collector = Collector::stop_on("ready");

        let start = Instant::now();
        process.receive(Some(&mut collector), Duration::from_secs(20));

        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(collector.stdout_text(), "ready\n");
        assert_eq!(collector.timeouts, 0);
        process.shutdown().unwrap();
    }

    #[test]
    fn test_events_do_not_extend_deadline() {
        let process = sh("while true; do echo tick; sleep 0.05; done");
        let mut collector = Collector::new();

        let start = Instant::now();
        process.receive(Some(&mut collector), Duration::from_millis(300));
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(2), "deadline drifted: {:?}", elapsed);
        assert!(collector.stdout_text().contains("tick"));
        assert!(collector.timeouts <= 1);
        process.shutdown().unwrap();
    }

    #[test]
    fn test_cancel_before_receive_returns_immediately() {
        let process = InteractiveProcess::launch("cat", Vec::<String>::new()).unwrap();
        assert_eq!(process.receive_state(), ReceiveState::Idle);

        process.cancel();
        assert_eq!(process.receive_state(), ReceiveState::CancelPending);

        let mut collector = Collector::new();
        let start = Instant::now();
        process.receive(Some(&mut collector), Duration::from_secs(10));

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(collector.timeouts, 0);
        assert_eq!(process.receive_state(), ReceiveState::Idle);
        process.shutdown().unwrap();
    }

    #[test]
    fn test_repeated_cancel_collapses_and_clears() {
        let process = InteractiveProcess::launch("cat", Vec::<String>::new()).unwrap();
        process.cancel();
        process.cancel();
        assert!(process.clear_cancel());
        assert!(!process.clear_cancel());
        assert_eq!(process.receive_state(), ReceiveState::Idle);
        process.shutdown().unwrap();
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let process = Arc::new(InteractiveProcess::launch("cat", Vec::<String>::new()).unwrap());
        let canceller = {
            let process = Arc::clone(&process);
            thread::spawn(move || {
                let start = Instant::now();
                while process.receive_state() != ReceiveState::Receiving {
                    assert!(start.elapsed() < Duration::from_secs(5));
                    thread::sleep(Duration::from_millis(5));
                }
                process.cancel();
            })
        };

        let mut collector = Collector::new();
        let start = Instant::now();
        process.receive(Some(&mut collector), Duration::from_secs(20));

        canceller.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(collector.timeouts, 0);
        process.shutdown().unwrap();
    }

    #[test]
    fn test_receive_without_reader_drains_output() {
        let process = sh("echo discarded");
        let start = Instant::now();
        while !process.stdout.is_closed() && start.elapsed() < Duration::from_secs(5) {
            process.receive(None, Duration::from_millis(100));
        }

        let mut collector = Collector::new();
        process.receive(Some(&mut collector), Duration::from_millis(100));
        assert!(collector.stdout.is_empty());
        assert_eq!(collector.timeouts, 1);
        process.shutdown().unwrap();
    }

    #[test]
    fn test_stdout_and_stderr_are_distinct_until_eof() {
        let process = sh("printf out; printf err >&2");
        let mut collector = Collector::new();
        receive_until_closed(&process, &mut collector, Duration::from_secs(5));

        assert_eq!(collector.stdout_text(), "out");
        assert_eq!(collector.stderr_text(), "err");
        assert!(collector.output_closed());
        assert!(collector.failures.is_empty());
        assert!(wait_exit(&process).success());
        assert!(process.shutdown().unwrap().success());
    }

    #[test]
    fn test_close_stdin_lets_child_finish() {
        let process = InteractiveProcess::launch("cat", Vec::<String>::new()).unwrap();
        process.send("abc").unwrap();
        process.close_stdin();
        assert!(matches!(process.send("more"), Err(Error::StdinClosed) | Err(Error::NotRunning)));

        let mut collector = Collector::new();
        receive_until_closed(&process, &mut collector, Duration::from_secs(5));
        assert_eq!(collector.stdout_text(), "abc");

        assert!(wait_exit(&process).success());
        let status = process.shutdown().unwrap();
        assert!(status.success());
        assert!(matches!(process.send("late"), Err(Error::NotRunning)));
    }

    #[test]
    fn test_stop_then_operations_fail_not_running() {
        let process = InteractiveProcess::launch("cat", Vec::<String>::new()).unwrap();
        assert!(process.is_running());

        process.stop().unwrap();
        assert!(!process.is_running());
        assert!(matches!(process.stop(), Err(Error::NotRunning)));
        assert!(matches!(process.send("x"), Err(Error::NotRunning)));

        let status = process.shutdown().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_send_after_natural_exit_fails() {
        let process = InteractiveProcess::launch("true", Vec::<String>::new()).unwrap();
        wait_exit(&process);

        assert!(matches!(process.send("x"), Err(Error::NotRunning)));
        assert!(matches!(process.stop(), Err(Error::NotRunning)));
        assert!(process.shutdown().unwrap().success());
    }

    #[test]
    fn test_concurrent_sends_keep_payloads_whole() {
        let process = Arc::new(InteractiveProcess::launch("cat", Vec::<String>::new()).unwrap());
        let padding = "x".repeat(300);

        let senders: Vec<_> = (0..4)
            .map(|t| {
                let process = Arc::clone(&process);
                let padding = padding.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        process.send(format!("t{}-{}-{}\n", t, i, padding)).unwrap();
                    }
                })
            })
            .collect();

        let mut collector = Collector::new();
        // Receive while sending so the readiness queues keep moving
        let start = Instant::now();
        while senders.iter().any(|s| !s.is_finished())
            && start.elapsed() < Duration::from_secs(10)
        {
            process.receive(Some(&mut collector), Duration::from_millis(50));
        }
        for sender in senders {
            sender.join().unwrap();
        }
        process.close_stdin();
        receive_until_closed(&process, &mut collector, Duration::from_secs(10));

        let text = collector.stdout_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 200);
        let expected: HashSet<String> = (0..4)
            .flat_map(|t| (0..50).map(move |i| (t, i)))
            .map(|(t, i)| format!("t{}-{}-{}", t, i, padding))
            .collect();
        let seen: HashSet<String> = lines.iter().map(|l| l.to_string()).collect();
        assert_eq!(seen, expected);
        process.shutdown().unwrap();
    }

    #[test]
    fn test_drop_kills_running_child() {
        let process = sh("exec sleep 30");
        let pid = process.id();
        drop(process);

        // The child was reaped by drop, so signalling the pid must fail
        let probe = format!("kill -0 {} 2>/dev/null", pid);
        let status = Command::new("sh").args(["-c", &probe]).status().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_stop_kills_background_descendants() {
        let process = sh("sleep 30 & exec cat");
        // Let the shell start its background job before stopping
        thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        process.stop().unwrap();
        process.shutdown().unwrap();
        assert!(start.elapsed() < Duration::from_secs(3), "teardown took {:?}", start.elapsed());
        assert!(process.stdout.is_closed());
        assert!(process.stderr.is_closed());
    }

    #[test]
    fn test_shutdown_kills_descendants_of_running_child() {
        let process = sh("sleep 30 & echo started; wait");
        let mut collector = Collector::stop_on("started");
        process.receive(Some(&mut collector), Duration::from_secs(5));
        assert_eq!(collector.stdout_text(), "started\n");

        let start = Instant::now();
        assert!(!process.shutdown().unwrap().success());
        assert!(start.elapsed() < Duration::from_secs(3), "teardown took {:?}", start.elapsed());
    }

    #[test]
    fn test_shutdown_detaches_pumps_held_by_escaped_process() {
        // `setsid` moves the sleep out of the child's group, so only the
        // grace period can end the teardown
        let process = sh("command -v setsid >/dev/null && setsid sleep 30 & exec cat");
        thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        process.shutdown().unwrap();
        assert!(start.elapsed() < Duration::from_secs(3), "teardown took {:?}", start.elapsed());
    }

    #[test]
    fn test_stdin_write_failure_surfaces() {
        let process = sh("exec 0<&-; echo ready; sleep 3");
        let mut collector = Collector::stop_on("ready");
        process.receive(Some(&mut collector), Duration::from_secs(5));
        assert_eq!(collector.stdout_text(), "ready\n");

        // Accepted into the buffer; the pump then hits the closed pipe
        process.send("lost\n").unwrap();

        let start = Instant::now();
        while collector.failures.is_empty() && start.elapsed() < Duration::from_secs(5) {
            process.receive(Some(&mut collector), Duration::from_millis(100));
        }
        assert_eq!(collector.failures.len(), 1);
        assert_eq!(collector.failures[0].stream, Stream::Stdin);
        assert_eq!(collector.failures[0].kind, io::ErrorKind::BrokenPipe);
        assert_eq!(process.stdin_failure(), Some(collector.failures[0].clone()));

        // Once the pump has exited, sends report the failure
        let start = Instant::now();
        let err = loop {
            match process.send("again\n") {
                Err(e) => break e,
                Ok(()) => {
                    assert!(start.elapsed() < Duration::from_secs(5), "send kept succeeding");
                    thread::sleep(Duration::from_millis(10));
                }
            }
        };
        match err {
            Error::Stream(failure) => assert_eq!(failure.stream, Stream::Stdin),
            other => panic!("Expected stream error, got {:?}", other),
        }
        process.shutdown().unwrap();
    }

    #[test]
    fn test_close_stdin_not_blocked_by_stalled_send() {
        let mut command = Command::new("sh");
        command.args(["-c", "exec sleep 30"]);
        let config = ProcessConfig {
            readiness_capacity: 1,
            ..ProcessConfig::default()
        };
        let process = Arc::new(InteractiveProcess::launch_with(command, &config).unwrap());

        // The child never reads, so the pipe and then the queue fill up
        let sender = {
            let process = Arc::clone(&process);
            thread::spawn(move || {
                let chunk = vec![b'x'; 64 * 1024];
                while process.send(&chunk).is_ok() {}
            })
        };
        thread::sleep(Duration::from_millis(300));

        let (done_tx, done_rx) = bounded(1);
        {
            let process = Arc::clone(&process);
            thread::spawn(move || {
                process.close_stdin();
                let _ = done_tx.send(());
            });
        }
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok(), "close_stdin blocked");

        process.shutdown().unwrap();
        sender.join().unwrap();
    }
}
