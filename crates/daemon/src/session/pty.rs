//! PTY-backed interactive process.
//!
//! A [`PtySession`] owns one process attached to a pseudo-terminal. Input is
//! queued through [`PtySession::write_input`] and written by a dedicated
//! thread, output is consumed once via [`PtySession::output`], and
//! [`PtySession::close`] tears both down without waiting on either thread.
//!
//! ```text
//! Starting ──> Running ──> Exited    (process ended on its own)
//!    │            └──────> Closed    (close() called)
//!    └──────> Failed                 (spawn error)
//! ```

use std::io::{Read, Write};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::Stream;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Number of output chunks buffered between the reader thread and the consumer.
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Largest slice of input handed to the writer thread at once.
const WRITE_CHUNK_SIZE: usize = 4096;

/// Number of input chunks queued ahead of the writer thread.
const INPUT_CHANNEL_CAPACITY: usize = 16;

/// Default time a process gets to exit after SIGHUP before it is killed.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

/// Errors that can occur while starting a PTY session.
#[derive(Error, Debug)]
pub enum SpawnError {
    /// No pseudo-terminal could be allocated.
    #[error("failed to allocate pseudo-terminal: {0}")]
    PtyAllocationFailed(String),

    /// The process could not be created.
    #[error("failed to start `{program}`: {reason}")]
    ProcessStartFailed { program: String, reason: String },
}

/// Errors that can occur on a running PTY session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    /// The process has exited or the session was closed.
    #[error("pty session is closed")]
    Closed,

    /// The pty device rejected the operation.
    #[error("broken pipe: {0}")]
    BrokenPipe(String),

    /// A resize asked for a zero dimension.
    #[error("invalid terminal dimensions: {rows} rows x {cols} cols")]
    InvalidDimensions { rows: u16, cols: u16 },
}

/// Lifecycle state of a PTY session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PtyState {
    /// The pty is being allocated and the process spawned.
    Starting = 0,
    /// The process is running.
    Running = 1,
    /// The process ended on its own.
    Exited = 2,
    /// Spawning failed.
    Failed = 3,
    /// The session was closed explicitly.
    Closed = 4,
}

impl PtyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PtyState::Starting,
            1 => PtyState::Running,
            2 => PtyState::Exited,
            3 => PtyState::Failed,
            _ => PtyState::Closed,
        }
    }

    /// Returns whether no further transition can leave this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, PtyState::Exited | PtyState::Failed | PtyState::Closed)
    }

    /// Returns whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: PtyState) -> bool {
        matches!(
            (self, next),
            (PtyState::Starting, PtyState::Running)
                | (PtyState::Starting, PtyState::Failed)
                | (PtyState::Running, PtyState::Exited)
                | (PtyState::Running, PtyState::Closed)
        )
    }
}

/// Atomic holder for a [`PtyState`] that only performs legal transitions.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: PtyState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> PtyState {
        PtyState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Moves `from -> to` if the cell is currently in `from`.
    fn transition(&self, from: PtyState, to: PtyState) -> bool {
        debug_assert!(from.can_transition_to(to));
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Description of the process to run inside a pty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments, excluding the program itself.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// Creates a spec for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the working directory.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Returns the command line as a single string, for logging.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn to_builder(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(ref dir) = self.cwd {
            cmd.cwd(dir);
        }
        cmd
    }
}

/// Lazy, finite sequence of output chunks read from a pty.
///
/// Ends when the process exits or the session is closed.
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl OutputStream {
    /// Waits for the next chunk of output.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

impl Stream for OutputStream {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

struct PtyControl {
    master: Option<Box<dyn MasterPty + Send>>,
    rows: u16,
    cols: u16,
}

/// One interactive process attached to a pseudo-terminal.
///
/// All methods take `&self`, so the session can be shared between the
/// input and output pumps behind an `Arc`.
pub struct PtySession {
    program: String,
    pid: Option<u32>,
    state: Arc<StateCell>,
    control: Mutex<PtyControl>,
    input: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    output: Mutex<Option<OutputStream>>,
    released: AtomicBool,
    kill_grace: Duration,
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("program", &self.program)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}

impl PtySession {
    /// Spawns `command` on a new pty of `rows` x `cols`.
    pub fn spawn(command: &CommandSpec, rows: u16, cols: u16) -> Result<Self, SpawnError> {
        Self::spawn_with_grace(command, rows, cols, DEFAULT_KILL_GRACE)
    }

    /// Like [`PtySession::spawn`], with an explicit SIGHUP grace period for [`PtySession::close`].
    pub fn spawn_with_grace(
        command: &CommandSpec,
        rows: u16,
        cols: u16,
        kill_grace: Duration,
    ) -> Result<Self, SpawnError> {
        let state = Arc::new(StateCell::new(PtyState::Starting));
        let program = command.display();

        let result = Self::open(command, rows, cols);
        let (master, child, reader, writer) = match result {
            Ok(parts) => parts,
            Err(e) => {
                state.transition(PtyState::Starting, PtyState::Failed);
                tracing::warn!(command = %program, error = %e, "PTY spawn failed");
                return Err(e);
            }
        };

        let pid = child.process_id();
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);

        let reader_state = Arc::clone(&state);
        let reader_label = program.clone();
        let writer_label = program.clone();
        let spawned = std::thread::Builder::new()
            .name("pty-reader".to_string())
            .spawn(move || read_loop(reader, tx, reader_state, reader_label))
            .and_then(|_| {
                std::thread::Builder::new()
                    .name("pty-writer".to_string())
                    .spawn(move || write_loop(writer, input_rx, writer_label))
            });

        let child = Arc::new(Mutex::new(child));
        if let Err(e) = spawned {
            let mut child = lock(&child);
            let _ = child.kill();
            let _ = child.wait();
            state.transition(PtyState::Starting, PtyState::Failed);
            return Err(SpawnError::PtyAllocationFailed(format!(
                "failed to start pty i/o thread: {e}"
            )));
        }

        state.transition(PtyState::Starting, PtyState::Running);

        tracing::debug!(command = %program, pid = ?pid, rows, cols, "Spawned PTY session");

        Ok(Self {
            program,
            pid,
            state,
            control: Mutex::new(PtyControl {
                master: Some(master),
                rows,
                cols,
            }),
            input: Mutex::new(Some(input_tx)),
            child,
            output: Mutex::new(Some(OutputStream { rx })),
            released: AtomicBool::new(false),
            kill_grace,
        })
    }

    #[allow(clippy::type_complexity)]
    fn open(
        command: &CommandSpec,
        rows: u16,
        cols: u16,
    ) -> Result<
        (
            Box<dyn MasterPty + Send>,
            Box<dyn Child + Send + Sync>,
            Box<dyn Read + Send>,
            Box<dyn Write + Send>,
        ),
        SpawnError,
    > {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SpawnError::PtyAllocationFailed(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(command.to_builder())
            .map_err(|e| SpawnError::ProcessStartFailed {
                program: command.program.clone(),
                reason: e.to_string(),
            })?;

        // The parent's copy of the slave must go, or the reader never sees EOF.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SpawnError::PtyAllocationFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SpawnError::PtyAllocationFailed(e.to_string()))?;

        Ok((pair.master, child, reader, writer))
    }

    /// Returns the command line this session runs.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the process ID, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the current state.
    pub fn state(&self) -> PtyState {
        self.state.load()
    }

    /// Returns whether the process is still running.
    pub fn is_running(&self) -> bool {
        self.state() == PtyState::Running
    }

    /// Returns the current terminal size as `(rows, cols)`.
    pub fn size(&self) -> (u16, u16) {
        let control = lock(&self.control);
        (control.rows, control.cols)
    }

    /// Takes the output sequence. Returns `None` on every call after the first.
    pub fn output(&self) -> Option<OutputStream> {
        lock(&self.output).take()
    }

    /// Queues bytes for the process's input, in order.
    ///
    /// Waits (asynchronously) while the input queue is full, which happens
    /// when the process stops reading. Dropping the future abandons the
    /// bytes not yet queued.
    pub async fn write_input(&self, data: &[u8]) -> Result<(), IoError> {
        if !self.is_running() {
            return Err(IoError::Closed);
        }
        // The lock only guards the handle; sends happen after it is released.
        let Some(input) = lock(&self.input).clone() else {
            return Err(IoError::Closed);
        };

        for chunk in data.chunks(WRITE_CHUNK_SIZE) {
            if input.send(chunk.to_vec()).await.is_err() {
                return Err(if self.is_running() {
                    IoError::BrokenPipe("pty writer stopped".to_string())
                } else {
                    IoError::Closed
                });
            }
        }
        Ok(())
    }

    /// Applies new terminal dimensions.
    ///
    /// A rejected resize leaves the stored size untouched.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), IoError> {
        if rows == 0 || cols == 0 {
            return Err(IoError::InvalidDimensions { rows, cols });
        }
        if !self.is_running() {
            return Err(IoError::Closed);
        }

        let mut control = lock(&self.control);
        let master = control.master.as_ref().ok_or(IoError::Closed)?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| IoError::BrokenPipe(e.to_string()))?;
        control.rows = rows;
        control.cols = cols;

        tracing::debug!(pid = ?self.pid, rows, cols, "Resized PTY");
        Ok(())
    }

    /// Terminates the process and releases the pty. Idempotent.
    ///
    /// The process receives SIGHUP first and is killed if it is still
    /// alive after the grace period.
    pub async fn close(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.transition(PtyState::Running, PtyState::Closed);

        // The writer thread exits once its queue drains or its pending
        // write fails on the hung-up pty.
        lock(&self.input).take();

        let child = Arc::clone(&self.child);
        let pid = self.pid;
        let grace = self.kill_grace;
        let exit_code = tokio::task::spawn_blocking(move || terminate(&child, pid, grace))
            .await
            .unwrap_or_else(|e| {
                tracing::error!(pid = ?pid, error = %e, "PTY terminate task failed");
                None
            });

        lock(&self.control).master.take();

        tracing::debug!(
            command = %self.program,
            pid = ?pid,
            exit_code = ?exit_code,
            state = ?self.state(),
            "PTY session closed"
        );
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if !*self.released.get_mut() {
            let mut child = lock(&self.child);
            if let Ok(None) = child.try_wait() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_loop(
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::Sender<Vec<u8>>,
    state: Arc<StateCell>,
    label: String,
) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(buffer[..n].to_vec()).is_err() {
                    // Nobody is reading, but the process may still be alive.
                    tracing::trace!(command = %label, "Output receiver dropped");
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Linux reports EIO once the slave side is gone.
                tracing::trace!(command = %label, error = %e, "PTY read ended");
                break;
            }
        }
    }

    if state.transition(PtyState::Running, PtyState::Exited) {
        tracing::debug!(command = %label, "PTY EOF - process exited");
    }
}

fn write_loop(mut writer: Box<dyn Write + Send>, mut rx: mpsc::Receiver<Vec<u8>>, label: String) {
    while let Some(chunk) = rx.blocking_recv() {
        if let Err(e) = writer.write_all(&chunk).and_then(|()| writer.flush()) {
            tracing::debug!(command = %label, error = %e, "PTY write failed");
            break;
        }
    }
    tracing::trace!(command = %label, "PTY writer stopped");
}

fn terminate(
    child: &Mutex<Box<dyn Child + Send + Sync>>,
    pid: Option<u32>,
    grace: Duration,
) -> Option<u32> {
    let mut child = lock(child);

    if let Ok(Some(status)) = child.try_wait() {
        return Some(status.exit_code());
    }

    if let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) {
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGHUP) {
            tracing::debug!(pid, error = %e, "Failed to send SIGHUP");
        }
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status.exit_code());
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    if let Err(e) = child.kill() {
        tracing::warn!(pid = ?pid, error = %e, "Failed to kill PTY process");
    }
    child.wait().ok().map(|status| status.exit_code())
}
