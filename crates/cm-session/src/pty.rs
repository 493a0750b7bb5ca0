use std::io::{Read, Write};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::process::{lock_recover, ProcessHandle};

/// Chunks buffered in each direction before the pump threads block.
const CHANNEL_CAPACITY: usize = 256;
const READ_CHUNK: usize = 4096;

/// Forced termination waits up to `HANGUP_POLLS * HANGUP_POLL_INTERVAL`
/// after the hangup before sending SIGKILL.
#[cfg(unix)]
const HANGUP_POLLS: u32 = 5;
#[cfg(unix)]
const HANGUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("pty spawn failed: {0}")]
    SpawnFailed(String),

    #[error("pty channel closed")]
    Closed,

    #[error("pty I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pty internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PtyError>;

// ---------------------------------------------------------------------------
// PtyProcess
// ---------------------------------------------------------------------------

/// A process attached to a pseudo-terminal, with channel-based I/O.
///
/// Output is pumped by a background thread into a bounded channel; input is
/// queued through another channel to a writer thread. Both threads end once
/// [`close_channels`](Self::close_channels) has run and the child is gone.
pub struct PtyProcess {
    pub id: Uuid,
    program: String,
    pid: Option<u32>,
    reader: flume::Receiver<Vec<u8>>,
    writer: Mutex<Option<flume::Sender<Vec<u8>>>>,
    child: Mutex<Box<dyn portable_pty::Child + Send + Sync>>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
}

impl PtyProcess {
    /// Spawn `program` inside a fresh PTY of the given size.
    ///
    /// `env` is applied on top of the inherited environment.
    pub fn spawn(program: &str, args: &[String], env: &[(String, String)], size: PtySize) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(size)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        let mut command = CommandBuilder::new(program);
        command.args(args);
        for (k, v) in env {
            command.env(k, v);
        }

        let child = pair
            .slave
            .spawn_command(command)
            .map_err(|e| PtyError::SpawnFailed(format!("{program}: {e}")))?;
        // Only the child may hold the slave side, or the reader never sees EOF.
        drop(pair.slave);

        let pid = child.process_id();
        let id = Uuid::new_v4();
        debug!(program, ?args, ?pid, %id, "spawned PTY process");

        let output = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("pty reader: {e}")))?;
        let input = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("pty writer: {e}")))?;
        let (out_tx, out_rx) = flume::bounded(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = flume::bounded(CHANNEL_CAPACITY);
        spawn_pump(format!("pty-out-{}", pid.unwrap_or_default()), move || pump_output(output, out_tx))?;
        spawn_pump(format!("pty-in-{}", pid.unwrap_or_default()), move || pump_input(input, in_rx))?;

        Ok(Self {
            id,
            program: program.to_string(),
            pid,
            reader: out_rx,
            writer: Mutex::new(Some(in_tx)),
            child: Mutex::new(child),
            master: Mutex::new(Some(pair.master)),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Receiver for raw terminal output, for embedding in a terminal view.
    ///
    /// Clones share one queue: each chunk is delivered to a single receiver.
    pub fn output(&self) -> flume::Receiver<Vec<u8>> {
        self.reader.clone()
    }

    /// Everything already produced, without waiting.
    pub fn try_read_all(&self) -> Vec<u8> {
        self.reader.drain().flatten().collect()
    }

    /// Next chunk of output, or `None` if nothing arrived within `timeout`
    /// or the output side has closed.
    pub async fn read_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        match tokio::time::timeout(timeout, self.reader.recv_async()).await {
            Ok(Ok(chunk)) => Some(chunk),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// Queue raw bytes (keystrokes, control sequences) for the terminal.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        let guard = lock_recover(&self.writer, "pty writer");
        let Some(input) = guard.as_ref() else {
            return Err(PtyError::Closed);
        };
        input.send(data.to_vec()).map_err(|_| PtyError::Closed)
    }

    pub fn send_line(&self, line: &str) -> Result<()> {
        self.send(format!("{line}\n").as_bytes())
    }

    /// Tell the terminal (and so the shell) about a new window size.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let guard = lock_recover(&self.master, "pty master");
        let Some(master) = guard.as_ref() else {
            return Err(PtyError::Closed);
        };
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        master
            .resize(size)
            .map_err(|e| PtyError::Internal(format!("cannot resize to {cols}x{rows}: {e}")))?;
        debug!(id = %self.id, cols, rows, "terminal resized");
        Ok(())
    }

    /// Release the input channel and the PTY master.
    ///
    /// Idempotent. Further `send`/`resize` calls return [`PtyError::Closed`].
    pub fn close_channels(&self) {
        // Dropping the sender lets the writer thread drain and exit.
        lock_recover(&self.writer, "pty writer").take();
        if lock_recover(&self.master, "pty master").take().is_some() {
            debug!(id = %self.id, "pty master released");
        }
    }
}

#[async_trait]
impl ProcessHandle for PtyProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn try_exit_code(&self) -> std::io::Result<Option<i32>> {
        let mut child = lock_recover(&self.child, "child");
        Ok(child.try_wait()?.map(|status| status.exit_code() as i32))
    }

    /// Graceful termination sends SIGHUP, as a closing terminal would.
    /// Forced termination hangs up, gives the process a short window to
    /// exit, then kills it; it blocks the calling thread for that window.
    /// The child lock is only held for individual exit probes, so liveness
    /// checks from other threads are never stuck behind a kill.
    fn terminate(&self, force: bool) -> std::io::Result<()> {
        if self.try_exit_code()?.is_some() {
            return Ok(());
        }

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            let hung_up = ignore_gone(crate::process::send_signal(pid, libc::SIGHUP));
            if !force {
                return hung_up;
            }
            for _ in 0..HANGUP_POLLS {
                std::thread::sleep(HANGUP_POLL_INTERVAL);
                if self.try_exit_code()?.is_some() {
                    return Ok(());
                }
            }
            debug!(id = %self.id, pid, "process ignored hangup, killing");
            return ignore_gone(crate::process::send_signal(pid, libc::SIGKILL));
        }

        let mut killer = lock_recover(&self.child, "child").clone_killer();
        killer.kill()
    }
}

/// A process that is already gone needs no signal.
#[cfg(unix)]
fn ignore_gone(result: std::io::Result<()>) -> std::io::Result<()> {
    match result {
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Ok(()),
        other => other,
    }
}

fn spawn_pump<F>(name: String, body: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name)
        .spawn(body)
        .map(drop)
        .map_err(|e| PtyError::SpawnFailed(format!("pump thread: {e}")))
}

/// Copy terminal output into `out` until EOF or nobody is listening.
fn pump_output(mut output: Box<dyn Read + Send>, out: flume::Sender<Vec<u8>>) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match output.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                if out.send(buf[..n].to_vec()).is_err() {
                    return;
                }
            }
            // Linux reports EIO once the child side is gone.
            Err(e) if e.kind() == std::io::ErrorKind::Other => return,
            Err(e) => {
                debug!(error = %e, "pty output closed");
                return;
            }
        }
    }
}

/// Write queued input to the terminal until the sender side is dropped.
fn pump_input(mut input: Box<dyn Write + Send>, queued: flume::Receiver<Vec<u8>>) {
    for data in queued.iter() {
        if input.write_all(&data).and_then(|()| input.flush()).is_err() {
            return;
        }
    }
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("id", &self.id)
            .field("program", &self.program)
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .finish()
    }
}
