use std::io;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

/// How often `wait_with_timeout` re-checks a running child.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// WaitOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The process exited with this code.
    Exited(i32),
    /// The deadline passed with the process still running.
    TimedOut,
}

impl WaitOutcome {
    pub fn finished(&self) -> bool {
        matches!(self, WaitOutcome::Exited(_))
    }
}

// ---------------------------------------------------------------------------
// ProcessHandle
// ---------------------------------------------------------------------------

/// A spawned OS process, independent of how its I/O is wired.
///
/// Implemented by [`PipeProcess`] for one-shot commands and by
/// [`PtyProcess`](crate::pty::PtyProcess) for interactive sessions. Liveness,
/// bounded waiting and teardown are shared through the provided methods.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit probe. `Ok(None)` while the process is running.
    fn try_exit_code(&self) -> io::Result<Option<i32>>;

    /// Ask the process to stop. `force` kills it outright.
    fn terminate(&self, force: bool) -> io::Result<()>;

    /// Live probe; a process whose status cannot be read counts as dead.
    fn is_alive(&self) -> bool {
        matches!(self.try_exit_code(), Ok(None))
    }

    /// Wait until the process exits or `timeout` elapses.
    async fn wait_with_timeout(&self, timeout: Duration) -> WaitOutcome {
        // A timeout too large to add to now has no deadline at all.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.try_exit_code() {
                Ok(Some(code)) => return WaitOutcome::Exited(code),
                Ok(None) => {}
                Err(e) => {
                    debug!(pid = ?self.pid(), error = %e, "exit status unavailable");
                    return WaitOutcome::Exited(-1);
                }
            }
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut;
                    }
                    POLL_INTERVAL.min(deadline - now)
                }
                None => POLL_INTERVAL,
            };
            tokio::time::sleep(pause).await;
        }
    }

    /// Force-terminate if still running, then wait up to `grace` for the
    /// exit to be observed. Returns `true` once the process is gone.
    async fn kill_and_reap(&self, grace: Duration) -> bool {
        if !self.is_alive() {
            return true;
        }
        if let Err(e) = self.terminate(true) {
            warn!(pid = ?self.pid(), error = %e, "forced termination failed");
        }
        let outcome = self.wait_with_timeout(grace).await;
        if !outcome.finished() {
            warn!(pid = ?self.pid(), ?grace, "process still alive after forced termination");
        }
        outcome.finished()
    }
}

/// Send a POSIX signal to `pid`.
#[cfg(unix)]
pub(crate) fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

pub(crate) fn lock_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| {
        warn!("{what} lock was poisoned, recovering");
        e.into_inner()
    })
}

#[cfg(unix)]
fn status_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn status_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

// ---------------------------------------------------------------------------
// PipeProcess
// ---------------------------------------------------------------------------

/// Output pipes of a [`PipeProcess`], handed to whoever drains them.
#[derive(Debug)]
pub struct PipeStreams {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// A child process with anonymous pipes for stdout and stderr.
///
/// Stdin is closed right after spawn so commands that read it see EOF
/// instead of hanging. The child is killed if this handle is dropped.
pub struct PipeProcess {
    program: String,
    pid: Option<u32>,
    child: Mutex<Child>,
}

impl PipeProcess {
    /// Spawn `program` with `args`, applying `env` on top of the inherited
    /// environment. Must be called from within a tokio runtime.
    pub fn spawn(program: &str, args: &[String], env: &[(String, String)]) -> io::Result<(Self, PipeStreams)> {
        let mut command = Command::new(program);
        command
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        drop(child.stdin.take());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr was not captured"))?;

        let pid = child.id();
        debug!(program, ?args, ?pid, "spawned piped process");

        Ok((
            Self {
                program: program.to_string(),
                pid,
                child: Mutex::new(child),
            },
            PipeStreams { stdout, stderr },
        ))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl ProcessHandle for PipeProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn try_exit_code(&self) -> io::Result<Option<i32>> {
        let mut child = lock_recover(&self.child, "child");
        Ok(child.try_wait()?.map(status_code))
    }

    fn terminate(&self, force: bool) -> io::Result<()> {
        #[cfg(unix)]
        if !force {
            if let Some(pid) = self.pid {
                return send_signal(pid, libc::SIGTERM);
            }
        }
        let mut child = lock_recover(&self.child, "child");
        match child.start_kill() {
            Ok(()) => Ok(()),
            // Already reaped.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for PipeProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeProcess")
            .field("program", &self.program)
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .finish()
    }
}
