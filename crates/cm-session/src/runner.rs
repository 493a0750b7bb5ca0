use std::io;
use std::time::Duration;

use async_trait::async_trait;
use cm_core::config::ProcessConfig;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::command::{CommandResult, CommandSpec};
use crate::path_resolver::ExecutablePathResolver;
use crate::process::{PipeProcess, PipeStreams, ProcessHandle, WaitOutcome};
use crate::tailer::{LineStream, TailSettings};

// ---------------------------------------------------------------------------
// CommandExecutor trait
// ---------------------------------------------------------------------------

/// Seam between services that shell out to the managed tools and the code
/// that actually spawns processes. Tests substitute a recording fake.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run to completion or timeout. Never fails; see [`CommandResult`].
    async fn execute(&self, spec: &CommandSpec) -> CommandResult;

    /// Follow a long-running command line by line.
    fn tail(&self, spec: CommandSpec) -> LineStream;
}

// ---------------------------------------------------------------------------
// CommandRunner
// ---------------------------------------------------------------------------

/// Runs one-shot commands with pipes, bounded by a wall-clock timeout.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    resolver: ExecutablePathResolver,
    termination_grace: Duration,
    reader_grace: Duration,
    tail_capacity: usize,
}

impl CommandRunner {
    pub fn new(resolver: ExecutablePathResolver, config: &ProcessConfig) -> Self {
        Self {
            resolver,
            termination_grace: config.termination_grace(),
            reader_grace: config.reader_grace(),
            tail_capacity: config.tail_channel_capacity.max(1),
        }
    }

    pub fn resolver(&self) -> &ExecutablePathResolver {
        &self.resolver
    }

    /// Run `spec` to completion.
    ///
    /// Stdout and stderr are drained concurrently with each other and with
    /// the exit wait, so a child that fills one pipe while the other is
    /// being read cannot stall. The child is never left running on return.
    pub async fn execute(&self, spec: &CommandSpec) -> CommandResult {
        let program = self.resolver.resolve(&spec.executable);
        let env = self.resolver.child_env(&spec.extra_env);
        debug!(command = %spec.display_line(), %program, timeout_secs = spec.timeout_secs, "executing command");

        let (process, streams) = match PipeProcess::spawn(&program, &spec.args, &env) {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(%program, error = %e, "failed to spawn command");
                return CommandResult::exception("", e);
            }
        };

        let limit = Duration::from_secs(spec.timeout_secs);
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let (outcome, drained) = {
            let PipeStreams {
                stdout: out_pipe,
                stderr: err_pipe,
            } = streams;
            let mut readers = Box::pin(async {
                let (out, err) = tokio::join!(drain(out_pipe, &mut stdout), drain(err_pipe, &mut stderr));
                out.and(err)
            });
            let waiter = process.wait_with_timeout(limit);
            tokio::pin!(waiter);

            let mut drained: Option<io::Result<()>> = None;
            let outcome = loop {
                tokio::select! {
                    outcome = &mut waiter => break outcome,
                    res = &mut readers, if drained.is_none() => drained = Some(res),
                }
            };

            if outcome.finished() && drained.is_none() {
                // The pipes close right after exit unless a grandchild kept them.
                match tokio::time::timeout(self.reader_grace, &mut readers).await {
                    Ok(res) => drained = Some(res),
                    Err(_) => warn!(%program, "output still open after exit, keeping what was read"),
                }
            }
            (outcome, drained)
        };

        let result = match outcome {
            WaitOutcome::Exited(code) => match drained {
                Some(Err(e)) => {
                    warn!(%program, error = %e, "output stream failed");
                    CommandResult::exception(String::from_utf8_lossy(&stdout), format!("output stream failed: {e}"))
                }
                _ => CommandResult::new(
                    code,
                    String::from_utf8_lossy(&stdout),
                    String::from_utf8_lossy(&stderr),
                ),
            },
            WaitOutcome::TimedOut => {
                info!(command = %spec.display_line(), timeout_secs = spec.timeout_secs, "command timed out");
                CommandResult::timeout(spec.timeout_secs, String::from_utf8_lossy(&stdout))
            }
        };

        process.kill_and_reap(self.termination_grace).await;
        debug!(%program, exit_code = result.exit_code, "command finished");
        result
    }

    /// Follow `spec` line by line. `spec.timeout_secs` is ignored.
    pub fn tail(&self, spec: CommandSpec) -> LineStream {
        LineStream::new(
            spec,
            TailSettings {
                resolver: self.resolver.clone(),
                capacity: self.tail_capacity,
                termination_grace: self.termination_grace,
            },
        )
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(ExecutablePathResolver::new(), &ProcessConfig::default())
    }
}

#[async_trait]
impl CommandExecutor for CommandRunner {
    async fn execute(&self, spec: &CommandSpec) -> CommandResult {
        CommandRunner::execute(self, spec).await
    }

    fn tail(&self, spec: CommandSpec) -> LineStream {
        CommandRunner::tail(self, spec)
    }
}

/// Read `pipe` to EOF, appending to `sink` as data arrives so a cancelled
/// drain still leaves the partial output behind.
async fn drain<R: AsyncRead + Unpin>(mut pipe: R, sink: &mut Vec<u8>) -> io::Result<()> {
    let mut buf = [0u8; 8192];
    loop {
        let n = pipe.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        sink.extend_from_slice(&buf[..n]);
    }
}
