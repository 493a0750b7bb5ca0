use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::path_resolver::ExecutablePathResolver;
use crate::process::{PipeProcess, ProcessHandle, WaitOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of a tailed process's output, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEvent {
    pub stream: OutputStream,
    pub line: String,
}

/// Knobs a [`LineStream`] needs from its runner.
#[derive(Debug, Clone)]
pub(crate) struct TailSettings {
    pub resolver: ExecutablePathResolver,
    pub capacity: usize,
    pub termination_grace: Duration,
}

enum TailState {
    Pending(Box<(CommandSpec, TailSettings)>),
    Running(RunningTail),
    Finished,
}

struct RunningTail {
    process: Arc<PipeProcess>,
    lines: BoxStream<'static, LineEvent>,
    readers: Vec<JoinHandle<()>>,
    grace: Duration,
}

// ---------------------------------------------------------------------------
// LineStream
// ---------------------------------------------------------------------------

/// Lines from a continuously running process, e.g. `docker logs -f`.
///
/// The process is spawned on the first poll. Lines from one stream arrive in
/// the order they were written; stdout and stderr interleave in whatever
/// order their readers deliver them. The stream ends once both pipes reach
/// EOF. Cancelling, or dropping the stream, stops both readers and kills the
/// process. A finished stream never restarts.
pub struct LineStream {
    state: TailState,
    failure: Option<String>,
}

impl LineStream {
    pub(crate) fn new(spec: CommandSpec, settings: TailSettings) -> Self {
        Self {
            state: TailState::Pending(Box::new((spec, settings))),
            failure: None,
        }
    }

    /// A stream that yields nothing, for fakes and disabled views.
    pub fn finished() -> Self {
        Self {
            state: TailState::Finished,
            failure: None,
        }
    }

    /// Next line, or `None` once the stream has ended.
    pub async fn next_line(&mut self) -> Option<LineEvent> {
        self.next().await
    }

    /// Why the process could not be started, if it could not.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, TailState::Finished)
    }

    /// Pid of the tailed process while it is being followed.
    pub fn pid(&self) -> Option<u32> {
        match &self.state {
            TailState::Running(running) => running.process.pid(),
            _ => None,
        }
    }

    /// Stop following: abort both readers and kill the process.
    pub fn cancel(&mut self) {
        match std::mem::replace(&mut self.state, TailState::Finished) {
            TailState::Running(running) => {
                debug!(pid = ?running.process.pid(), "cancelling tail");
                running.shutdown();
            }
            TailState::Pending(_) | TailState::Finished => {}
        }
    }

    fn start(&mut self, spec: CommandSpec, settings: TailSettings) {
        let program = settings.resolver.resolve(&spec.executable);
        let env = settings.resolver.child_env(&spec.extra_env);
        let (process, streams) = match PipeProcess::spawn(&program, &spec.args, &env) {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(%program, error = %e, "failed to spawn tailed command");
                self.failure = Some(format!("Exception: {e}"));
                self.state = TailState::Finished;
                return;
            }
        };
        debug!(command = %spec.display_line(), pid = ?process.pid(), "tailing command");

        let (tx, rx) = flume::bounded::<LineEvent>(settings.capacity);
        let readers = vec![
            tokio::spawn(pump(streams.stdout, OutputStream::Stdout, tx.clone())),
            tokio::spawn(pump(streams.stderr, OutputStream::Stderr, tx)),
        ];
        self.state = TailState::Running(RunningTail {
            process: Arc::new(process),
            lines: rx.into_stream().boxed(),
            readers,
            grace: settings.termination_grace,
        });
    }
}

impl RunningTail {
    fn shutdown(self) {
        for reader in &self.readers {
            reader.abort();
        }
        if self.process.is_alive() {
            if let Err(e) = self.process.terminate(true) {
                warn!(pid = ?self.process.pid(), error = %e, "failed to kill tailed process");
            }
        }
        let process = self.process;
        let grace = self.grace;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    process.kill_and_reap(grace).await;
                });
            }
            // kill_on_drop still signals the child; reaping is left to tokio.
            Err(_) => debug!(pid = ?process.pid(), "no runtime to reap tailed process"),
        }
    }

    /// Both readers hit EOF. Reap the child in the background.
    fn finish(self) {
        let process = self.process;
        let grace = self.grace;
        tokio::spawn(async move {
            match process.wait_with_timeout(grace).await {
                WaitOutcome::Exited(code) => {
                    debug!(pid = ?process.pid(), exit_code = code, "tailed command exited");
                }
                WaitOutcome::TimedOut => {
                    // Closed both pipes but kept running; it has no consumer left.
                    process.kill_and_reap(grace).await;
                }
            }
        });
    }
}

impl Stream for LineStream {
    type Item = LineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<LineEvent>> {
        let this = &mut *self;
        if matches!(this.state, TailState::Pending(_)) {
            if let TailState::Pending(pending) = std::mem::replace(&mut this.state, TailState::Finished) {
                let (spec, settings) = *pending;
                this.start(spec, settings);
            }
        }

        let running = match &mut this.state {
            TailState::Running(running) => running,
            TailState::Pending(_) | TailState::Finished => return Poll::Ready(None),
        };
        match running.lines.poll_next_unpin(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(event)),
            Poll::Ready(None) => {
                if let TailState::Running(running) = std::mem::replace(&mut this.state, TailState::Finished) {
                    running.finish();
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for LineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            TailState::Pending(_) => "pending",
            TailState::Running(_) => "running",
            TailState::Finished => "finished",
        };
        f.debug_struct("LineStream")
            .field("state", &state)
            .field("failure", &self.failure)
            .finish()
    }
}

/// Forward complete lines from `pipe` until EOF, a read error, or the
/// consumer going away.
async fn pump<R: AsyncRead + Unpin>(pipe: R, stream: OutputStream, tx: flume::Sender<LineEvent>) {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let event = LineEvent {
                    stream,
                    line: strip_line_ending(&buf),
                };
                if tx.send_async(event).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(?stream, error = %e, "tail reader failed");
                break;
            }
        }
    }
}

fn strip_line_ending(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_endings_are_stripped() {
        assert_eq!(strip_line_ending(b"hello\n"), "hello");
        assert_eq!(strip_line_ending(b"hello\r\n"), "hello");
        assert_eq!(strip_line_ending(b"no newline"), "no newline");
        assert_eq!(strip_line_ending(b"\n"), "");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        assert_eq!(strip_line_ending(b"a\xffb\n"), "a\u{fffd}b");
    }

    #[tokio::test]
    async fn finished_stream_yields_nothing() {
        let mut stream = LineStream::finished();
        assert!(stream.is_finished());
        assert_eq!(stream.next_line().await, None);
        assert!(stream.failure().is_none());
    }
}
