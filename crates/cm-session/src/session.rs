use chrono::{DateTime, Utc};
use cm_core::config::TerminalConfig;
use portable_pty::PtySize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::path_resolver::ExecutablePathResolver;
use crate::process::ProcessHandle;
use crate::pty::{PtyProcess, Result};

// ---------------------------------------------------------------------------
// SessionRequest
// ---------------------------------------------------------------------------

/// The argv and environment a caller wants run inside a terminal.
///
/// Building this (e.g. "exec into container X") is the caller's job; the
/// factory only resolves the program and augments `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl SessionRequest {
    /// Request to run `program` with no arguments or extra environment.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append arguments, in order.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable; it wins over `TERM` and the augmented `PATH`.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One interactive terminal bound to a key.
///
/// Sessions are owned by the
/// [`TerminalSessionManager`](crate::manager::TerminalSessionManager);
/// views hold an `Arc<Session>` only to render and type into it.
pub struct Session {
    key: String,
    handle: PtyProcess,
    request: SessionRequest,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: impl Into<String>, handle: PtyProcess, request: SessionRequest) -> Self {
        Self {
            key: key.into(),
            handle,
            request,
            created_at: Utc::now(),
        }
    }

    /// The registry key this session was created under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The PTY process, for input, output and resizing.
    pub fn handle(&self) -> &PtyProcess {
        &self.handle
    }

    /// The request this session was created for.
    pub fn request(&self) -> &SessionRequest {
        &self.request
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Identity of the underlying PTY process.
    pub fn id(&self) -> Uuid {
        self.handle.id
    }

    /// Queried from the process every time.
    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("id", &self.handle.id)
            .field("program", &self.request.program)
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SessionFactory
// ---------------------------------------------------------------------------

/// Builds the process behind a new session. Blocking; the manager calls it
/// from a blocking-pool thread.
pub trait SessionFactory: Send + Sync {
    fn create(&self, key: &str, request: &SessionRequest) -> Result<Session>;
}

/// Spawns session processes over a real pseudo-terminal.
#[derive(Debug, Clone)]
pub struct PtySessionFactory {
    resolver: ExecutablePathResolver,
    terminal: TerminalConfig,
}

impl PtySessionFactory {
    pub fn new(resolver: ExecutablePathResolver, terminal: TerminalConfig) -> Self {
        Self { resolver, terminal }
    }

    fn initial_size(&self) -> PtySize {
        PtySize {
            rows: self.terminal.rows,
            cols: self.terminal.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Default for PtySessionFactory {
    fn default() -> Self {
        Self::new(ExecutablePathResolver::new(), TerminalConfig::default())
    }
}

impl SessionFactory for PtySessionFactory {
    fn create(&self, key: &str, request: &SessionRequest) -> Result<Session> {
        let program = self.resolver.resolve(&request.program);
        let mut env = vec![("TERM".to_string(), self.terminal.term.clone())];
        env.extend(self.resolver.child_env(&Default::default()));
        env.extend(request.env.iter().cloned());

        debug!(key, %program, args = ?request.args, "creating terminal session");
        let handle = PtyProcess::spawn(&program, &request.args, &env, self.initial_size())?;
        info!(key, id = %handle.id, pid = ?handle.pid(), "terminal session started");
        Ok(Session::new(key, handle, request.clone()))
    }
}
