use std::sync::Arc;
use std::time::Duration;

use cm_core::config::Config;
use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::path_resolver::ExecutablePathResolver;
use crate::process::ProcessHandle;
use crate::pty::{PtyError, Result};
use crate::session::{PtySessionFactory, Session, SessionFactory, SessionRequest};

// ---------------------------------------------------------------------------
// TerminalSessionManager
// ---------------------------------------------------------------------------

/// Registry of interactive sessions, at most one live session per key.
///
/// Construct one at startup and share it by `Arc`. Sessions outlive the views
/// that show them: hiding a terminal never closes it. Creation and closing
/// are serialised per key; different keys never wait on each other.
pub struct TerminalSessionManager {
    factory: Arc<dyn SessionFactory>,
    sessions: Arc<DashMap<String, Arc<Session>>>,
    key_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    termination_grace: Duration,
}

impl TerminalSessionManager {
    pub fn new(factory: Arc<dyn SessionFactory>, termination_grace: Duration) -> Self {
        info!("creating TerminalSessionManager");
        Self {
            factory,
            sessions: Arc::new(DashMap::new()),
            key_locks: DashMap::new(),
            termination_grace,
        }
    }

    /// Manager backed by real PTYs, configured from `config`.
    pub fn from_config(config: &Config) -> Self {
        let factory = PtySessionFactory::new(ExecutablePathResolver::new(), config.terminal.clone());
        Self::new(Arc::new(factory), config.process.termination_grace())
    }

    /// Return the live session for `key`, creating one if needed.
    ///
    /// A dead session under `key` is torn down first. Concurrent calls for
    /// the same key spawn at most one process. Spawn failures are returned.
    pub async fn get_or_create(&self, key: &str, request: SessionRequest) -> Result<Arc<Session>> {
        let guard = self.key_lock(key).lock_owned().await;

        if let Some(existing) = self.session(key) {
            if existing.is_alive() {
                debug!(key, id = %existing.id(), "reusing terminal session");
                return Ok(existing);
            }
            info!(key, id = %existing.id(), "evicting dead terminal session");
            self.sessions.remove(key);
            self.teardown(existing).await;
        }

        // Spawn and register off the caller's future: a caller that gives up
        // mid-spawn still leaves the process in the registry, where a later
        // get_or_create reuses it and close_session ends it.
        let registration = tokio::spawn(create_and_register(
            Arc::clone(&self.factory),
            Arc::clone(&self.sessions),
            key.to_string(),
            request,
            guard,
        ));
        let created = registration
            .await
            .map_err(|e| PtyError::Internal(format!("session registration task failed: {e}")))?;
        if created.is_err() {
            self.prune_key_lock(key);
        }
        created
    }

    /// Close the session for `key`. Idempotent; teardown errors are logged.
    pub async fn close_session(&self, key: &str) {
        let lock = self.key_lock(key);
        {
            let _guard = lock.lock().await;
            match self.sessions.remove(key) {
                Some((_, session)) => {
                    info!(key, id = %session.id(), "closing terminal session");
                    self.teardown(session).await;
                }
                None => debug!(key, "no terminal session to close"),
            }
        }
        drop(lock);
        self.prune_key_lock(key);
    }

    /// Whether `key` has a session whose process is running right now.
    pub fn has_active_session(&self, key: &str) -> bool {
        self.session(key).map(|s| s.is_alive()).unwrap_or(false)
    }

    /// Registered session for `key`, alive or not.
    pub fn session(&self, key: &str) -> Option<Arc<Session>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn keys(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every registered session. Meant for application shutdown.
    pub async fn close_all_sessions(&self) {
        let keys = self.keys();
        info!(count = keys.len(), "closing all terminal sessions");
        join_all(keys.iter().map(|key| self.close_session(key))).await;
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let entry = self.key_locks.entry(key.to_string()).or_default();
        Arc::clone(entry.value())
    }

    /// Drop the lock for `key` unless another caller still holds or awaits it.
    fn prune_key_lock(&self, key: &str) {
        self.key_locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn teardown(&self, session: Arc<Session>) {
        if session.is_alive() {
            // Forced PTY termination sleeps between hangup and kill.
            let target = Arc::clone(&session);
            match tokio::task::spawn_blocking(move || target.handle().terminate(true)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(key = session.key(), error = %e, "failed to terminate session process"),
                Err(e) => warn!(key = session.key(), error = %e, "session terminate task failed"),
            }
            let outcome = session.handle().wait_with_timeout(self.termination_grace).await;
            if !outcome.finished() {
                warn!(key = session.key(), "session process still alive after termination");
            }
        }
        session.handle().close_channels();
        debug!(key = session.key(), id = %session.id(), "terminal session released");
    }
}

async fn create_and_register(
    factory: Arc<dyn SessionFactory>,
    sessions: Arc<DashMap<String, Arc<Session>>>,
    key: String,
    request: SessionRequest,
    _guard: OwnedMutexGuard<()>,
) -> Result<Arc<Session>> {
    let create_key = key.clone();
    let session = tokio::task::spawn_blocking(move || factory.create(&create_key, &request))
        .await
        .map_err(|e| PtyError::Internal(format!("session spawn task failed: {e}")))??;

    let session = Arc::new(session);
    sessions.insert(key, Arc::clone(&session));
    Ok(session)
}

impl std::fmt::Debug for TerminalSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSessionManager")
            .field("sessions", &self.sessions.len())
            .field("termination_grace", &self.termination_grace)
            .finish()
    }
}
