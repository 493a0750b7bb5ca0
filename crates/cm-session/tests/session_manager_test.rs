#![cfg(unix)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cm_session::process::ProcessHandle;
use cm_session::pty::{PtyError, Result};
use cm_session::{PtySessionFactory, Session, SessionFactory, SessionRequest, TerminalSessionManager};

/// Real PTY factory that counts how many processes it spawned.
#[derive(Default)]
struct CountingFactory {
    inner: PtySessionFactory,
    spawned: AtomicUsize,
}

impl CountingFactory {
    fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

impl SessionFactory for CountingFactory {
    fn create(&self, key: &str, request: &SessionRequest) -> Result<Session> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        // Widen the race window for concurrent callers.
        std::thread::sleep(Duration::from_millis(50));
        self.inner.create(key, request)
    }
}

/// Factory that keeps working after the process is already running.
#[derive(Default)]
struct SlowFinishFactory {
    inner: PtySessionFactory,
    spawned: AtomicUsize,
}

impl SessionFactory for SlowFinishFactory {
    fn create(&self, key: &str, request: &SessionRequest) -> Result<Session> {
        let session = self.inner.create(key, request)?;
        self.spawned.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(300));
        Ok(session)
    }
}

fn manager() -> (TerminalSessionManager, Arc<CountingFactory>) {
    let factory = Arc::new(CountingFactory::default());
    let manager = TerminalSessionManager::new(factory.clone(), Duration::from_secs(2));
    (manager, factory)
}

fn cat() -> SessionRequest {
    SessionRequest::new("/bin/cat")
}

async fn wait_until_dead(session: &Session) {
    session.handle().wait_with_timeout(Duration::from_secs(3)).await;
}

// ===========================================================================
// Reuse
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_or_create_twice_reuses_live_session() {
    let (manager, factory) = manager();

    let first = manager.get_or_create("c1", cat()).await.expect("create");
    let second = manager.get_or_create("c1", cat()).await.expect("reuse");

    assert!(Arc::ptr_eq(&first, &second), "expected the same session object");
    assert_eq!(first.id(), second.id());
    assert_eq!(first.handle().pid(), second.handle().pid());
    assert_eq!(factory.spawned(), 1);
    assert!(manager.has_active_session("c1"));

    manager.close_all_sessions().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_get_or_create_spawns_once() {
    let (manager, factory) = manager();
    let manager = Arc::new(manager);

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_or_create("same", cat()).await })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        let session = task.await.expect("join").expect("create");
        ids.push(session.id());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1, "all callers should share one session");
    assert_eq!(factory.spawned(), 1);

    manager.close_all_sessions().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn different_keys_get_different_sessions() {
    let (manager, factory) = manager();

    let a = manager.get_or_create("a", cat()).await.expect("create a");
    let b = manager.get_or_create("b", cat()).await.expect("create b");

    assert_ne!(a.id(), b.id());
    assert_eq!(a.key(), "a");
    assert_eq!(b.key(), "b");
    assert_eq!(factory.spawned(), 2);
    assert_eq!(manager.len(), 2);

    manager.close_session("a").await;
    assert!(!manager.has_active_session("a"));
    assert!(manager.has_active_session("b"), "closing one key must not affect another");

    manager.close_all_sessions().await;
}

// ===========================================================================
// Close
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_then_get_spawns_fresh_process() {
    let (manager, factory) = manager();

    let first = manager.get_or_create("c1", cat()).await.expect("create");
    manager.close_session("c1").await;
    assert!(!first.is_alive(), "closed session's process should be gone");

    let second = manager.get_or_create("c1", cat()).await.expect("recreate");
    assert_ne!(first.id(), second.id());
    assert_ne!(first.handle().pid(), second.handle().pid());
    assert!(second.is_alive());
    assert_eq!(factory.spawned(), 2);

    manager.close_all_sessions().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_session_is_idempotent() {
    let (manager, _factory) = manager();

    manager.get_or_create("c1", cat()).await.expect("create");
    manager.close_session("c1").await;
    assert!(!manager.has_active_session("c1"));
    manager.close_session("c1").await;
    assert!(!manager.has_active_session("c1"));

    // Never-registered keys are a no-op too.
    manager.close_session("never-created").await;
    assert!(manager.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closed_session_rejects_input() {
    let (manager, _factory) = manager();

    let session = manager.get_or_create("c1", cat()).await.expect("create");
    manager.close_session("c1").await;
    assert!(matches!(session.handle().send_line("late"), Err(PtyError::Closed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_all_sessions_empties_registry() {
    let (manager, _factory) = manager();

    let sessions = vec![
        manager.get_or_create("x", cat()).await.expect("x"),
        manager.get_or_create("y", cat()).await.expect("y"),
        manager.get_or_create("z", cat()).await.expect("z"),
    ];
    manager.close_all_sessions().await;

    assert!(manager.is_empty());
    for session in sessions {
        assert!(!session.is_alive(), "{} still alive", session.key());
    }
}

// ===========================================================================
// Dead sessions
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dead_session_is_evicted_and_replaced() {
    let (manager, factory) = manager();

    let short_lived = SessionRequest::new("/bin/sh").args(["-c", "exit 0"]);
    let first = manager.get_or_create("c1", short_lived).await.expect("create");
    wait_until_dead(&first).await;

    assert!(!manager.has_active_session("c1"), "probe must notice the exit");
    assert!(manager.session("c1").is_some(), "dead entry stays until reuse or close");

    let second = manager.get_or_create("c1", cat()).await.expect("replace");
    assert_ne!(first.id(), second.id());
    assert!(second.is_alive());
    assert_eq!(factory.spawned(), 2);
    assert_eq!(manager.len(), 1);

    manager.close_all_sessions().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn has_active_session_is_false_for_unknown_key() {
    let (manager, _factory) = manager();
    assert!(!manager.has_active_session("nope"));
}

// ===========================================================================
// Abandoned creates
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_create_is_registered_not_leaked() {
    let factory = Arc::new(SlowFinishFactory::default());
    let manager = TerminalSessionManager::new(factory.clone(), Duration::from_secs(2));
    let stubborn = SessionRequest::new("/bin/sh").args(["-c", "trap '' HUP; exec sleep 30"]);

    let abandoned = tokio::time::timeout(Duration::from_millis(50), manager.get_or_create("k", stubborn.clone())).await;
    assert!(abandoned.is_err(), "create should still have been in flight");

    // The next caller waits for the in-flight create and gets its process.
    let session = manager.get_or_create("k", stubborn).await.expect("reuse");
    assert_eq!(factory.spawned.load(Ordering::SeqCst), 1);
    assert!(session.is_alive());

    manager.close_all_sessions().await;
    assert!(!session.is_alive(), "closing must kill even a hangup-ignoring shell");
}

// ===========================================================================
// Spawn failures
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawn_failure_propagates_and_registers_nothing() {
    let (manager, _factory) = manager();

    let result = manager
        .get_or_create("broken", SessionRequest::new("/nonexistent/binary/xyz"))
        .await;
    match result {
        Err(PtyError::SpawnFailed(_)) => {}
        other => panic!("expected SpawnFailed, got: {other:?}"),
    }
    assert!(manager.session("broken").is_none());
    assert!(!manager.has_active_session("broken"));
}

// ===========================================================================
// Interaction through a managed session
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn managed_session_round_trips_input() {
    let (manager, _factory) = manager();
    let session = manager.get_or_create("echo", cat()).await.expect("create");

    session.handle().send_line("managed_input").expect("send");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let mut text = String::new();
    while tokio::time::Instant::now() < deadline && !text.contains("managed_input") {
        if let Some(chunk) = session.handle().read_timeout(Duration::from_millis(100)).await {
            text.push_str(&String::from_utf8_lossy(&chunk));
        }
    }
    assert!(text.contains("managed_input"), "got: {text:?}");

    // A view detaching keeps the session alive; only close ends it.
    drop(session);
    assert!(manager.has_active_session("echo"));
    manager.close_session("echo").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_path_has_tool_prefix() {
    let (manager, _factory) = manager();
    let request = SessionRequest::new("sh").args(["-c", "echo \"PATH=$PATH\"; exec cat"]);
    let session = manager.get_or_create("path", request).await.expect("create");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let mut text = String::new();
    while tokio::time::Instant::now() < deadline && !text.contains('\n') {
        if let Some(chunk) = session.handle().read_timeout(Duration::from_millis(100)).await {
            text.push_str(&String::from_utf8_lossy(&chunk));
        }
    }
    assert!(
        text.contains("PATH=/usr/local/bin:/opt/homebrew/bin:/opt/local/bin"),
        "session PATH lacks the tool prefix: {text:?}"
    );

    manager.close_all_sessions().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminal_env_is_applied() {
    let (manager, _factory) = manager();
    let request = SessionRequest::new("sh")
        .args(["-c", "echo TERM=$TERM EXTRA=$EXTRA; exec cat"])
        .env("EXTRA", "yes");
    let session = manager.get_or_create("env", request).await.expect("create");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let mut text = String::new();
    while tokio::time::Instant::now() < deadline && !text.contains("EXTRA=yes") {
        if let Some(chunk) = session.handle().read_timeout(Duration::from_millis(100)).await {
            text.push_str(&String::from_utf8_lossy(&chunk));
        }
    }
    assert!(text.contains("TERM=xterm-256color"), "got: {text:?}");
    assert!(text.contains("EXTRA=yes"), "got: {text:?}");
    assert_eq!(session.request().program, "sh");

    manager.close_all_sessions().await;
}
