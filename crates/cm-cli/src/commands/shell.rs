use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use cm_core::config::Config;
use cm_session::process::ProcessHandle;
use cm_session::target::ContainerShellTarget;
use cm_session::{Session, TerminalSessionManager};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run the `shell` subcommand: attach the terminal to a container shell
/// until the shell exits or Ctrl-C is pressed.
///
/// Input is forwarded a line at a time; the local terminal stays in
/// cooked mode.
pub async fn run(config: &Config, container: String, profile: Option<String>) -> anyhow::Result<i32> {
    let target = ContainerShellTarget::new(container, profile);
    let manager = TerminalSessionManager::from_config(config);
    let session = manager.get_or_create(target.session_key(), target.to_request()).await?;
    tracing::info!(container = target.short_id(), context = %target.docker_context(), "shell attached");

    forward_stdin(Arc::clone(&session));

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut stdout = std::io::stdout();

    let code = loop {
        tokio::select! {
            chunk = session.handle().read_timeout(POLL_INTERVAL) => match chunk {
                Some(bytes) => {
                    stdout.write_all(&bytes)?;
                    stdout.flush()?;
                }
                None => {
                    match session.handle().try_exit_code() {
                        Ok(Some(code)) => break code,
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "lost track of shell process");
                            break 1;
                        }
                    }
                }
            },
            _ = &mut interrupt => {
                tracing::info!("interrupted, closing shell");
                break 130;
            }
        }
    };

    manager.close_all_sessions().await;
    Ok(code)
}

/// Stdin is blocking, so it is read on its own thread. The thread ends at
/// EOF or once the session stops accepting input.
fn forward_stdin(session: Arc<Session>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if session.handle().send_line(&line).is_err() {
                break;
            }
        }
    });
}
