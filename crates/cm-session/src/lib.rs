//! Process execution and interactive terminal sessions for colimator.
//!
//! Everything the front-end does with `colima` and `docker` goes through
//! this crate: quick one-shot queries, followed log streams, and shells
//! inside containers.
//!
//! Key components:
//! - [`path_resolver`]: finds tools that a GUI-launched process cannot see on `PATH`
//! - [`process`]: the `ProcessHandle` capability and its pipe-backed variant
//! - [`pty`]: the PTY-backed variant used for interactive sessions
//! - [`runner`]: one-shot execution with timeouts and deadlock-free draining
//! - [`tailer`]: cancellable line streams from long-running commands
//! - [`session`] and [`manager`]: per-key cached terminal sessions
//! - [`target`] and [`log_line`]: container shells and log line parsing

pub mod command;
pub mod log_line;
pub mod manager;
pub mod path_resolver;
pub mod process;
pub mod pty;
pub mod runner;
pub mod session;
pub mod tailer;
pub mod target;

pub use command::{CommandResult, CommandSpec};
pub use manager::TerminalSessionManager;
pub use runner::{CommandExecutor, CommandRunner};
pub use session::{PtySessionFactory, Session, SessionFactory, SessionRequest};
pub use tailer::{LineEvent, LineStream, OutputStream};
