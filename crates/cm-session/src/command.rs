use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Timeout applied when a spec does not set one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Exit code meaning "the command could not be run or did not finish".
pub const FAILED_EXIT_CODE: i32 = -1;

const TIMEOUT_PREFIX: &str = "Timeout:";
const EXCEPTION_PREFIX: &str = "Exception:";

// ---------------------------------------------------------------------------
// CommandSpec
// ---------------------------------------------------------------------------

/// What to run: an executable, its argv, a wall-clock bound and environment
/// overrides. Arguments are passed as discrete elements, never through a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub executable: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub extra_env: HashMap<String, String>,
}

impl CommandSpec {
    /// Spec for `executable` with no arguments and the default timeout.
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            extra_env: HashMap::new(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments, in order.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Wall-clock limit for `execute`. Values too large to represent as a
    /// deadline mean no limit.
    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set an environment variable for the child, overriding inherited values.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(key.into(), value.into());
        self
    }

    /// `executable arg1 arg2 ...`, for logs.
    pub fn display_line(&self) -> String {
        std::iter::once(self.executable.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ---------------------------------------------------------------------------
// CommandResult
// ---------------------------------------------------------------------------

/// Outcome of one `execute` call.
///
/// Any exit code other than [`FAILED_EXIT_CODE`] is the child's own status,
/// passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    /// A result with the child's own exit code and captured output.
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// The command could not be started or its output could not be read.
    pub fn exception(stdout: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::new(FAILED_EXIT_CODE, stdout, format!("{EXCEPTION_PREFIX} {message}"))
    }

    /// The command ran past its deadline and was killed.
    pub fn timeout(timeout_secs: u64, partial_stdout: impl Into<String>) -> Self {
        Self::new(
            FAILED_EXIT_CODE,
            partial_stdout,
            format!("{TIMEOUT_PREFIX} Command did not complete within {timeout_secs}s."),
        )
    }

    /// Exit code 0.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Built by [`CommandResult::timeout`].
    pub fn is_timeout(&self) -> bool {
        self.exit_code == FAILED_EXIT_CODE && self.stderr.starts_with(TIMEOUT_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_args_and_env() {
        let spec = CommandSpec::new("docker")
            .arg("--context")
            .arg("colima")
            .args(["ps", "-a"])
            .timeout_secs(5)
            .env("DOCKER_CLI_HINTS", "false");
        assert_eq!(spec.args, vec!["--context", "colima", "ps", "-a"]);
        assert_eq!(spec.timeout_secs, 5);
        assert_eq!(spec.extra_env.get("DOCKER_CLI_HINTS").map(String::as_str), Some("false"));
        assert_eq!(spec.display_line(), "docker --context colima ps -a");
    }

    #[test]
    fn default_timeout_is_sixty_seconds() {
        assert_eq!(CommandSpec::new("colima").timeout_secs, 60);
    }

    #[test]
    fn success_tracks_exit_code_zero() {
        for code in [-1, 0, 1, 2, 125, 127, 255] {
            let result = CommandResult::new(code, "", "");
            assert_eq!(result.is_success(), code == 0, "exit code {code}");
        }
    }

    #[test]
    fn timeout_requires_both_code_and_prefix() {
        let timed_out = CommandResult::timeout(3, "partial");
        assert!(timed_out.is_timeout());
        assert_eq!(timed_out.stderr, "Timeout: Command did not complete within 3s.");
        assert_eq!(timed_out.stdout, "partial");

        assert!(!CommandResult::new(1, "", "Timeout: but a real exit").is_timeout());
        assert!(!CommandResult::exception("", "boom").is_timeout());
    }

    #[test]
    fn exception_uses_reserved_code() {
        let failed = CommandResult::exception("", "No such file or directory");
        assert_eq!(failed.exit_code, FAILED_EXIT_CODE);
        assert_eq!(failed.stderr, "Exception: No such file or directory");
        assert!(!failed.is_success());
    }
}
