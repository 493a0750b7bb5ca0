use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Package-manager bin directories, prepended to every child's `PATH`.
pub const PACKAGE_MANAGER_DIRS: [&str; 3] = ["/usr/local/bin", "/opt/homebrew/bin", "/opt/local/bin"];

/// Per-user bin directories of the two managed tools, relative to `$HOME`.
pub const TOOL_HOME_DIRS: [&str; 2] = [".colima/bin", ".docker/bin"];

/// Last-resort OS directories, searched during resolution only.
pub const SYSTEM_DIRS: [&str; 4] = ["/usr/bin", "/bin", "/usr/sbin", "/sbin"];

#[cfg(unix)]
const PATH_LIST_SEPARATOR: char = ':';
#[cfg(not(unix))]
const PATH_LIST_SEPARATOR: char = ';';

// ---------------------------------------------------------------------------
// ExecutablePathResolver
// ---------------------------------------------------------------------------

/// Finds tools for processes launched from a GUI session.
///
/// Apps started from a desktop launcher do not source shell rc files, so
/// their inherited `PATH` usually lacks Homebrew and per-user tool
/// directories. The resolver looks in those locations explicitly and builds
/// the `PATH` handed to every child.
#[derive(Debug, Clone)]
pub struct ExecutablePathResolver {
    path_prefix: Vec<PathBuf>,
    system_dirs: Vec<PathBuf>,
}

impl ExecutablePathResolver {
    /// Resolver rooted at the current user's home directory.
    pub fn new() -> Self {
        Self::for_home(dirs::home_dir().as_deref())
    }

    /// Resolver for an explicit home directory. Without one, the per-user
    /// tool directories are skipped.
    pub fn for_home(home: Option<&Path>) -> Self {
        let mut path_prefix: Vec<PathBuf> = PACKAGE_MANAGER_DIRS.iter().map(PathBuf::from).collect();
        if let Some(home) = home {
            path_prefix.extend(TOOL_HOME_DIRS.iter().map(|rel| home.join(rel)));
        }
        Self {
            path_prefix,
            system_dirs: SYSTEM_DIRS.iter().map(PathBuf::from).collect(),
        }
    }

    /// Resolver with fully custom directory lists.
    pub fn with_dirs(path_prefix: Vec<PathBuf>, system_dirs: Vec<PathBuf>) -> Self {
        Self {
            path_prefix,
            system_dirs,
        }
    }

    /// Directories prepended to the inherited `PATH`, in order.
    pub fn path_prefix(&self) -> &[PathBuf] {
        &self.path_prefix
    }

    /// Every directory searched by [`resolve`](Self::resolve), in order.
    pub fn search_dirs(&self) -> impl Iterator<Item = &Path> {
        self.path_prefix
            .iter()
            .chain(self.system_dirs.iter())
            .map(PathBuf::as_path)
    }

    /// Resolve a bare command name to an absolute path.
    ///
    /// Names that already contain a separator are returned as-is. When no
    /// search directory holds an executable file of that name, the name is
    /// returned unchanged so the OS lookup still gets a chance.
    pub fn resolve(&self, name: &str) -> String {
        if name.is_empty() || name.contains('/') || name.contains(std::path::MAIN_SEPARATOR) {
            return name.to_string();
        }
        for dir in self.search_dirs() {
            let candidate = dir.join(name);
            if is_executable(&candidate) {
                return candidate.to_string_lossy().into_owned();
            }
        }
        name.to_string()
    }

    /// `PATH` value for a child: the fixed prefix followed by `inherited`.
    pub fn augmented_path(&self, inherited: Option<&str>) -> String {
        let mut parts: Vec<String> = self
            .path_prefix
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        if let Some(inherited) = inherited.filter(|s| !s.is_empty()) {
            parts.push(inherited.to_string());
        }
        parts.join(&PATH_LIST_SEPARATOR.to_string())
    }

    /// Environment overrides for a child process.
    ///
    /// The child inherits the current environment; these entries are applied
    /// on top of it. `PATH` comes first so that `extra` can still replace it.
    pub fn child_env(&self, extra: &HashMap<String, String>) -> Vec<(String, String)> {
        let inherited = std::env::var("PATH").ok();
        let mut env = vec![("PATH".to_string(), self.augmented_path(inherited.as_deref()))];
        let mut overrides: Vec<(String, String)> =
            extra.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        overrides.sort();
        env.extend(overrides);
        env
    }
}

impl Default for ExecutablePathResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
