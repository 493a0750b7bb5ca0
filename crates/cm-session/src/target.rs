use crate::session::SessionRequest;

const DOCKER: &str = "docker";
const DEFAULT_PROFILE: &str = "default";
const SHORT_ID_LEN: usize = 12;

/// An interactive shell inside a container running under a colima profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerShellTarget {
    pub container_id: String,
    pub profile: Option<String>,
}

impl ContainerShellTarget {
    pub fn new(container_id: impl Into<String>, profile: Option<String>) -> Self {
        Self {
            container_id: container_id.into(),
            profile,
        }
    }

    /// Sessions are cached per container.
    pub fn session_key(&self) -> &str {
        &self.container_id
    }

    /// Docker context that colima registers for the profile.
    pub fn docker_context(&self) -> String {
        match self.profile.as_deref() {
            None | Some(DEFAULT_PROFILE) => "colima".to_string(),
            Some(profile) => format!("colima-{profile}"),
        }
    }

    pub fn short_id(&self) -> &str {
        match self.container_id.char_indices().nth(SHORT_ID_LEN) {
            Some((idx, _)) => &self.container_id[..idx],
            None => &self.container_id,
        }
    }

    /// Prints a banner, then replaces itself with bash if the image has it
    /// and sh otherwise.
    fn shell_script(&self) -> String {
        let context = self.docker_context();
        let short_id = self.short_id();
        [
            format!(r#"printf '\033[1;34m▶ Connecting to container: {short_id}\033[0m\n'"#),
            format!(r#"printf '\033[0;90m  Command: docker --context {context} exec -it {short_id} <shell>\033[0m\n'"#),
            "echo".to_string(),
            "if [ -x /bin/bash ]; then exec /bin/bash; else exec /bin/sh; fi".to_string(),
        ]
        .join("\n")
    }

    pub fn to_request(&self) -> SessionRequest {
        SessionRequest::new(DOCKER).args([
            "--context".to_string(),
            self.docker_context(),
            "exec".to_string(),
            "-it".to_string(),
            self.container_id.clone(),
            "/bin/sh".to_string(),
            "-c".to_string(),
            self.shell_script(),
        ])
    }
}
