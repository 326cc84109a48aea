use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("provider error: {0}")]
    Provider(#[from] campers_provider::ProviderError),

    #[error("ssh error: {0}")]
    Ssh(#[from] campers_ssh::SshError),

    #[error("sync error: {0}")]
    Sync(#[from] campers_sync::SyncError),

    #[error("session registry error: {0}")]
    Session(#[from] campers_session::SessionError),

    #[error("{which} script exited with status {code}")]
    ScriptFailed { which: &'static str, code: i32 },

    #[error("interrupted by signal {signal}")]
    Interrupted { signal: i32 },

    #[error("{0}")]
    Fatal(String),
}

impl SupervisorError {
    /// Remediation hint printed under the one-line summary, when one is
    /// known.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            SupervisorError::Provider(campers_provider::ProviderError::Credentials) => {
                Some("run `aws configure` or export AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY")
            }
            SupervisorError::Sync(campers_sync::SyncError::NotInstalled(_)) => {
                Some("install mutagen: https://github.com/mutagen-io/mutagen")
            }
            SupervisorError::Ssh(campers_ssh::SshError::PortInUse { .. }) => {
                Some("free the local port or remap it with --port REMOTE:LOCAL")
            }
            _ => None,
        }
    }
}
