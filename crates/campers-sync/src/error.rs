use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    NotInstalled(String),

    #[error("failed to run mutagen: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create sync session: {0}")]
    Create(String),

    #[error("failed to check sync status: {0}")]
    StatusProbe(String),

    #[error("sync did not reach watching state within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("invalid sync parameter: {0}")]
    Validation(String),
}
