use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialize session record: {0}")]
    Serialize(#[from] serde_json::Error),
}
