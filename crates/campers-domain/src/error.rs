use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid instance type: {0}")]
    InvalidInstanceType(String),

    #[error("invalid image id format: '{0}'")]
    InvalidImageId(String),

    #[error("invalid port spec '{0}' (expected PORT or REMOTE:LOCAL)")]
    InvalidPortSpec(String),

    #[error("invalid camp name: '{0}'")]
    InvalidCampName(String),

    #[error("unknown instance state: '{0}'")]
    UnknownInstanceState(String),

    #[error("unknown exit policy: '{0}' (expected stop, detach, or destroy)")]
    UnknownExitPolicy(String),

    #[error("unknown architecture: '{0}' (expected x86_64 or arm64)")]
    UnknownArchitecture(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
