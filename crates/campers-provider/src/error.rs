use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Credentials missing or unusable. Always fatal.
    #[error("cloud credentials not found or invalid — run `aws configure` or set AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY")]
    Credentials,

    /// Valid credentials, insufficient permission for the operation.
    #[error("insufficient cloud permissions: {0}")]
    Authz(String),

    /// Any other provider API error, tagged with the provider's error code.
    #[error("provider API error {code}: {message}")]
    Api { code: String, message: String },

    /// Transport-level failure talking to the provider.
    #[error("provider connection failure: {0}")]
    Connection(String),

    /// Image query or instance selector resolved nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad selector, bad instance type, cross-region conflict. Raised before
    /// any resource is acquired, never during cleanup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProviderError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::Api { code: code.into(), message: message.into() }
    }

    /// Codes worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Api { code, .. } if matches!(
                code.as_str(),
                "DependencyViolation" | "InvalidGroup.InUse" | "RequestLimitExceeded"
            )
        )
    }

    /// Codes that mean "already gone" on a delete path — success for cleanup.
    pub fn is_cleanup_success(&self) -> bool {
        matches!(
            self,
            ProviderError::Api { code, .. } if matches!(
                code.as_str(),
                "InvalidGroup.NotFound" | "InvalidInstanceID.NotFound" | "InvalidKeyPair.NotFound"
            )
        )
    }
}

impl From<campers_domain::DomainError> for ProviderError {
    fn from(e: campers_domain::DomainError) -> Self {
        ProviderError::InvalidConfig(e.to_string())
    }
}
