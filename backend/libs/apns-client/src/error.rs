use thiserror::Error;

use crate::client::ExecutionMode;

/// APNs Client Error Types
///
/// Configuration-class variants (`Config`, `Certificate`, `EnvironmentMismatch`,
/// `KeyMaterial`) only ever come out of client construction. The rest describe a
/// single push attempt.
#[derive(Error, Debug)]
pub enum ApnsError {
    #[error("APNs configuration error: {0}")]
    Config(String),

    #[error("Invalid push certificate: {0}")]
    Certificate(String),

    #[error("Invalid environment for this certificate: {0}")]
    EnvironmentMismatch(String),

    #[error("Failed to load token signing key: {0}")]
    KeyMaterial(String),

    #[error("Failed to sign provider token: {0}")]
    Signing(String),

    #[error("Cannot encode APNs request: {0}")]
    InvalidRequest(String),

    #[error("APNs transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{actual:?} client cannot serve {expected:?} requests")]
    Capability {
        expected: ExecutionMode,
        actual: ExecutionMode,
    },

    #[error("APNs client is closed")]
    Closed,
}

impl ApnsError {
    /// True for errors raised while building a client; these are never reported per push.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ApnsError::Config(_)
                | ApnsError::Certificate(_)
                | ApnsError::EnvironmentMismatch(_)
                | ApnsError::KeyMaterial(_)
        )
    }
}

impl From<openssl::error::ErrorStack> for ApnsError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        ApnsError::Certificate(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApnsError>;
