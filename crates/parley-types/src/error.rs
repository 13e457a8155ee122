use thiserror::Error;

/// Failures of the delivery core that are surfaced to the caller.
///
/// Push failures are deliberately absent: they are reported as
/// outcomes by the push gateway and never fail the triggering call.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl DeliveryError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    /// Message safe to show to an end user. Storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}
