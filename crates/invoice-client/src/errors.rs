//! Caller-side error types.

use common::error::BrokerError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// No matching reply arrived before the deadline.
    #[error("No reply received within {elapsed:?}")]
    RequestTimedOut { elapsed: Duration },

    /// The broker could not be reached, or the reply inbox failed.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Failed to serialize request: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<BrokerError> for ClientError {
    fn from(error: BrokerError) -> Self {
        ClientError::TransportUnavailable(error.to_string())
    }
}
