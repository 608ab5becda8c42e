//! ARCA bridge error types.
//!
//! A `BridgeError` describes why one request could not be answered. Its
//! `Display` text becomes the reply's `error` field, so it must not carry
//! secrets.

use common::invoice::DownstreamError;
use common::ticket::TicketError;
use common::types::QueryParseError;
use thiserror::Error;

/// Failure of a single request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The request body was rejected before any remote call.
    #[error("{0}")]
    Validation(#[from] QueryParseError),

    /// WSAA rejected the ticket request.
    #[error("{0}")]
    AuthenticationFailed(String),

    /// WSAA reports a valid ticket exists but none is available here.
    #[error("{0}")]
    AuthorityUnavailable(String),

    /// The WSFE call failed.
    #[error("Error querying last authorized invoice: {0}")]
    DownstreamFailure(#[from] DownstreamError),
}

impl From<TicketError> for BridgeError {
    fn from(error: TicketError) -> Self {
        match error {
            TicketError::AuthorityUnavailable(_) => {
                BridgeError::AuthorityUnavailable(error.to_string())
            }
            TicketError::AuthenticationFailed(_)
            | TicketError::InvalidTicket(_)
            | TicketError::Persistence(_) => BridgeError::AuthenticationFailed(error.to_string()),
        }
    }
}

impl BridgeError {
    /// Bounded label for metrics and logs.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            BridgeError::Validation(_) => "validation",
            BridgeError::AuthenticationFailed(_) => "authentication_failed",
            BridgeError::AuthorityUnavailable(_) => "authority_unavailable",
            BridgeError::DownstreamFailure(_) => "downstream_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_is_verbatim() {
        let error = BridgeError::from(QueryParseError::MissingParameters);
        assert_eq!(
            error.to_string(),
            "Missing required parameters in message: cuit, pto_vta, cbte_tipo"
        );
        assert_eq!(error.error_type(), "validation");
    }

    #[test]
    fn test_ticket_errors_map_to_bridge_errors() {
        let failed = BridgeError::from(TicketError::AuthenticationFailed("bad cert".into()));
        assert_eq!(failed.to_string(), "Authentication failed: bad cert");
        assert_eq!(failed.error_type(), "authentication_failed");

        let unavailable = BridgeError::from(TicketError::AuthorityUnavailable("none".into()));
        assert_eq!(unavailable.error_type(), "authority_unavailable");
        assert_eq!(unavailable.to_string(), "Authority unavailable: none");
    }

    #[test]
    fn test_downstream_error_display() {
        let error = BridgeError::from(DownstreamError::Transport("timed out".into()));
        assert_eq!(
            error.to_string(),
            "Error querying last authorized invoice: Invoice service transport error: timed out"
        );
        assert_eq!(error.error_type(), "downstream_failure");
    }
}
