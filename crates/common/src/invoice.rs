//! Downstream last-authorized-invoice query.
//!
//! The router only needs "given a valid ticket and a query, return an opaque
//! JSON result or a failure"; the WSFE SOAP client lives in the bridge crate.

use crate::ticket::AuthenticationTicket;
use crate::types::InvoiceQuery;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Failures of the downstream business call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownstreamError {
    /// Network or HTTP failure.
    #[error("Invoice service transport error: {0}")]
    Transport(String),

    /// The service answered with a SOAP fault.
    #[error("Invoice service fault: {0}")]
    Fault(String),

    /// The response could not be understood.
    #[error("Invalid invoice service response: {0}")]
    InvalidResponse(String),

    /// The query cannot be expressed as a service request (e.g. non-numeric CUIT).
    #[error("Invalid invoice query: {0}")]
    InvalidRequest(String),
}

/// Looks up the last authorized invoice number for a point of sale and type.
#[async_trait]
pub trait LastInvoiceService: Send + Sync {
    async fn last_authorized(
        &self,
        ticket: &AuthenticationTicket,
        query: &InvoiceQuery,
    ) -> Result<Value, DownstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downstream_error_display() {
        assert_eq!(
            DownstreamError::Fault("soap:Server".into()).to_string(),
            "Invoice service fault: soap:Server"
        );
        assert!(DownstreamError::InvalidRequest("cuit".into())
            .to_string()
            .starts_with("Invalid invoice query"));
    }
}
