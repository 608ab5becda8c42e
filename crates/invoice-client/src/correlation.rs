//! Correlated request/reply over the broker.
//!
//! Each call:
//!
//! 1. Generates a fresh [`CorrelationId`]
//! 2. Opens a private reply destination
//! 3. Publishes the query with `Reply-To` set to that destination
//! 4. Waits for a reply carrying the same correlation id, ignoring others
//! 5. Closes the destination, so late replies are discarded
//!
//! Dropping the call future releases the destination as well.

use crate::errors::ClientError;
use bytes::Bytes;
use common::broker::RequestTransport;
use common::types::{CorrelationId, InvoiceQuery, InvoiceQueryResult, QueryOutcome};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Outcome used when a reply body is not JSON.
pub const UNPARSEABLE_REPLY_MESSAGE: &str = "Failed to parse response as JSON";

/// Issues invoice queries and waits for their replies.
#[derive(Clone)]
pub struct CorrelationClient {
    transport: Arc<dyn RequestTransport>,
}

impl std::fmt::Debug for CorrelationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationClient").finish_non_exhaustive()
    }
}

impl CorrelationClient {
    #[must_use]
    pub fn new(transport: Arc<dyn RequestTransport>) -> Self {
        Self { transport }
    }

    /// Send `query` and wait up to `timeout` for the matching reply.
    ///
    /// # Errors
    ///
    /// - `ClientError::RequestTimedOut` - no matching reply before the deadline,
    ///   which also bounds opening the inbox and publishing the request
    /// - `ClientError::TransportUnavailable` - the reply inbox could not be
    ///   opened, the request could not be published, or the inbox was closed
    ///   by the broker
    #[instrument(skip_all, fields(correlation_id))]
    pub async fn call(
        &self,
        query: &InvoiceQuery,
        timeout: Duration,
    ) -> Result<InvoiceQueryResult, ClientError> {
        let correlation_id = CorrelationId::new();
        tracing::Span::current().record("correlation_id", tracing::field::display(&correlation_id));

        let body = Bytes::from(query.to_body()?);
        let started = Instant::now();
        let deadline = started + timeout;

        let timed_out = || ClientError::RequestTimedOut {
            elapsed: started.elapsed(),
        };

        let mut destination =
            tokio::time::timeout_at(deadline, self.transport.open_reply_destination())
                .await
                .map_err(|_| timed_out())??;

        let published = tokio::time::timeout_at(
            deadline,
            self.transport.publish_request(body, &correlation_id, destination.address()),
        )
        .await;
        let failure = match published {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(ClientError::from(e)),
            Err(_) => Some(timed_out()),
        };
        if let Some(e) = failure {
            warn!(target: "invoice_client.correlation", error = %e, "Failed to publish request");
            destination.close().await;
            return Err(e);
        }
        debug!(
            target: "invoice_client.correlation",
            reply_to = %destination.address(),
            "Request published, waiting for reply"
        );

        let result = loop {
            match tokio::time::timeout_at(deadline, destination.next_reply()).await {
                Err(_) => break Err(timed_out()),
                Ok(None) => {
                    break Err(ClientError::TransportUnavailable(
                        "reply destination closed before a reply arrived".to_string(),
                    ))
                }
                Ok(Some(reply)) if reply.matches(&correlation_id) => {
                    break Ok(InvoiceQueryResult {
                        correlation_id,
                        outcome: parse_outcome(&reply.payload),
                    })
                }
                Ok(Some(reply)) => {
                    debug!(
                        target: "invoice_client.correlation",
                        other = ?reply.correlation_id,
                        "Ignoring reply for another request"
                    );
                }
            }
        };

        destination.close().await;

        if let Err(e) = &result {
            warn!(target: "invoice_client.correlation", error = %e, "Call failed");
        }
        result
    }
}

/// Interpret a reply body.
///
/// `{"response": ...}` and `{"error": "..."}` map to their variants; any other
/// JSON value is taken as the response itself.
fn parse_outcome(payload: &[u8]) -> QueryOutcome {
    let Ok(value) = serde_json::from_slice::<Value>(payload) else {
        return QueryOutcome::Error(UNPARSEABLE_REPLY_MESSAGE.to_string());
    };

    serde_json::from_value::<QueryOutcome>(value.clone())
        .unwrap_or(QueryOutcome::Response(value))
}
