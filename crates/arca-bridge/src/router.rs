//! Request processing and the consume loop.
//!
//! For every delivery the router:
//!
//! 1. Parses and validates the body (no remote call on failure)
//! 2. Obtains a valid ticket from the [`TicketAuthority`]
//! 3. Calls the [`LastInvoiceService`]
//! 4. Publishes `{"response": ...}` or `{"error": ...}` to the `Reply-To`
//!    address, tagged with the request's `Correlation-Id`
//! 5. Acknowledges the delivery, whatever happened before
//!
//! Failures never escape a single message: the loop keeps consuming.

use crate::errors::BridgeError;
use crate::observability::{record_query, record_reply_publish};
use bytes::Bytes;
use common::broker::{Delivery, DeliverySource, ReplyPublisher};
use common::invoice::LastInvoiceService;
use common::ticket_authority::TicketAuthority;
use common::types::{InvoiceQuery, QueryOutcome};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Pause after a broker receive error before fetching again.
pub const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Answers invoice queries from the request queue.
pub struct RequestRouter {
    authority: TicketAuthority,
    invoices: Arc<dyn LastInvoiceService>,
    replies: Arc<dyn ReplyPublisher>,
}

impl RequestRouter {
    #[must_use]
    pub fn new(
        authority: TicketAuthority,
        invoices: Arc<dyn LastInvoiceService>,
        replies: Arc<dyn ReplyPublisher>,
    ) -> Self {
        Self {
            authority,
            invoices,
            replies,
        }
    }

    /// Compute the reply for one request body.
    pub async fn process(&self, body: &[u8]) -> QueryOutcome {
        match self.answer(body).await {
            Ok(value) => QueryOutcome::Response(value),
            Err(e) => QueryOutcome::Error(e.to_string()),
        }
    }

    async fn answer(&self, body: &[u8]) -> Result<Value, BridgeError> {
        let query = InvoiceQuery::from_body(body)?;
        let ticket = self.authority.get_valid_ticket().await?;
        let value = self.invoices.last_authorized(&ticket, &query).await?;
        Ok(value)
    }

    /// Process one delivery, reply if a reply address is present, then ack.
    #[instrument(
        skip_all,
        fields(correlation_id = delivery.message.correlation_id.as_deref().unwrap_or("-"))
    )]
    pub async fn dispatch(&self, delivery: Delivery) {
        let started = Instant::now();
        let result = self.answer(&delivery.message.payload).await;

        let (outcome, label) = match result {
            Ok(value) => {
                info!(target: "arca_bridge.router", "Query answered");
                (QueryOutcome::Response(value), "success")
            }
            Err(e) => {
                warn!(
                    target: "arca_bridge.router",
                    error_type = e.error_type(),
                    error = %e,
                    "Query failed"
                );
                (QueryOutcome::Error(e.to_string()), e.error_type())
            }
        };
        record_query(label, started.elapsed());

        let correlation_id = delivery.message.correlation_id.as_deref();
        match delivery.message.reply_to.as_deref() {
            Some(reply_to) => self.reply(reply_to, correlation_id, &outcome).await,
            None => {
                debug!(target: "arca_bridge.router", "No reply address, dropping result");
                record_reply_publish("skipped");
            }
        }

        if let Err(e) = delivery.ack().await {
            warn!(target: "arca_bridge.router", error = %e, "Failed to acknowledge request");
        }
    }

    async fn reply(&self, reply_to: &str, correlation_id: Option<&str>, outcome: &QueryOutcome) {
        let body = match outcome.to_body() {
            Ok(body) => body,
            Err(e) => {
                error!(target: "arca_bridge.router", error = %e, "Failed to serialize reply");
                record_reply_publish("error");
                return;
            }
        };

        match self
            .replies
            .publish_reply(reply_to, correlation_id, Bytes::from(body))
            .await
        {
            Ok(()) => {
                debug!(target: "arca_bridge.router", reply_to = %reply_to, "Reply published");
                record_reply_publish("success");
            }
            Err(e) => {
                warn!(
                    target: "arca_bridge.router",
                    reply_to = %reply_to,
                    error = %e,
                    "Failed to publish reply"
                );
                record_reply_publish("error");
            }
        }
    }

    /// Consume deliveries one at a time until cancelled or the source ends.
    ///
    /// A delivery already being processed when cancellation fires is finished
    /// and acknowledged.
    pub async fn run<S>(&self, source: &mut S, cancel: CancellationToken)
    where
        S: DeliverySource + ?Sized,
    {
        info!(target: "arca_bridge.router", "Request router started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(target: "arca_bridge.router", "Request router shutting down");
                    break;
                }
                next = source.next_delivery() => match next {
                    Some(Ok(delivery)) => self.dispatch(delivery).await,
                    Some(Err(e)) => {
                        warn!(
                            target: "arca_bridge.router",
                            error = %e,
                            "Failed to receive request"
                        );
                        tokio::select! {
                            () = cancel.cancelled() => {}
                            () = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                        }
                    }
                    None => {
                        info!(target: "arca_bridge.router", "Request source closed");
                        break;
                    }
                }
            }
        }

        info!(target: "arca_bridge.router", "Request router stopped");
    }
}
