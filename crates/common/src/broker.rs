//! Broker abstractions for the request/reply protocol.
//!
//! The router side consumes [`Delivery`] values from a [`DeliverySource`],
//! publishes replies through a [`ReplyPublisher`] and acknowledges every
//! delivery exactly once. The caller side opens a [`ReplyDestination`] per call
//! through a [`RequestTransport`] and publishes its request with the
//! destination's address.
//!
//! Correlation ids and reply addresses travel as headers
//! ([`CORRELATION_ID_HEADER`], [`REPLY_TO_HEADER`]).

use crate::error::BrokerError;
use crate::types::CorrelationId;
use async_trait::async_trait;
use bytes::Bytes;

/// Header carrying the request's correlation id, echoed on the reply.
pub const CORRELATION_ID_HEADER: &str = "Correlation-Id";

/// Header carrying the address replies must be published to.
pub const REPLY_TO_HEADER: &str = "Reply-To";

/// An inbound request as seen by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub payload: Bytes,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

/// Acknowledges one delivery back to the broker.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
}

/// A received message together with its acknowledgment handle.
pub struct Delivery {
    pub message: InboundMessage,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    #[must_use]
    pub fn new(message: InboundMessage, acker: Box<dyn Acknowledge>) -> Self {
        Self { message, acker }
    }

    /// Acknowledge the delivery.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Acknowledge` if the broker rejects the ack.
    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Stream of inbound deliveries bound to the request queue.
#[async_trait]
pub trait DeliverySource: Send {
    /// Next delivery; `None` once the source is exhausted.
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>>;
}

/// Publishes replies to caller-provided addresses.
#[async_trait]
pub trait ReplyPublisher: Send + Sync {
    async fn publish_reply(
        &self,
        reply_to: &str,
        correlation_id: Option<&str>,
        payload: Bytes,
    ) -> Result<(), BrokerError>;
}

/// A reply as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEnvelope {
    pub correlation_id: Option<String>,
    pub payload: Bytes,
}

impl ReplyEnvelope {
    /// Whether this reply carries the given correlation id.
    #[must_use]
    pub fn matches(&self, id: &CorrelationId) -> bool {
        self.correlation_id
            .as_deref()
            .and_then(|raw| raw.parse::<CorrelationId>().ok())
            .is_some_and(|parsed| parsed == *id)
    }
}

/// Ephemeral, exclusive reply destination owned by a single call.
///
/// Implementations release the underlying subscription when dropped, so a
/// cancelled call does not leak broker resources.
#[async_trait]
pub trait ReplyDestination: Send {
    /// Address to put in the request's reply-to header.
    fn address(&self) -> &str;

    /// Next message delivered to this destination; `None` if it was closed.
    async fn next_reply(&mut self) -> Option<ReplyEnvelope>;

    /// Stop receiving and release the destination.
    async fn close(&mut self);
}

/// Caller-side transport: opens reply destinations and publishes requests.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    async fn open_reply_destination(&self) -> Result<Box<dyn ReplyDestination>, BrokerError>;

    async fn publish_request(
        &self,
        payload: Bytes,
        correlation_id: &CorrelationId,
        reply_to: &str,
    ) -> Result<(), BrokerError>;
}
