//! NATS implementation of the broker abstractions.
//!
//! - Requests are published to a JetStream work-queue stream, so several
//!   bridge instances sharing one durable consumer compete for messages and
//!   each message is handed to one of them.
//! - Replies are published on core NATS to the caller's inbox subject.
//! - Each call subscribes to a fresh inbox (`_INBOX.<nuid>`); dropping the
//!   subscriber unsubscribes it.

use crate::broker::{
    Acknowledge, Delivery, DeliverySource, InboundMessage, ReplyDestination, ReplyEnvelope,
    ReplyPublisher, RequestTransport, CORRELATION_ID_HEADER, REPLY_TO_HEADER,
};
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::secret::ExposeSecret;
use crate::types::CorrelationId;
use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, stream};
use async_nats::{Client, ConnectOptions, HeaderMap, Subscriber};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Connected NATS broker handle.
#[derive(Clone)]
pub struct NatsBroker {
    client: Client,
    jetstream: jetstream::Context,
    request_subject: String,
}

impl std::fmt::Debug for NatsBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsBroker")
            .field("request_subject", &self.request_subject)
            .finish_non_exhaustive()
    }
}

impl NatsBroker {
    /// Connect to the broker described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Connection` if the server is unreachable.
    #[instrument(skip_all, fields(subject = %config.request_subject))]
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let client = ConnectOptions::new()
            .connection_timeout(config.connect_timeout)
            .connect(config.url.expose_secret())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        info!(target: "common.nats", "Connected to NATS");

        Ok(Self {
            jetstream: jetstream::new(client.clone()),
            client,
            request_subject: config.request_subject.clone(),
        })
    }

    /// Ensure the work-queue stream and the shared durable consumer exist and
    /// start pulling requests from it.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Setup` if the stream or consumer cannot be created.
    #[instrument(skip(self), fields(subject = %self.request_subject))]
    pub async fn request_deliveries(
        &self,
        stream_name: &str,
        consumer_name: &str,
        ack_wait: Duration,
    ) -> Result<JetStreamDeliveries, BrokerError> {
        let stream = self
            .jetstream
            .get_or_create_stream(stream::Config {
                name: stream_name.to_string(),
                subjects: vec![self.request_subject.clone()],
                retention: stream::RetentionPolicy::WorkQueue,
                ..Default::default()
            })
            .await
            .map_err(|e| BrokerError::Setup(format!("stream {stream_name}: {e}")))?;

        let consumer: jetstream::consumer::Consumer<pull::Config> = stream
            .get_or_create_consumer(
                consumer_name,
                pull::Config {
                    durable_name: Some(consumer_name.to_string()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BrokerError::Setup(format!("consumer {consumer_name}: {e}")))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BrokerError::Setup(format!("message stream: {e}")))?;

        info!(
            target: "common.nats",
            stream = stream_name,
            consumer = consumer_name,
            "Request consumer ready"
        );

        Ok(JetStreamDeliveries { messages })
    }
}

fn header_value(headers: Option<&HeaderMap>, name: &str) -> Option<String> {
    headers
        .and_then(|h| h.get(name))
        .map(|v| v.as_str().to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl ReplyPublisher for NatsBroker {
    async fn publish_reply(
        &self,
        reply_to: &str,
        correlation_id: Option<&str>,
        payload: Bytes,
    ) -> Result<(), BrokerError> {
        let mut headers = HeaderMap::new();
        if let Some(id) = correlation_id {
            headers.insert(CORRELATION_ID_HEADER, id);
        }

        self.client
            .publish_with_headers(reply_to.to_string(), headers, payload)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        self.client
            .flush()
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }
}

#[async_trait]
impl RequestTransport for NatsBroker {
    async fn open_reply_destination(&self) -> Result<Box<dyn ReplyDestination>, BrokerError> {
        let inbox = self.client.new_inbox();
        let subscriber = self
            .client
            .subscribe(inbox.clone())
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        debug!(target: "common.nats", inbox = %inbox, "Opened reply inbox");

        Ok(Box::new(NatsReplyDestination { inbox, subscriber }))
    }

    async fn publish_request(
        &self,
        payload: Bytes,
        correlation_id: &CorrelationId,
        reply_to: &str,
    ) -> Result<(), BrokerError> {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_ID_HEADER, correlation_id.to_string());
        headers.insert(REPLY_TO_HEADER, reply_to);

        // Wait for the stream ack so a missing stream surfaces as an error.
        self.jetstream
            .publish_with_headers(self.request_subject.clone(), headers, payload)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        Ok(())
    }
}

/// Per-call inbox subscription.
struct NatsReplyDestination {
    inbox: String,
    subscriber: Subscriber,
}

#[async_trait]
impl ReplyDestination for NatsReplyDestination {
    fn address(&self) -> &str {
        &self.inbox
    }

    async fn next_reply(&mut self) -> Option<ReplyEnvelope> {
        let message = self.subscriber.next().await?;
        Some(ReplyEnvelope {
            correlation_id: header_value(message.headers.as_ref(), CORRELATION_ID_HEADER),
            payload: message.payload,
        })
    }

    async fn close(&mut self) {
        if let Err(e) = self.subscriber.unsubscribe().await {
            debug!(
                target: "common.nats",
                inbox = %self.inbox,
                error = %e,
                "Inbox unsubscribe failed"
            );
        }
    }
}

/// Pull-consumer stream of request deliveries.
pub struct JetStreamDeliveries {
    messages: pull::Stream,
}

#[async_trait]
impl DeliverySource for JetStreamDeliveries {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let next = self.messages.next().await?;
        Some(match next {
            Ok(message) => {
                let headers = message.headers.as_ref();
                let inbound = InboundMessage {
                    payload: message.payload.clone(),
                    correlation_id: header_value(headers, CORRELATION_ID_HEADER),
                    reply_to: header_value(headers, REPLY_TO_HEADER),
                };
                Ok(Delivery::new(inbound, Box::new(JetStreamAck(message))))
            }
            Err(e) => {
                warn!(target: "common.nats", error = %e, "Error receiving request");
                Err(BrokerError::Receive(e.to_string()))
            }
        })
    }
}

struct JetStreamAck(jetstream::Message);

#[async_trait]
impl Acknowledge for JetStreamAck {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.0
            .ack()
            .await
            .map_err(|e| BrokerError::Acknowledge(e.to_string()))
    }
}
