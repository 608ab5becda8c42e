//! In-memory broker.
//!
//! Implements both sides of the request/reply protocol:
//!
//! - [`RequestTransport`]: reply inboxes plus a request queue
//! - [`ReplyPublisher`]: replies are routed to open inboxes, or recorded and
//!   dropped when the inbox is gone (like a core NATS publish)
//! - [`DeliverySource`] via [`InMemoryBroker::deliveries`], with per-delivery
//!   ack counts
//!
//! Open inboxes are tracked so tests can assert that a finished or cancelled
//! call released its destination.

use async_trait::async_trait;
use bytes::Bytes;
use common::broker::{
    Acknowledge, Delivery, DeliverySource, InboundMessage, ReplyDestination, ReplyEnvelope,
    ReplyPublisher, RequestTransport,
};
use common::error::BrokerError;
use common::types::CorrelationId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A reply published through [`ReplyPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedReply {
    pub reply_to: String,
    pub correlation_id: Option<String>,
    pub payload: Bytes,
}

impl PublishedReply {
    /// Payload parsed as JSON.
    #[must_use]
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).expect("reply payload is JSON")
    }
}

#[derive(Debug, Default)]
struct State {
    inboxes: HashMap<String, mpsc::UnboundedSender<ReplyEnvelope>>,
    replies: Vec<PublishedReply>,
    acks: Vec<u32>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    requests_tx: mpsc::UnboundedSender<Result<InboundMessage, BrokerError>>,
    requests_rx: Mutex<Option<mpsc::UnboundedReceiver<Result<InboundMessage, BrokerError>>>>,
    next_inbox: AtomicU64,
    fail_publish_request: AtomicBool,
    fail_publish_reply: AtomicBool,
    fail_open: AtomicBool,
    stall_publish_request: AtomicBool,
    stall_open: AtomicBool,
}

/// Cloneable handle to a shared in-memory broker.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                requests_tx,
                requests_rx: Mutex::new(Some(requests_rx)),
                next_inbox: AtomicU64::new(0),
                fail_publish_request: AtomicBool::new(false),
                fail_publish_reply: AtomicBool::new(false),
                fail_open: AtomicBool::new(false),
                stall_publish_request: AtomicBool::new(false),
                stall_open: AtomicBool::new(false),
            }),
        }
    }

    /// Take the request queue's consumer side. Panics if taken twice.
    #[must_use]
    pub fn deliveries(&self) -> InMemoryDeliveries {
        let rx = self
            .inner
            .requests_rx
            .lock()
            .unwrap()
            .take()
            .expect("deliveries() called twice");
        InMemoryDeliveries {
            rx,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Enqueue a raw request, bypassing [`RequestTransport`].
    pub fn push_request(
        &self,
        payload: impl Into<Bytes>,
        correlation_id: Option<&str>,
        reply_to: Option<&str>,
    ) {
        self.push_message(InboundMessage {
            payload: payload.into(),
            correlation_id: correlation_id.map(str::to_string),
            reply_to: reply_to.map(str::to_string),
        });
    }

    /// Enqueue an already built message.
    pub fn push_message(&self, message: InboundMessage) {
        let _ = self.inner.requests_tx.send(Ok(message));
    }

    /// Enqueue a receive failure.
    pub fn push_receive_error(&self, error: BrokerError) {
        let _ = self.inner.requests_tx.send(Err(error));
    }

    /// Deliver a reply straight to an inbox. Returns false if it is not open.
    pub fn inject_reply(
        &self,
        address: &str,
        correlation_id: Option<&str>,
        payload: &[u8],
    ) -> bool {
        let state = self.inner.state.lock().unwrap();
        state.inboxes.get(address).is_some_and(|tx| {
            tx.send(ReplyEnvelope {
                correlation_id: correlation_id.map(str::to_string),
                payload: Bytes::copy_from_slice(payload),
            })
            .is_ok()
        })
    }

    /// Make `publish_request` fail.
    pub fn fail_request_publishes(&self) {
        self.inner.fail_publish_request.store(true, Ordering::SeqCst);
    }

    /// Make `publish_reply` fail.
    pub fn fail_reply_publishes(&self) {
        self.inner.fail_publish_reply.store(true, Ordering::SeqCst);
    }

    /// Make `open_reply_destination` fail.
    pub fn fail_destination_opens(&self) {
        self.inner.fail_open.store(true, Ordering::SeqCst);
    }

    /// Make `publish_request` never complete, like a broker that never acks.
    pub fn stall_request_publishes(&self) {
        self.inner.stall_publish_request.store(true, Ordering::SeqCst);
    }

    /// Make `open_reply_destination` never complete.
    pub fn stall_destination_opens(&self) {
        self.inner.stall_open.store(true, Ordering::SeqCst);
    }

    /// Addresses of currently open inboxes.
    #[must_use]
    pub fn open_destinations(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .unwrap()
            .inboxes
            .keys()
            .cloned()
            .collect()
    }

    /// Every reply published so far, including dropped ones.
    #[must_use]
    pub fn published_replies(&self) -> Vec<PublishedReply> {
        self.inner.state.lock().unwrap().replies.clone()
    }

    /// Ack count per delivery, in delivery order.
    #[must_use]
    pub fn ack_counts(&self) -> Vec<u32> {
        self.inner.state.lock().unwrap().acks.clone()
    }

    /// Wait until `n` replies have been published.
    pub async fn wait_for_replies(&self, n: usize) -> Vec<PublishedReply> {
        loop {
            let replies = self.published_replies();
            if replies.len() >= n {
                return replies;
            }
            tokio::task::yield_now().await;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    /// Wait until `n` deliveries have been acknowledged at least once.
    pub async fn wait_for_acks(&self, n: usize) -> Vec<u32> {
        loop {
            let acks = self.ack_counts();
            if acks.iter().filter(|count| **count > 0).count() >= n {
                return acks;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl ReplyPublisher for InMemoryBroker {
    async fn publish_reply(
        &self,
        reply_to: &str,
        correlation_id: Option<&str>,
        payload: Bytes,
    ) -> Result<(), BrokerError> {
        if self.inner.fail_publish_reply.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish("injected reply publish failure".into()));
        }

        let mut state = self.inner.state.lock().unwrap();
        state.replies.push(PublishedReply {
            reply_to: reply_to.to_string(),
            correlation_id: correlation_id.map(str::to_string),
            payload: payload.clone(),
        });
        if let Some(tx) = state.inboxes.get(reply_to) {
            let _ = tx.send(ReplyEnvelope {
                correlation_id: correlation_id.map(str::to_string),
                payload,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RequestTransport for InMemoryBroker {
    async fn open_reply_destination(&self) -> Result<Box<dyn ReplyDestination>, BrokerError> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(BrokerError::Subscribe("injected subscribe failure".into()));
        }
        if self.inner.stall_open.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let n = self.inner.next_inbox.fetch_add(1, Ordering::SeqCst);
        let address = format!("_INBOX.test.{n}");
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .state
            .lock()
            .unwrap()
            .inboxes
            .insert(address.clone(), tx);

        Ok(Box::new(InMemoryReplyDestination {
            address,
            rx,
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn publish_request(
        &self,
        payload: Bytes,
        correlation_id: &CorrelationId,
        reply_to: &str,
    ) -> Result<(), BrokerError> {
        if self.inner.fail_publish_request.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish("injected request publish failure".into()));
        }
        if self.inner.stall_publish_request.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        self.push_message(InboundMessage {
            payload,
            correlation_id: Some(correlation_id.to_string()),
            reply_to: Some(reply_to.to_string()),
        });
        Ok(())
    }
}

/// Inbox owned by one call; removed from the broker on close or drop.
struct InMemoryReplyDestination {
    address: String,
    rx: mpsc::UnboundedReceiver<ReplyEnvelope>,
    inner: Arc<Inner>,
}

impl InMemoryReplyDestination {
    fn release(&mut self) {
        self.inner.state.lock().unwrap().inboxes.remove(&self.address);
        self.rx.close();
    }
}

#[async_trait]
impl ReplyDestination for InMemoryReplyDestination {
    fn address(&self) -> &str {
        &self.address
    }

    async fn next_reply(&mut self) -> Option<ReplyEnvelope> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for InMemoryReplyDestination {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.inboxes.remove(&self.address);
        }
    }
}

/// Consumer side of the request queue.
pub struct InMemoryDeliveries {
    rx: mpsc::UnboundedReceiver<Result<InboundMessage, BrokerError>>,
    inner: Arc<Inner>,
}

#[async_trait]
impl DeliverySource for InMemoryDeliveries {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let next = self.rx.recv().await?;
        Some(next.map(|message| {
            let index = {
                let mut state = self.inner.state.lock().unwrap();
                state.acks.push(0);
                state.acks.len() - 1
            };
            Delivery::new(
                message,
                Box::new(CountingAck {
                    index,
                    inner: Arc::clone(&self.inner),
                }),
            )
        }))
    }
}

struct CountingAck {
    index: usize,
    inner: Arc<Inner>,
}

#[async_trait]
impl Acknowledge for CountingAck {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.inner.state.lock().unwrap().acks[self.index] += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_reaches_open_inbox_and_drop_releases_it() {
        let broker = InMemoryBroker::new();
        let mut destination = broker.open_reply_destination().await.unwrap();
        let address = destination.address().to_string();
        assert_eq!(broker.open_destinations(), vec![address.clone()]);

        broker
            .publish_reply(&address, Some("abc"), Bytes::from_static(b"{}"))
            .await
            .unwrap();
        let reply = destination.next_reply().await.unwrap();
        assert_eq!(reply.correlation_id.as_deref(), Some("abc"));

        drop(destination);
        assert!(broker.open_destinations().is_empty());

        // Late replies are recorded but go nowhere.
        broker
            .publish_reply(&address, Some("abc"), Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(broker.published_replies().len(), 2);
    }

    #[tokio::test]
    async fn test_requests_are_delivered_and_acks_counted() {
        let broker = InMemoryBroker::new();
        let mut deliveries = broker.deliveries();

        broker
            .publish_request(Bytes::from_static(b"{}"), &CorrelationId::new(), "inbox")
            .await
            .unwrap();

        let delivery = deliveries.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.message.reply_to.as_deref(), Some("inbox"));
        assert_eq!(broker.ack_counts(), vec![0]);

        delivery.ack().await.unwrap();
        assert_eq!(broker.ack_counts(), vec![1]);
    }
}
