//! Mock last-invoice service.

use async_trait::async_trait;
use common::invoice::{DownstreamError, LastInvoiceService};
use common::secret::ExposeSecret;
use common::ticket::AuthenticationTicket;
use common::types::InvoiceQuery;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// [`LastInvoiceService`] returning a fixed outcome.
///
/// Records the token and query of every call.
#[derive(Debug)]
pub struct MockInvoiceService {
    outcome: Result<Value, DownstreamError>,
    calls: AtomicU32,
    seen: Mutex<Vec<(String, InvoiceQuery)>>,
}

impl MockInvoiceService {
    /// Service answering every query with `response`.
    #[must_use]
    pub fn returning(response: Value) -> Arc<Self> {
        Self::with_outcome(Ok(response))
    }

    /// Service failing every query with `error`.
    #[must_use]
    pub fn failing(error: DownstreamError) -> Arc<Self> {
        Self::with_outcome(Err(error))
    }

    fn with_outcome(outcome: Result<Value, DownstreamError>) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Number of queries received.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Tokens of the tickets presented, in call order.
    #[must_use]
    pub fn tokens_seen(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(token, _)| token.clone())
            .collect()
    }

    /// Queries received, in call order.
    #[must_use]
    pub fn queries_seen(&self) -> Vec<InvoiceQuery> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, query)| query.clone())
            .collect()
    }
}

#[async_trait]
impl LastInvoiceService for MockInvoiceService {
    async fn last_authorized(
        &self,
        ticket: &AuthenticationTicket,
        query: &InvoiceQuery,
    ) -> Result<Value, DownstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((ticket.token().expose_secret().to_string(), query.clone()));
        self.outcome.clone()
    }
}
