//! Mock ticket authority.
//!
//! Replays scripted responses in order and counts calls, so tests can assert
//! how many times the authority was contacted. Once the script runs out the
//! last response is repeated.
//!
//! # Example
//!
//! ```rust,ignore
//! use bridge_test_utils::MockAuthority;
//!
//! let authority = MockAuthority::builder()
//!     .fail_with(AuthorityError::TicketAlreadyValid)
//!     .with_delay(Duration::from_millis(50))
//!     .build();
//! ```

use async_trait::async_trait;
use common::ticket::AuthenticationTicket;
use common::ticket_authority::{AuthorityClient, AuthorityError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Scripted = Result<AuthenticationTicket, AuthorityError>;

/// Scripted [`AuthorityClient`].
#[derive(Debug)]
pub struct MockAuthority {
    calls: AtomicU32,
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    delay: Duration,
}

impl MockAuthority {
    /// Create a MockAuthority builder.
    #[must_use]
    pub fn builder() -> MockAuthorityBuilder {
        MockAuthorityBuilder::default()
    }

    /// Authority that always issues `ticket`.
    #[must_use]
    pub fn issuing(ticket: AuthenticationTicket) -> Arc<Self> {
        Self::builder().respond_with(ticket).build()
    }

    /// Authority that always fails with `error`.
    #[must_use]
    pub fn failing(error: AuthorityError) -> Arc<Self> {
        Self::builder().fail_with(error).build()
    }

    /// Number of ticket requests received.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorityClient for MockAuthority {
    async fn request_ticket(&self) -> Result<AuthenticationTicket, AuthorityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(response) => {
                *last = Some(response.clone());
                response
            }
            None => last.clone().unwrap_or_else(|| {
                Err(AuthorityError::Transport("no scripted response".into()))
            }),
        }
    }
}

/// Builder for MockAuthority configuration.
#[derive(Debug, Default)]
pub struct MockAuthorityBuilder {
    script: Vec<Scripted>,
    delay: Duration,
}

impl MockAuthorityBuilder {
    /// Queue a successful response.
    #[must_use]
    pub fn respond_with(mut self, ticket: AuthenticationTicket) -> Self {
        self.script.push(Ok(ticket));
        self
    }

    /// Queue a failure.
    #[must_use]
    pub fn fail_with(mut self, error: AuthorityError) -> Self {
        self.script.push(Err(error));
        self
    }

    /// Delay every response, widening the window for concurrent callers.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Build the MockAuthority.
    #[must_use]
    pub fn build(self) -> Arc<MockAuthority> {
        Arc::new(MockAuthority {
            calls: AtomicU32::new(0),
            script: Mutex::new(self.script.into()),
            last: Mutex::new(None),
            delay: self.delay,
        })
    }
}
