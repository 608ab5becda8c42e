//! Single-flight Authentication Ticket acquisition.
//!
//! [`TicketAuthority`] hands out a ticket that is valid at the moment of
//! return, refreshing it through an [`AuthorityClient`] when the cached one is
//! within the safety margin of its expiry.
//!
//! # Refresh protocol
//!
//! - `Idle → Refreshing → Idle`. Only one refresh is in flight at a time;
//!   callers that arrive during a refresh await the same shared future and
//!   receive its outcome, success or failure.
//! - WSAA rejects a new ticket request while a valid one exists for the same
//!   certificate and service ("El CEE ya posee un TA valido..."). That conflict
//!   is answered with the last known ticket when it has not expired yet; the
//!   durable record is re-read first so a ticket obtained by another process
//!   sharing it is considered.
//! - Any other authority failure is returned as
//!   [`TicketError::AuthenticationFailed`]. No retry happens here.
//!
//! # Example
//!
//! ```rust,ignore
//! use common::ticket_authority::{TicketAuthority, DEFAULT_SAFETY_MARGIN};
//! use common::ticket_store::{FileTicketRecord, TicketStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(TicketStore::new(Arc::new(FileTicketRecord::new("ssl_files", "wsfe"))));
//! store.hydrate().await?;
//!
//! let authority = TicketAuthority::new(store, Arc::new(wsaa_client), DEFAULT_SAFETY_MARGIN);
//! let ticket = authority.get_valid_ticket().await?;
//! ```

use crate::ticket::{AuthenticationTicket, TicketError};
use crate::ticket_store::TicketStore;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

// =============================================================================
// Constants
// =============================================================================

/// Default safety margin: refresh five minutes before expiration.
///
/// Covers clock differences with WSAA and the latency of the business call
/// that follows.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(300);

// =============================================================================
// Authority boundary
// =============================================================================

/// Failures reported by the ticket-issuing authority.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    /// A valid ticket already exists for this credential and service.
    #[error("A valid ticket already exists for the requested service")]
    TicketAlreadyValid,

    /// The authority rejected the request (SOAP fault).
    #[error("Ticket request rejected: {0}")]
    Rejected(String),

    /// The signed request could not be produced.
    #[error("Ticket request signing failed: {0}")]
    Signing(String),

    /// Network or HTTP failure.
    #[error("Authority transport error: {0}")]
    Transport(String),

    /// The response could not be understood.
    #[error("Invalid authority response: {0}")]
    InvalidResponse(String),
}

/// Exchanges a signed ticket request for a new ticket.
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    async fn request_ticket(&self) -> Result<AuthenticationTicket, AuthorityError>;
}

// =============================================================================
// Ticket Authority
// =============================================================================

type SharedRefresh = Shared<BoxFuture<'static, Result<AuthenticationTicket, TicketError>>>;

struct Inner {
    store: Arc<TicketStore>,
    client: Arc<dyn AuthorityClient>,
    safety_margin: Duration,
    /// In-flight refresh; `Some` while `Refreshing`.
    in_flight: Mutex<Option<SharedRefresh>>,
}

/// Hands out valid tickets, refreshing at most once concurrently.
#[derive(Clone)]
pub struct TicketAuthority {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TicketAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketAuthority")
            .field("store", &self.inner.store)
            .field("safety_margin", &self.inner.safety_margin)
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

impl TicketAuthority {
    #[must_use]
    pub fn new(
        store: Arc<TicketStore>,
        client: Arc<dyn AuthorityClient>,
        safety_margin: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                safety_margin,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<TicketStore> {
        &self.inner.store
    }

    /// Whether a refresh is currently in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Return a ticket valid beyond the safety margin, refreshing if needed.
    ///
    /// # Errors
    ///
    /// - `TicketError::AuthenticationFailed` - the authority rejected the request
    /// - `TicketError::AuthorityUnavailable` - the authority reports a valid
    ///   ticket exists but no unexpired ticket is available locally
    #[instrument(skip_all)]
    pub async fn get_valid_ticket(&self) -> Result<AuthenticationTicket, TicketError> {
        if let Some(ticket) = self.cached_valid() {
            trace_reuse(&ticket);
            return Ok(ticket);
        }

        let refresh = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match slot.as_ref() {
                Some(refresh) => {
                    debug!(target: "common.ticket_authority", "Joining in-flight ticket refresh");
                    refresh.clone()
                }
                None => {
                    // A refresh may have completed between the fast path and
                    // taking the lock.
                    if let Some(ticket) = self.cached_valid() {
                        trace_reuse(&ticket);
                        return Ok(ticket);
                    }
                    let refresh = refresh(Arc::clone(&self.inner)).boxed().shared();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await
    }

    fn cached_valid(&self) -> Option<AuthenticationTicket> {
        self.inner
            .store
            .current()
            .filter(|ticket| TicketStore::is_valid(ticket, self.inner.safety_margin))
    }
}

fn trace_reuse(ticket: &AuthenticationTicket) {
    tracing::trace!(
        target: "common.ticket_authority",
        expires_at = %ticket.expires_at(),
        "Reusing cached ticket"
    );
}

/// One refresh attempt. Clears the in-flight slot before resolving.
async fn refresh(inner: Arc<Inner>) -> Result<AuthenticationTicket, TicketError> {
    debug!(target: "common.ticket_authority", "Requesting new ticket from authority");

    let outcome = match inner.client.request_ticket().await {
        Ok(ticket) => {
            if let Err(e) = inner.store.set(ticket.clone()).await {
                warn!(
                    target: "common.ticket_authority",
                    error = %e,
                    "New ticket could not be persisted, keeping it in memory"
                );
            }
            info!(
                target: "common.ticket_authority",
                generated_at = %ticket.generated_at(),
                expires_at = %ticket.expires_at(),
                "New ticket acquired"
            );
            Ok(ticket)
        }
        Err(AuthorityError::TicketAlreadyValid) => fall_back_to_known_ticket(&inner).await,
        Err(e) => {
            warn!(target: "common.ticket_authority", error = %e, "Ticket request failed");
            Err(TicketError::AuthenticationFailed(e.to_string()))
        }
    };

    inner
        .in_flight
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();

    outcome
}

async fn fall_back_to_known_ticket(inner: &Inner) -> Result<AuthenticationTicket, TicketError> {
    match inner.store.reload().await {
        Some(ticket) if TicketStore::is_valid(&ticket, Duration::ZERO) => {
            warn!(
                target: "common.ticket_authority",
                expires_at = %ticket.expires_at(),
                "Authority reports a valid ticket already exists, reusing last known ticket"
            );
            Ok(ticket)
        }
        Some(ticket) => {
            warn!(
                target: "common.ticket_authority",
                expires_at = %ticket.expires_at(),
                "Authority reports a valid ticket already exists, but the known ticket has expired"
            );
            Err(TicketError::AuthorityUnavailable(
                "authority reports a valid ticket exists but the last known ticket has expired"
                    .into(),
            ))
        }
        None => {
            warn!(
                target: "common.ticket_authority",
                "Authority reports a valid ticket already exists, but none is known locally"
            );
            Err(TicketError::AuthorityUnavailable(
                "authority reports a valid ticket exists but none is cached".into(),
            ))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::secret::{ExposeSecret, SecretString};
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Authority that replays scripted responses and counts calls.
    struct ScriptedAuthority {
        calls: AtomicU32,
        responses: Mutex<VecDeque<Result<AuthenticationTicket, AuthorityError>>>,
        delay: Duration,
    }

    impl ScriptedAuthority {
        fn new(responses: Vec<Result<AuthenticationTicket, AuthorityError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                responses: Mutex::new(responses.into()),
                delay: Duration::from_millis(50),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthorityClient for ScriptedAuthority {
        async fn request_ticket(&self) -> Result<AuthenticationTicket, AuthorityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AuthorityError::Transport("script exhausted".into())))
        }
    }

    fn ticket(token: &str, expires_in: chrono::Duration) -> AuthenticationTicket {
        let now = Utc::now();
        AuthenticationTicket::new(
            SecretString::from(token),
            SecretString::from(format!("{token}-sign")),
            now - chrono::Duration::minutes(1),
            now + expires_in,
        )
        .unwrap()
    }

    fn authority(
        store: TicketStore,
        client: Arc<ScriptedAuthority>,
    ) -> TicketAuthority {
        TicketAuthority::new(Arc::new(store), client, DEFAULT_SAFETY_MARGIN)
    }

    #[tokio::test]
    async fn test_valid_cached_ticket_needs_no_call() {
        let cached = ticket("cached", chrono::Duration::hours(12));
        let client = ScriptedAuthority::new(vec![]);
        let authority = authority(TicketStore::with_ticket(cached.clone()), client.clone());

        let returned = authority.get_valid_ticket().await.unwrap();

        assert!(returned.same_as(&cached));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_ticket_inside_margin_is_refreshed() {
        let client = ScriptedAuthority::new(vec![Ok(ticket("fresh", chrono::Duration::hours(12)))]);
        let authority = authority(
            TicketStore::with_ticket(ticket("old", chrono::Duration::minutes(2))),
            client.clone(),
        );

        let returned = authority.get_valid_ticket().await.unwrap();

        assert_eq!(returned.token().expose_secret(), "fresh");
        assert_eq!(client.calls(), 1);
        assert_eq!(
            authority.store().current().unwrap().token().expose_secret(),
            "fresh"
        );
        assert!(!authority.is_refreshing());
    }

    #[tokio::test]
    async fn test_empty_store_is_refreshed() {
        let client = ScriptedAuthority::new(vec![Ok(ticket("first", chrono::Duration::hours(12)))]);
        let authority = authority(TicketStore::in_memory(), client.clone());

        assert_eq!(
            authority.get_valid_ticket().await.unwrap().token().expose_secret(),
            "first"
        );
        // Second call is served from the cache.
        authority.get_valid_ticket().await.unwrap();
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let client =
            ScriptedAuthority::new(vec![Ok(ticket("shared", chrono::Duration::hours(12)))]);
        let authority = authority(
            TicketStore::with_ticket(ticket("expired", chrono::Duration::seconds(-10))),
            client.clone(),
        );

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let authority = authority.clone();
                tokio::spawn(async move { authority.get_valid_ticket().await })
            })
            .collect();

        for handle in handles {
            let ticket = handle.await.unwrap().unwrap();
            assert_eq!(ticket.token().expose_secret(), "shared");
        }
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_failure() {
        let client = ScriptedAuthority::new(vec![
            Err(AuthorityError::Rejected("certificate expired".into())),
            Ok(ticket("later", chrono::Duration::hours(12))),
        ]);
        let authority = authority(TicketStore::in_memory(), client.clone());

        let results = futures::future::join_all(
            (0..8).map(|_| {
                let authority = authority.clone();
                async move { authority.get_valid_ticket().await }
            }),
        )
        .await;

        for result in results {
            assert!(matches!(
                result,
                Err(TicketError::AuthenticationFailed(msg)) if msg.contains("certificate expired")
            ));
        }
        assert_eq!(client.calls(), 1);

        // The next caller starts a new refresh.
        assert_eq!(
            authority.get_valid_ticket().await.unwrap().token().expose_secret(),
            "later"
        );
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_conflict_falls_back_to_unexpired_cached_ticket() {
        let cached = ticket("cached", chrono::Duration::minutes(2));
        let client = ScriptedAuthority::new(vec![Err(AuthorityError::TicketAlreadyValid)]);
        let authority = authority(TicketStore::with_ticket(cached.clone()), client.clone());

        let returned = authority.get_valid_ticket().await.unwrap();

        assert!(returned.same_as(&cached));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_conflict_without_cached_ticket_is_unavailable() {
        let client = ScriptedAuthority::new(vec![Err(AuthorityError::TicketAlreadyValid)]);
        let authority = authority(TicketStore::in_memory(), client);

        assert!(matches!(
            authority.get_valid_ticket().await,
            Err(TicketError::AuthorityUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_conflict_with_expired_ticket_is_unavailable() {
        let client = ScriptedAuthority::new(vec![Err(AuthorityError::TicketAlreadyValid)]);
        let authority = authority(
            TicketStore::with_ticket(ticket("expired", chrono::Duration::seconds(-1))),
            client,
        );

        assert!(matches!(
            authority.get_valid_ticket().await,
            Err(TicketError::AuthorityUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_conflict_reads_ticket_written_by_another_process() {
        use crate::ticket_store::{FileTicketRecord, TicketRecord};

        let dir = tempfile::tempdir().unwrap();
        let record = Arc::new(FileTicketRecord::new(dir.path(), "wsfe"));
        record
            .save(&ticket("other-process", chrono::Duration::hours(11)))
            .await
            .unwrap();

        let client = ScriptedAuthority::new(vec![Err(AuthorityError::TicketAlreadyValid)]);
        let authority = TicketAuthority::new(
            Arc::new(TicketStore::new(record)),
            client,
            DEFAULT_SAFETY_MARGIN,
        );

        let returned = authority.get_valid_ticket().await.unwrap();
        assert_eq!(returned.token().expose_secret(), "other-process");
    }

    #[tokio::test]
    async fn test_other_errors_are_authentication_failures() {
        for error in [
            AuthorityError::Rejected("cms.cert.expired".into()),
            AuthorityError::Transport("connection reset".into()),
            AuthorityError::Signing("openssl not found".into()),
            AuthorityError::InvalidResponse("no credentials".into()),
        ] {
            let expected_text = error.to_string();
            let client = ScriptedAuthority::new(vec![Err(error)]);
            let authority = authority(TicketStore::in_memory(), client);

            assert_eq!(
                authority.get_valid_ticket().await.unwrap_err(),
                TicketError::AuthenticationFailed(expected_text)
            );
        }
    }

    #[tokio::test]
    async fn test_refresh_persists_new_ticket() {
        use crate::ticket_store::{FileTicketRecord, TicketRecord};

        let dir = tempfile::tempdir().unwrap();
        let record = Arc::new(FileTicketRecord::new(dir.path(), "wsfe"));
        let client =
            ScriptedAuthority::new(vec![Ok(ticket("durable", chrono::Duration::hours(12)))]);
        let authority = TicketAuthority::new(
            Arc::new(TicketStore::new(record.clone())),
            client,
            DEFAULT_SAFETY_MARGIN,
        );

        authority.get_valid_ticket().await.unwrap();

        let on_disk = record.load().await.unwrap().unwrap();
        assert_eq!(on_disk.token().expose_secret(), "durable");
    }

    #[test]
    fn test_authority_error_display() {
        assert!(AuthorityError::Rejected("bad cert".into())
            .to_string()
            .contains("bad cert"));
        assert_eq!(
            AuthorityError::TicketAlreadyValid.to_string(),
            "A valid ticket already exists for the requested service"
        );
    }
}
