//! Authentication Ticket (TA) model.
//!
//! A ticket is the `token` + `sign` pair issued by WSAA for one business
//! service (e.g. `wsfe`). Both values are secrets and are redacted in `Debug`
//! output. Tickets are immutable: a refresh produces a new instance.

use crate::secret::{ExposeSecret, SecretString};
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by ticket acquisition.
///
/// `Clone` so a single refresh outcome can be handed to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TicketError {
    /// The authority rejected the signed request (certificate, clock, etc.).
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The authority reports a valid ticket exists but none is available locally.
    #[error("Authority unavailable: {0}")]
    AuthorityUnavailable(String),

    /// Ticket fields violate the model invariants.
    #[error("Invalid ticket: {0}")]
    InvalidTicket(String),

    /// Reading or writing the durable record failed.
    #[error("Ticket persistence error: {0}")]
    Persistence(String),
}

/// Short-lived credential required on every business call.
#[derive(Clone)]
pub struct AuthenticationTicket {
    token: SecretString,
    sign: SecretString,
    generated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AuthenticationTicket {
    /// Create a ticket.
    ///
    /// # Errors
    ///
    /// Returns `TicketError::InvalidTicket` if `generated_at >= expires_at` or
    /// if the token or sign is empty.
    pub fn new(
        token: SecretString,
        sign: SecretString,
        generated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, TicketError> {
        if generated_at >= expires_at {
            return Err(TicketError::InvalidTicket(format!(
                "generation time {generated_at} is not before expiration time {expires_at}"
            )));
        }
        if token.expose_secret().is_empty() || sign.expose_secret().is_empty() {
            return Err(TicketError::InvalidTicket("empty token or sign".into()));
        }

        Ok(Self {
            token,
            sign,
            generated_at,
            expires_at,
        })
    }

    #[must_use]
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    #[must_use]
    pub fn sign(&self) -> &SecretString {
        &self.sign
    }

    #[must_use]
    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// `now + margin < expires_at`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match chrono::Duration::from_std(margin) {
            Ok(margin) => now
                .checked_add_signed(margin)
                .is_some_and(|deadline| deadline < self.expires_at),
            // A margin too large to represent can never be satisfied.
            Err(_) => false,
        }
    }

    /// Same ticket contents (token, sign and validity window).
    #[must_use]
    pub fn same_as(&self, other: &AuthenticationTicket) -> bool {
        self.token.expose_secret() == other.token.expose_secret()
            && self.sign.expose_secret() == other.sign.expose_secret()
            && self.generated_at == other.generated_at
            && self.expires_at == other.expires_at
    }
}

impl std::fmt::Debug for AuthenticationTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationTicket")
            .field("token", &"[REDACTED]")
            .field("sign", &"[REDACTED]")
            .field("generated_at", &self.generated_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ticket(expires_in: chrono::Duration) -> AuthenticationTicket {
        let now = Utc::now();
        AuthenticationTicket::new(
            SecretString::from("token"),
            SecretString::from("sign"),
            now - chrono::Duration::minutes(1),
            now + expires_in,
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_inverted_window() {
        let now = Utc::now();
        let result = AuthenticationTicket::new(
            SecretString::from("token"),
            SecretString::from("sign"),
            now,
            now,
        );
        assert!(matches!(result, Err(TicketError::InvalidTicket(_))));
    }

    #[test]
    fn test_rejects_empty_credentials() {
        let now = Utc::now();
        let result = AuthenticationTicket::new(
            SecretString::from(""),
            SecretString::from("sign"),
            now,
            now + chrono::Duration::hours(12),
        );
        assert!(matches!(result, Err(TicketError::InvalidTicket(_))));
    }

    #[test]
    fn test_validity_honours_margin() {
        let t = ticket(chrono::Duration::minutes(10));
        let now = Utc::now();

        assert!(t.is_valid_at(now, Duration::from_secs(0)));
        assert!(t.is_valid_at(now, Duration::from_secs(300)));
        assert!(!t.is_valid_at(now, Duration::from_secs(900)));
    }

    #[test]
    fn test_expired_ticket_is_never_valid() {
        let t = ticket(chrono::Duration::seconds(-1));
        assert!(!t.is_valid_at(Utc::now(), Duration::ZERO));
    }

    #[test]
    fn test_huge_margin_is_invalid() {
        let t = ticket(chrono::Duration::hours(12));
        assert!(!t.is_valid_at(Utc::now(), Duration::MAX));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let now = Utc::now();
        let t = AuthenticationTicket::new(
            SecretString::from("PD94bWwgdmVyc2lvbj0"),
            SecretString::from("c2lnbmF0dXJl"),
            now,
            now + chrono::Duration::hours(12),
        )
        .unwrap();

        let debug_str = format!("{t:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("PD94bWwgdmVyc2lvbj0"));
        assert!(!debug_str.contains("c2lnbmF0dXJl"));
    }
}
