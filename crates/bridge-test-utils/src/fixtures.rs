//! Pre-configured tickets and queries.

use chrono::{Duration, Utc};
use common::secret::SecretString;
use common::ticket::AuthenticationTicket;
use common::types::InvoiceQuery;

/// Taxpayer id used across tests.
pub const TEST_CUIT: &str = "23146234399";

/// Ticket that expires `expires_in` from now, generated a minute ago.
#[must_use]
pub fn ticket_expiring_in(token: &str, expires_in: Duration) -> AuthenticationTicket {
    let now = Utc::now();
    AuthenticationTicket::new(
        SecretString::from(token),
        SecretString::from(format!("{token}-sign")),
        now - Duration::minutes(1),
        now + expires_in,
    )
    .expect("fixture ticket window is valid")
}

/// Ticket valid for the usual twelve hours.
#[must_use]
pub fn valid_ticket(token: &str) -> AuthenticationTicket {
    ticket_expiring_in(token, Duration::hours(12))
}

/// Ticket that expired a minute ago.
#[must_use]
pub fn expired_ticket(token: &str) -> AuthenticationTicket {
    let now = Utc::now();
    AuthenticationTicket::new(
        SecretString::from(token),
        SecretString::from(format!("{token}-sign")),
        now - Duration::hours(12),
        now - Duration::minutes(1),
    )
    .expect("fixture ticket window is valid")
}

/// The default CLI query: CUIT 23146234399, point of sale 0001, type 001.
#[must_use]
pub fn sample_query() -> InvoiceQuery {
    InvoiceQuery::new(TEST_CUIT, "0001", "001").expect("fixture query is complete")
}

/// JSON body of [`sample_query`].
#[must_use]
pub fn sample_request_body() -> Vec<u8> {
    sample_query().to_body().expect("fixture query serializes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn test_fixture_validity() {
        let now = Utc::now();
        assert!(valid_ticket("t").is_valid_at(now, StdDuration::from_secs(300)));
        assert!(!expired_ticket("t").is_valid_at(now, StdDuration::ZERO));
        assert!(!ticket_expiring_in("t", Duration::minutes(2))
            .is_valid_at(now, StdDuration::from_secs(300)));
    }

    #[test]
    fn test_sample_query_fields() {
        let query = sample_query();
        assert_eq!(query.tax_id(), TEST_CUIT);
        assert_eq!(query.point_of_sale(), "0001");
        assert_eq!(query.invoice_type(), "001");
    }
}
