//! Caller side of the ARCA bridge request/reply protocol.
//!
//! [`correlation::CorrelationClient`] publishes an invoice query with a fresh
//! correlation id and a private reply inbox, then waits, bounded by a timeout,
//! for the matching reply.

pub mod correlation;
pub mod errors;

pub use correlation::CorrelationClient;
pub use errors::ClientError;
