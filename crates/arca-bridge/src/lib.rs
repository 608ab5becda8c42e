//! ARCA Bridge Service Library
//!
//! Answers "last authorized invoice" queries arriving on a NATS request queue
//! by calling the ARCA (formerly AFIP) electronic invoicing web services:
//!
//! - WSAA issues the Authentication Ticket (token + sign) required on every
//!   business call; it is cached, persisted and refreshed single-flight by
//!   [`common::ticket_authority::TicketAuthority`].
//! - WSFE answers `FECompUltimoAutorizado`.
//!
//! # Architecture
//!
//! ```text
//! NATS work queue ──► RequestRouter ──► TicketAuthority ──► WsaaClient (on refresh)
//!                          │
//!                          ├──► WsfeClient
//!                          └──► reply inbox (Correlation-Id header)
//! ```
//!
//! # Modules
//!
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Per-request failure taxonomy
//! - [`router`] - Request processing and the consume loop
//! - [`signer`] - CMS signing of ticket requests
//! - [`wsaa`] - WSAA `loginCms` client
//! - [`wsfe`] - WSFE `FECompUltimoAutorizado` client
//! - [`observability`] - Prometheus metrics

pub mod config;
pub mod errors;
pub mod observability;
pub mod router;
pub mod signer;
mod soap;
pub mod wsaa;
pub mod wsfe;
