//! Common utilities and types shared across the ARCA bridge components.

#![warn(clippy::pedantic)]

/// Module for broker transport errors
pub mod error;

/// Module for common data types (correlation ids, queries, replies)
pub mod types;

/// Module for broker configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for the broker abstractions used by the router and the caller
pub mod broker;

/// Module for the NATS implementation of the broker abstractions
pub mod nats;

/// Module for the authentication ticket model and validity predicate
pub mod ticket;

/// Module for the ticket cache and its durable mirror
pub mod ticket_store;

/// Module for single-flight ticket acquisition and refresh
pub mod ticket_authority;

/// Module for the downstream last-invoice query boundary
pub mod invoice;
