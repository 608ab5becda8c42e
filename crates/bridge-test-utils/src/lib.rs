//! # Bridge Test Utilities
//!
//! Shared test utilities for the ARCA bridge and its callers.
//!
//! This crate provides mock implementations and fixtures for testing the
//! router, the ticket authority and the correlation client without a broker
//! or the ARCA web services.
//!
//! ## Modules
//!
//! - `mock_authority` - Scripted WSAA stand-in that counts ticket requests
//! - `mock_invoice` - Scripted WSFE stand-in that counts queries
//! - `in_memory_broker` - Request queue, reply inboxes and ack bookkeeping
//! - `fixtures` - Tickets and queries
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridge_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let authority = MockAuthority::builder()
//!         .respond_with(valid_ticket("token-1"))
//!         .build();
//!     let invoices = MockInvoiceService::returning(serde_json::json!({"CbteNro": 42}));
//!     let broker = InMemoryBroker::new();
//!
//!     broker.push_request(sample_request_body(), Some("id-1"), Some("inbox.1"));
//!     // Run the router against broker.deliveries()...
//! }
//! ```

pub mod fixtures;
pub mod in_memory_broker;
pub mod mock_authority;
pub mod mock_invoice;

// Re-export commonly used items
pub use fixtures::*;
pub use in_memory_broker::*;
pub use mock_authority::*;
pub use mock_invoice::*;
