//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use these types for
//! every credential the bridge handles: the ticket `token` and `sign` issued by
//! WSAA, broker URLs that embed credentials, and similar values.
//!
//! `SecretString` implements `Debug` with redaction, so any struct containing
//! one can derive `Debug` and remain safe to pass to `tracing`.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Credentials {
//!     token: SecretString,
//!     sign: SecretString,
//! }
//!
//! let creds = Credentials {
//!     token: SecretString::from("PD94bWwg"),
//!     sign: SecretString::from("c2lnbmF0dXJl"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("PD94bWwg"));
//! assert_eq!(creds.token.expose_secret(), "PD94bWwg");
//! ```

pub use secrecy::{ExposeSecret, SecretString};
