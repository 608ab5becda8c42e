//! Broker configuration shared by the bridge service and its callers.

use crate::secret::SecretString;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default subject the bridge consumes requests from.
pub const DEFAULT_REQUEST_SUBJECT: &str = "arca";

/// Default broker connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Broker connection configuration.
#[derive(Clone)]
pub struct BrokerConfig {
    /// NATS server URL. May embed credentials, so it is kept secret.
    pub url: SecretString,
    /// Subject requests are published to and consumed from.
    pub request_subject: String,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("url", &"[REDACTED]")
            .field("request_subject", &self.request_subject)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl BrokerConfig {
    /// Create a configuration with default subject and timeout.
    #[must_use]
    pub fn new(url: SecretString) -> Self {
        Self {
            url,
            request_subject: DEFAULT_REQUEST_SUBJECT.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the request subject.
    #[must_use]
    pub fn with_request_subject(mut self, subject: impl Into<String>) -> Self {
        self.request_subject = subject.into();
        self
    }

    /// Load broker settings from a variable map (`NATS_URL`, `ARCA_REQUEST_SUBJECT`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `NATS_URL` is absent.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let url = SecretString::from(
            vars.get("NATS_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("NATS_URL".to_string()))?
                .clone(),
        );

        let request_subject = vars
            .get("ARCA_REQUEST_SUBJECT")
            .cloned()
            .unwrap_or_else(|| DEFAULT_REQUEST_SUBJECT.to_string());

        Ok(Self::new(url).with_request_subject(request_subject))
    }
}
