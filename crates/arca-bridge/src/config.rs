//! ARCA bridge configuration.
//!
//! Configuration is loaded from environment variables. The broker URL may embed
//! credentials and is redacted in Debug output.

use common::config::{BrokerConfig, ConfigError};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default JetStream stream holding pending requests.
pub const DEFAULT_STREAM_NAME: &str = "ARCA";

/// Default durable consumer name shared by all bridge instances.
pub const DEFAULT_CONSUMER_NAME: &str = "arca-bridge";

/// Default redelivery delay for unacknowledged requests.
pub const DEFAULT_ACK_WAIT_SECONDS: u64 = 60;

/// Default business service the ticket is requested for.
pub const DEFAULT_SERVICE_ID: &str = "wsfe";

/// WSAA homologation endpoint.
pub const DEFAULT_WSAA_URL: &str = "https://wsaahomo.afip.gov.ar/ws/services/LoginCms";

/// WSFE homologation endpoint.
pub const DEFAULT_WSFE_URL: &str = "https://wswhomo.afip.gov.ar/wsfev1/service.asmx";

/// Default directory for durable ticket records.
pub const DEFAULT_TICKET_DIR: &str = "./ssl_files";

/// Default ticket safety margin in seconds.
pub const DEFAULT_TICKET_SAFETY_MARGIN_SECONDS: u64 = 300;

/// Default timeout for WSAA and WSFE calls in seconds.
pub const DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Default OpenSSL executable.
pub const DEFAULT_OPENSSL_BIN: &str = "openssl";

/// ARCA bridge configuration.
#[derive(Clone)]
pub struct Config {
    /// Broker connection and request subject.
    pub broker: BrokerConfig,

    /// JetStream work-queue stream name (default: "ARCA").
    pub stream_name: String,

    /// Durable consumer name (default: "arca-bridge").
    pub consumer_name: String,

    /// How long the broker waits for an ack before redelivering.
    pub ack_wait: Duration,

    /// Business service identifier used in ticket requests (default: "wsfe").
    pub service_id: String,

    /// X.509 certificate registered with ARCA (PEM).
    pub cert_path: PathBuf,

    /// Private key matching `cert_path` (PEM).
    pub key_path: PathBuf,

    pub wsaa_url: String,

    pub wsfe_url: String,

    /// Directory holding `<service>.ticket.json`.
    pub ticket_dir: PathBuf,

    /// Refresh a ticket this long before it expires.
    pub ticket_safety_margin: Duration,

    /// Timeout applied to each WSAA and WSFE HTTP call.
    pub upstream_http_timeout: Duration,

    /// OpenSSL executable used for CMS signing.
    pub openssl_bin: PathBuf,

    /// Prometheus exporter listen address; metrics are not exported if unset.
    pub metrics_bind_address: Option<String>,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("broker", &self.broker)
            .field("stream_name", &self.stream_name)
            .field("consumer_name", &self.consumer_name)
            .field("ack_wait", &self.ack_wait)
            .field("service_id", &self.service_id)
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("wsaa_url", &self.wsaa_url)
            .field("wsfe_url", &self.wsfe_url)
            .field("ticket_dir", &self.ticket_dir)
            .field("ticket_safety_margin", &self.ticket_safety_margin)
            .field("upstream_http_timeout", &self.upstream_http_timeout)
            .field("openssl_bin", &self.openssl_bin)
            .field("metrics_bind_address", &self.metrics_bind_address)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`Config::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `NATS_URL`, `ARCA_CERT_PATH` or
    /// `ARCA_KEY_PATH` is absent, and `ConfigError::InvalidValue` if a numeric
    /// setting does not parse.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let broker = BrokerConfig::from_vars(vars)?;

        let required = |name: &str| -> Result<String, ConfigError> {
            vars.get(name)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
        };
        let or_default = |name: &str, default: &str| -> String {
            vars.get(name)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        let cert_path = PathBuf::from(required("ARCA_CERT_PATH")?);
        let key_path = PathBuf::from(required("ARCA_KEY_PATH")?);

        let ack_wait = Duration::from_secs(parse_seconds(
            vars,
            "ARCA_ACK_WAIT_SECONDS",
            DEFAULT_ACK_WAIT_SECONDS,
        )?);
        let ticket_safety_margin = Duration::from_secs(parse_seconds(
            vars,
            "TICKET_SAFETY_MARGIN_SECONDS",
            DEFAULT_TICKET_SAFETY_MARGIN_SECONDS,
        )?);
        let upstream_http_timeout = Duration::from_secs(parse_seconds(
            vars,
            "UPSTREAM_HTTP_TIMEOUT_SECONDS",
            DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECONDS,
        )?);

        if ack_wait.is_zero() {
            return Err(ConfigError::InvalidValue(
                "ARCA_ACK_WAIT_SECONDS must be greater than zero".to_string(),
            ));
        }
        if upstream_http_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "UPSTREAM_HTTP_TIMEOUT_SECONDS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            broker,
            stream_name: or_default("ARCA_STREAM_NAME", DEFAULT_STREAM_NAME),
            consumer_name: or_default("ARCA_CONSUMER_NAME", DEFAULT_CONSUMER_NAME),
            ack_wait,
            service_id: or_default("ARCA_SERVICE_ID", DEFAULT_SERVICE_ID),
            cert_path,
            key_path,
            wsaa_url: or_default("WSAA_URL", DEFAULT_WSAA_URL),
            wsfe_url: or_default("WSFE_URL", DEFAULT_WSFE_URL),
            ticket_dir: PathBuf::from(or_default("ARCA_TICKET_DIR", DEFAULT_TICKET_DIR)),
            ticket_safety_margin,
            upstream_http_timeout,
            openssl_bin: PathBuf::from(or_default("OPENSSL_BIN", DEFAULT_OPENSSL_BIN)),
            metrics_bind_address: vars.get("METRICS_BIND_ADDRESS").cloned(),
        })
    }
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e| {
            ConfigError::InvalidValue(format!("{name}: expected seconds, got '{raw}': {e}"))
        }),
    }
}
