//! Common data types for the ARCA bridge components.
//!
//! The request body carried on the broker is
//! `{"cuit": "...", "pto_vta": "...", "cbte_tipo": "..."}` and the reply body is
//! either `{"response": <value>}` or `{"error": "<message>"}`. Correlation ids
//! and reply addresses travel as message headers, not body fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Message used when any of the three business fields is absent or empty.
pub const MISSING_PARAMETERS_MESSAGE: &str =
    "Missing required parameters in message: cuit, pto_vta, cbte_tipo";

/// Unique identifier attached to a request and echoed on its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Create a new random correlation ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Reasons an inbound request body is rejected before any remote call.
///
/// The `Display` text is sent back verbatim as the reply's `error` field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryParseError {
    #[error("Empty message body received")]
    EmptyBody,

    #[error("Invalid JSON in message body: {0}")]
    InvalidJson(String),

    #[error("Missing required parameters in message: cuit, pto_vta, cbte_tipo")]
    MissingParameters,

    #[error("Parameter {field} must be numeric, got '{value}'")]
    NonNumeric { field: &'static str, value: String },
}

/// Business fields of a last-authorized-invoice query.
///
/// All three fields are guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceQuery {
    /// Taxpayer id (CUIT).
    #[serde(rename = "cuit")]
    tax_id: String,
    /// Point of sale.
    #[serde(rename = "pto_vta")]
    point_of_sale: String,
    /// Invoice type code.
    #[serde(rename = "cbte_tipo")]
    invoice_type: String,
}

impl InvoiceQuery {
    /// Build a query, rejecting empty fields.
    ///
    /// # Errors
    ///
    /// Returns `QueryParseError::MissingParameters` if any field is empty.
    pub fn new(
        tax_id: impl Into<String>,
        point_of_sale: impl Into<String>,
        invoice_type: impl Into<String>,
    ) -> Result<Self, QueryParseError> {
        let tax_id = tax_id.into();
        let point_of_sale = point_of_sale.into();
        let invoice_type = invoice_type.into();

        if [&tax_id, &point_of_sale, &invoice_type]
            .iter()
            .any(|field| field.trim().is_empty())
        {
            return Err(QueryParseError::MissingParameters);
        }

        Ok(Self {
            tax_id,
            point_of_sale,
            invoice_type,
        })
    }

    /// Parse a request body received from the broker.
    ///
    /// Fields may be JSON strings or numbers; anything else counts as missing.
    /// Present fields must hold a non-negative integer.
    ///
    /// # Errors
    ///
    /// Returns the `QueryParseError` whose message is replied to the caller.
    pub fn from_body(body: &[u8]) -> Result<Self, QueryParseError> {
        if body.is_empty() {
            return Err(QueryParseError::EmptyBody);
        }

        let value: Value = serde_json::from_slice(body).map_err(|_| {
            QueryParseError::InvalidJson(String::from_utf8_lossy(body).into_owned())
        })?;

        let field = |name: &str| -> Option<String> {
            match value.get(name)? {
                Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };

        let (Some(tax_id), Some(point_of_sale), Some(invoice_type)) =
            (field("cuit"), field("pto_vta"), field("cbte_tipo"))
        else {
            return Err(QueryParseError::MissingParameters);
        };

        for (name, value) in [
            ("cuit", &tax_id),
            ("pto_vta", &point_of_sale),
            ("cbte_tipo", &invoice_type),
        ] {
            if value.trim().parse::<u64>().is_err() {
                return Err(QueryParseError::NonNumeric {
                    field: name,
                    value: value.clone(),
                });
            }
        }

        Ok(Self {
            tax_id,
            point_of_sale,
            invoice_type,
        })
    }

    /// Serialize the query as the broker request body.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    #[must_use]
    pub fn tax_id(&self) -> &str {
        &self.tax_id
    }

    #[must_use]
    pub fn point_of_sale(&self) -> &str {
        &self.point_of_sale
    }

    #[must_use]
    pub fn invoice_type(&self) -> &str {
        &self.invoice_type
    }
}

/// Reply body: exactly one of a success payload or an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryOutcome {
    /// Opaque result of the downstream query.
    #[serde(rename = "response")]
    Response(Value),
    /// Human-readable failure description.
    #[serde(rename = "error")]
    Error(String),
}

impl QueryOutcome {
    /// Serialize the outcome as the broker reply body.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// A reply matched to the request that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceQueryResult {
    pub correlation_id: CorrelationId,
    pub outcome: QueryOutcome,
}
