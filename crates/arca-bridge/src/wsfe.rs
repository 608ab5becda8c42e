//! WSFE (Factura Electrónica v1) client.
//!
//! Only `FECompUltimoAutorizado` is implemented: the number of the last
//! invoice authorized for a point of sale and invoice type.

use crate::soap::{self, SOAP_ENV_NS};
use async_trait::async_trait;
use common::invoice::{DownstreamError, LastInvoiceService};
use common::secret::ExposeSecret;
use common::ticket::AuthenticationTicket;
use common::types::InvoiceQuery;
use roxmltree::{Document, Node};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

const FEV1_NS: &str = "http://ar.gov.afip.dif.FEV1/";

/// SOAPAction header value of `FECompUltimoAutorizado`.
pub const LAST_AUTHORIZED_ACTION: &str = "http://ar.gov.afip.dif.FEV1/FECompUltimoAutorizado";

/// `Err` / `Evt` entry of a WSFE result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceMessage {
    pub code: Option<i64>,
    pub msg: String,
}

/// `FECompUltimoAutorizadoResult`.
///
/// Business errors (e.g. code 600, invalid ticket) are reported in `errors`
/// and are part of a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LastAuthorized {
    pub pto_vta: Option<i64>,
    pub cbte_tipo: Option<i64>,
    pub cbte_nro: Option<i64>,
    pub errors: Option<Vec<ServiceMessage>>,
    pub events: Option<Vec<ServiceMessage>>,
}

/// `FECompUltimoAutorizado` client.
#[derive(Debug, Clone)]
pub struct WsfeClient {
    http: reqwest::Client,
    url: String,
}

impl WsfeClient {
    /// Create a client for the WSFE endpoint at `url`.
    ///
    /// # Errors
    ///
    /// Returns `DownstreamError::Transport` if the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, DownstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| DownstreamError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl LastInvoiceService for WsfeClient {
    #[instrument(
        skip_all,
        fields(pto_vta = %query.point_of_sale(), cbte_tipo = %query.invoice_type())
    )]
    async fn last_authorized(
        &self,
        ticket: &AuthenticationTicket,
        query: &InvoiceQuery,
    ) -> Result<Value, DownstreamError> {
        let envelope = last_authorized_envelope(ticket, query)?;

        let response = soap::post(&self.http, &self.url, LAST_AUTHORIZED_ACTION, envelope)
            .await
            .map_err(|e| {
                debug!(
                    target: "arca_bridge.wsfe",
                    error = %e,
                    "FECompUltimoAutorizado request failed"
                );
                DownstreamError::Transport(e.to_string())
            })?;

        let result = parse_last_authorized(response.status, &response.body)?;
        if let Some(errors) = &result.errors {
            warn!(
                target: "arca_bridge.wsfe",
                count = errors.len(),
                first_code = ?errors.first().and_then(|e| e.code),
                "WSFE reported errors"
            );
        }

        serde_json::to_value(&result).map_err(|e| DownstreamError::InvalidResponse(e.to_string()))
    }
}

/// Parse a numeric request field, stripping leading zeros ("0001" -> 1).
fn numeric(name: &str, raw: &str) -> Result<u64, DownstreamError> {
    raw.trim().parse().map_err(|_| {
        DownstreamError::InvalidRequest(format!("{name} must be numeric, got '{raw}'"))
    })
}

fn last_authorized_envelope(
    ticket: &AuthenticationTicket,
    query: &InvoiceQuery,
) -> Result<String, DownstreamError> {
    let cuit = numeric("cuit", query.tax_id())?;
    let pto_vta = numeric("pto_vta", query.point_of_sale())?;
    let cbte_tipo = numeric("cbte_tipo", query.invoice_type())?;

    Ok(format!(
        "<soapenv:Envelope xmlns:soapenv=\"{SOAP_ENV_NS}\" xmlns:ar=\"{FEV1_NS}\">\
         <soapenv:Header/>\
         <soapenv:Body>\
         <ar:FECompUltimoAutorizado>\
         <ar:Auth>\
         <ar:Token>{}</ar:Token>\
         <ar:Sign>{}</ar:Sign>\
         <ar:Cuit>{cuit}</ar:Cuit>\
         </ar:Auth>\
         <ar:PtoVta>{pto_vta}</ar:PtoVta>\
         <ar:CbteTipo>{cbte_tipo}</ar:CbteTipo>\
         </ar:FECompUltimoAutorizado>\
         </soapenv:Body>\
         </soapenv:Envelope>",
        soap::escape(ticket.token().expose_secret()),
        soap::escape(ticket.sign().expose_secret()),
    ))
}

fn parse_last_authorized(
    status: reqwest::StatusCode,
    body: &str,
) -> Result<LastAuthorized, DownstreamError> {
    let envelope = Document::parse(body).map_err(|e| {
        if status.is_success() {
            DownstreamError::InvalidResponse(format!("malformed SOAP envelope: {e}"))
        } else {
            DownstreamError::Transport(format!("HTTP {status}"))
        }
    })?;

    if let Some(fault) = soap::fault(&envelope) {
        return Err(DownstreamError::Fault(fault.message));
    }
    if !status.is_success() {
        return Err(DownstreamError::Transport(format!("HTTP {status}")));
    }

    let result = soap::find(envelope.root(), "FECompUltimoAutorizadoResult").ok_or_else(|| {
        DownstreamError::InvalidResponse("missing FECompUltimoAutorizadoResult".to_string())
    })?;

    let number = |name: &str| soap::text_of(result, name).and_then(|t| t.parse().ok());

    Ok(LastAuthorized {
        pto_vta: number("PtoVta"),
        cbte_tipo: number("CbteTipo"),
        cbte_nro: number("CbteNro"),
        errors: messages(result, "Errors"),
        events: messages(result, "Events"),
    })
}

fn messages(result: Node<'_, '_>, list: &str) -> Option<Vec<ServiceMessage>> {
    let list = result
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == list)?;

    let entries: Vec<_> = list
        .children()
        .filter(Node::is_element)
        .map(|entry| ServiceMessage {
            code: soap::text_of(entry, "Code").and_then(|t| t.parse().ok()),
            msg: soap::text_of(entry, "Msg").unwrap_or_default().to_string(),
        })
        .collect();

    (!entries.is_empty()).then_some(entries)
}
