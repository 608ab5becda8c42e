//! SOAP 1.1 plumbing shared by the WSAA and WSFE clients.

use roxmltree::{Document, Node};

pub(crate) const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// A `soap:Fault` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SoapFault {
    pub code: String,
    pub message: String,
}

/// Escape text for inclusion in element content.
pub(crate) fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// First element below `node` with the given local name, any namespace.
pub(crate) fn find<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

/// Trimmed text of the first element named `name` below `node`.
pub(crate) fn text_of<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    find(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extract a SOAP fault from a parsed envelope, if the body carries one.
pub(crate) fn fault(doc: &Document<'_>) -> Option<SoapFault> {
    let fault = find(doc.root(), "Fault")?;
    Some(SoapFault {
        code: text_of(fault, "faultcode").unwrap_or_default().to_string(),
        message: text_of(fault, "faultstring")
            .unwrap_or("SOAP fault without faultstring")
            .to_string(),
    })
}

/// Response of a SOAP POST: status and body text.
pub(crate) struct SoapResponse {
    pub status: reqwest::StatusCode,
    pub body: String,
}

/// POST a SOAP 1.1 envelope.
pub(crate) async fn post(
    client: &reqwest::Client,
    url: &str,
    soap_action: &str,
    envelope: String,
) -> Result<SoapResponse, reqwest::Error> {
    let response = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
        .header("SOAPAction", format!("\"{soap_action}\""))
        .body(envelope)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    Ok(SoapResponse { status, body })
}
