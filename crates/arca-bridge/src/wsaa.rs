//! WSAA (Web Service de Autenticación y Autorización) client.
//!
//! Exchanges a signed `loginTicketRequest` for an Authentication Ticket via
//! the `loginCms` SOAP operation.
//!
//! WSAA refuses to issue a second ticket for the same certificate and service
//! while one is still valid. That fault is surfaced as
//! [`AuthorityError::TicketAlreadyValid`] so the ticket authority can fall
//! back to the ticket it already has.

use crate::observability::record_ticket_refresh;
use crate::signer::CmsSigner;
use crate::soap::{self, SOAP_ENV_NS};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use common::secret::SecretString;
use common::ticket::AuthenticationTicket;
use common::ticket_authority::{AuthorityClient, AuthorityError};
use roxmltree::Document;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const WSAA_NS: &str = "http://wsaa.view.sua.dvadac.desein.afip.gov";

/// Fault text WSAA returns when a valid ticket already exists.
pub const ALREADY_AUTHENTICATED_MESSAGE: &str =
    "El CEE ya posee un TA valido para el acceso al WSN solicitado";

/// Validity window requested around the generation instant.
const REQUEST_WINDOW_MINUTES: i64 = 10;

/// Unsigned `loginTicketRequest` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRequest {
    pub unique_id: String,
    pub generation_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    pub service: String,
}

impl TicketRequest {
    /// Request for `service` valid from ten minutes before `now` to ten after.
    #[must_use]
    pub fn new(service: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            unique_id: now.format("%y%m%d%H%M").to_string(),
            generation_time: now - Duration::minutes(REQUEST_WINDOW_MINUTES),
            expiration_time: now + Duration::minutes(REQUEST_WINDOW_MINUTES),
            service: service.into(),
        }
    }

    #[must_use]
    pub fn to_xml(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <loginTicketRequest version=\"1.0\">\
             <header>\
             <uniqueId>{}</uniqueId>\
             <generationTime>{}</generationTime>\
             <expirationTime>{}</expirationTime>\
             </header>\
             <service>{}</service>\
             </loginTicketRequest>",
            self.unique_id,
            self.generation_time.to_rfc3339_opts(SecondsFormat::Secs, false),
            self.expiration_time.to_rfc3339_opts(SecondsFormat::Secs, false),
            soap::escape(&self.service),
        )
    }
}

/// `loginCms` client.
pub struct WsaaClient {
    http: reqwest::Client,
    url: String,
    service: String,
    signer: Arc<dyn CmsSigner>,
}

impl std::fmt::Debug for WsaaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsaaClient")
            .field("url", &self.url)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl WsaaClient {
    /// Create a client for `service` talking to the WSAA endpoint at `url`.
    ///
    /// # Errors
    ///
    /// Returns `AuthorityError::Transport` if the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        service: impl Into<String>,
        signer: Arc<dyn CmsSigner>,
        timeout: std::time::Duration,
    ) -> Result<Self, AuthorityError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| AuthorityError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: url.into(),
            service: service.into(),
            signer,
        })
    }

    async fn login(&self) -> Result<AuthenticationTicket, AuthorityError> {
        let request = TicketRequest::new(&self.service, Utc::now());
        let cms = self
            .signer
            .sign(request.to_xml().as_bytes())
            .await
            .map_err(|e| AuthorityError::Signing(e.to_string()))?;

        let response = soap::post(&self.http, &self.url, "", login_cms_envelope(&cms))
            .await
            .map_err(|e| {
                debug!(target: "arca_bridge.wsaa", error = %e, "loginCms request failed");
                AuthorityError::Transport(e.to_string())
            })?;

        parse_login_response(response.status, &response.body)
    }
}

#[async_trait]
impl AuthorityClient for WsaaClient {
    #[instrument(skip_all, fields(service = %self.service))]
    async fn request_ticket(&self) -> Result<AuthenticationTicket, AuthorityError> {
        let result = self.login().await;
        record_ticket_refresh(match &result {
            Ok(_) => "success",
            Err(AuthorityError::TicketAlreadyValid) => "already_valid",
            Err(AuthorityError::Rejected(_)) => "rejected",
            Err(_) => "error",
        });
        result
    }
}

fn login_cms_envelope(cms: &str) -> String {
    format!(
        "<soapenv:Envelope xmlns:soapenv=\"{SOAP_ENV_NS}\" xmlns:wsaa=\"{WSAA_NS}\">\
         <soapenv:Header/>\
         <soapenv:Body>\
         <wsaa:loginCms><wsaa:in0>{}</wsaa:in0></wsaa:loginCms>\
         </soapenv:Body>\
         </soapenv:Envelope>",
        soap::escape(cms)
    )
}

fn is_already_authenticated(fault: &soap::SoapFault) -> bool {
    fault.code.ends_with("alreadyAuthenticated") || fault.message == ALREADY_AUTHENTICATED_MESSAGE
}

/// Parse a `loginCms` HTTP response into a ticket.
fn parse_login_response(
    status: reqwest::StatusCode,
    body: &str,
) -> Result<AuthenticationTicket, AuthorityError> {
    let envelope = Document::parse(body).map_err(|e| {
        if status.is_success() {
            AuthorityError::InvalidResponse(format!("malformed SOAP envelope: {e}"))
        } else {
            AuthorityError::Transport(format!("HTTP {status}"))
        }
    })?;

    if let Some(fault) = soap::fault(&envelope) {
        if is_already_authenticated(&fault) {
            return Err(AuthorityError::TicketAlreadyValid);
        }
        warn!(
            target: "arca_bridge.wsaa",
            faultcode = %fault.code,
            faultstring = %fault.message,
            "WSAA rejected ticket request"
        );
        return Err(AuthorityError::Rejected(fault.message));
    }

    if !status.is_success() {
        return Err(AuthorityError::Transport(format!("HTTP {status}")));
    }

    let ticket_xml = soap::text_of(envelope.root(), "loginCmsReturn").ok_or_else(|| {
        AuthorityError::InvalidResponse("missing loginCmsReturn".to_string())
    })?;
    parse_ticket_response(ticket_xml)
}

/// Parse the embedded `loginTicketResponse` document.
fn parse_ticket_response(xml: &str) -> Result<AuthenticationTicket, AuthorityError> {
    let doc = Document::parse(xml).map_err(|e| {
        AuthorityError::InvalidResponse(format!("malformed loginTicketResponse: {e}"))
    })?;
    let root = doc.root();

    let field = |name: &str| {
        soap::text_of(root, name)
            .ok_or_else(|| AuthorityError::InvalidResponse(format!("missing {name}")))
    };
    let timestamp = |name: &str| -> Result<DateTime<Utc>, AuthorityError> {
        let raw = field(name)?;
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| AuthorityError::InvalidResponse(format!("invalid {name} '{raw}': {e}")))
    };

    AuthenticationTicket::new(
        SecretString::from(field("token")?),
        SecretString::from(field("sign")?),
        timestamp("generationTime")?,
        timestamp("expirationTime")?,
    )
    .map_err(|e| AuthorityError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::signer::SignerError;
    use common::secret::ExposeSecret;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedSigner(Result<&'static str, &'static str>);

    #[async_trait]
    impl CmsSigner for FixedSigner {
        async fn sign(&self, _content: &[u8]) -> Result<String, SignerError> {
            match self.0 {
                Ok(cms) => Ok(cms.to_string()),
                Err(stderr) => Err(SignerError::Failed {
                    status: "exit status: 1".to_string(),
                    stderr: stderr.to_string(),
                }),
            }
        }
    }

    fn client(server: &MockServer, signer: FixedSigner) -> WsaaClient {
        WsaaClient::new(
            format!("{}/ws/services/LoginCms", server.uri()),
            "wsfe",
            Arc::new(signer),
            std::time::Duration::from_secs(5),
        )
        .unwrap()
    }

    fn escape_xml(text: &str) -> String {
        soap::escape(text)
    }

    fn login_success_body() -> String {
        let inner = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
            <loginTicketResponse version=\"1.0\">\
            <header>\
            <source>CN=wsaahomo, O=AFIP, C=AR, SERIALNUMBER=CUIT 33693450239</source>\
            <destination>SERIALNUMBER=CUIT 23146234399, CN=test</destination>\
            <uniqueId>3913094052</uniqueId>\
            <generationTime>2026-10-18T09:50:00.000-03:00</generationTime>\
            <expirationTime>2026-10-18T21:50:00.000-03:00</expirationTime>\
            </header>\
            <credentials>\
            <token>PD94bWwgdmVyc2lvbj0iMS4wIg==</token>\
            <sign>c2lnbmF0dXJl</sign>\
            </credentials>\
            </loginTicketResponse>";

        format!(
            "<soapenv:Envelope xmlns:soapenv=\"{SOAP_ENV_NS}\">\
             <soapenv:Body>\
             <loginCmsResponse xmlns=\"{WSAA_NS}\">\
             <loginCmsReturn>{}</loginCmsReturn>\
             </loginCmsResponse>\
             </soapenv:Body>\
             </soapenv:Envelope>",
            escape_xml(inner)
        )
    }

    fn fault_body(code: &str, message: &str) -> String {
        format!(
            "<soapenv:Envelope xmlns:soapenv=\"{SOAP_ENV_NS}\">\
             <soapenv:Body>\
             <soapenv:Fault>\
             <faultcode xmlns:ns1=\"http://xml.apache.org/axis/\">{code}</faultcode>\
             <faultstring>{message}</faultstring>\
             </soapenv:Fault>\
             </soapenv:Body>\
             </soapenv:Envelope>"
        )
    }

    #[test]
    fn test_ticket_request_window_and_xml() {
        let now = DateTime::parse_from_rfc3339("2026-10-18T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let request = TicketRequest::new("wsfe", now);

        assert_eq!(request.unique_id, "2610181230");
        assert_eq!(request.expiration_time - request.generation_time, Duration::minutes(20));

        let xml = request.to_xml();
        assert!(xml.contains("<uniqueId>2610181230</uniqueId>"));
        assert!(xml.contains("<generationTime>2026-10-18T12:20:00+00:00</generationTime>"));
        assert!(xml.contains("<expirationTime>2026-10-18T12:40:00+00:00</expirationTime>"));
        assert!(xml.contains("<service>wsfe</service>"));
        Document::parse(&xml).unwrap();
    }

    #[tokio::test]
    async fn test_login_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ws/services/LoginCms"))
            .and(header("SOAPAction", "\"\""))
            .and(body_string_contains("<wsaa:in0>Q01TLXBheWxvYWQ=</wsaa:in0>"))
            .respond_with(ResponseTemplate::new(200).set_body_string(login_success_body()))
            .expect(1)
            .mount(&server)
            .await;

        let ticket = client(&server, FixedSigner(Ok("Q01TLXBheWxvYWQ=")))
            .request_ticket()
            .await
            .unwrap();

        assert_eq!(ticket.token().expose_secret(), "PD94bWwgdmVyc2lvbj0iMS4wIg==");
        assert_eq!(ticket.sign().expose_secret(), "c2lnbmF0dXJl");
        assert_eq!(
            ticket.expires_at(),
            DateTime::parse_from_rfc3339("2026-10-19T00:50:00Z").unwrap()
        );
        assert_eq!(ticket.expires_at() - ticket.generated_at(), Duration::hours(12));
    }

    #[tokio::test]
    async fn test_already_authenticated_fault_by_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string(fault_body(
                "ns1:coe.alreadyAuthenticated",
                ALREADY_AUTHENTICATED_MESSAGE,
            )))
            .mount(&server)
            .await;

        let result = client(&server, FixedSigner(Ok("cms"))).request_ticket().await;
        assert_eq!(result.unwrap_err(), AuthorityError::TicketAlreadyValid);
    }

    #[tokio::test]
    async fn test_already_authenticated_fault_by_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_string(fault_body("soapenv:Server", ALREADY_AUTHENTICATED_MESSAGE)),
            )
            .mount(&server)
            .await;

        let result = client(&server, FixedSigner(Ok("cms"))).request_ticket().await;
        assert_eq!(result.unwrap_err(), AuthorityError::TicketAlreadyValid);
    }

    #[tokio::test]
    async fn test_other_fault_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string(fault_body(
                "ns1:cms.cert.expired",
                "Certificado expirado",
            )))
            .mount(&server)
            .await;

        let result = client(&server, FixedSigner(Ok("cms"))).request_ticket().await;
        assert_eq!(
            result.unwrap_err(),
            AuthorityError::Rejected("Certificado expirado".to_string())
        );
    }

    #[tokio::test]
    async fn test_http_error_without_envelope_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
            .mount(&server)
            .await;

        let result = client(&server, FixedSigner(Ok("cms"))).request_ticket().await;
        assert!(matches!(result, Err(AuthorityError::Transport(msg)) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_success_without_credentials_is_invalid() {
        let server = MockServer::start().await;
        let body = format!(
            "<soapenv:Envelope xmlns:soapenv=\"{SOAP_ENV_NS}\"><soapenv:Body>\
             <loginCmsResponse xmlns=\"{WSAA_NS}\">\
             <loginCmsReturn>{}</loginCmsReturn>\
             </loginCmsResponse>\
             </soapenv:Body></soapenv:Envelope>",
            escape_xml("<loginTicketResponse><header/></loginTicketResponse>")
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let result = client(&server, FixedSigner(Ok("cms"))).request_ticket().await;
        assert!(matches!(result, Err(AuthorityError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_signing_failure_skips_http_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = client(&server, FixedSigner(Err("unable to load certificate")))
            .request_ticket()
            .await;
        assert!(matches!(
            result,
            Err(AuthorityError::Signing(msg)) if msg.contains("unable to load certificate")
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport() {
        let client = WsaaClient::new(
            "http://127.0.0.1:1/ws/services/LoginCms",
            "wsfe",
            Arc::new(FixedSigner(Ok("cms"))),
            std::time::Duration::from_secs(2),
        )
        .unwrap();

        assert!(matches!(
            client.request_ticket().await,
            Err(AuthorityError::Transport(_))
        ));
    }
}
