//! ARCA Bridge
//!
//! Consumes last-authorized-invoice queries from a NATS JetStream work queue
//! and answers them through the ARCA WSAA and WSFE web services.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics exporter (if `METRICS_BIND_ADDRESS` is set)
//! 3. Load a still-valid ticket from the durable record
//! 4. Build the WSAA and WSFE clients
//! 5. Connect to NATS and bind the shared durable consumer
//! 6. Run the request router until Ctrl+C or SIGTERM

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;

use arca_bridge::config::Config;
use arca_bridge::observability::init_metrics_recorder;
use arca_bridge::router::RequestRouter;
use arca_bridge::signer::OpensslCmsSigner;
use arca_bridge::wsaa::WsaaClient;
use arca_bridge::wsfe::WsfeClient;
use common::nats::NatsBroker;
use common::ticket_authority::TicketAuthority;
use common::ticket_store::{FileTicketRecord, TicketStore};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arca_bridge=info,common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ARCA Bridge");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        request_subject = %config.broker.request_subject,
        stream = %config.stream_name,
        consumer = %config.consumer_name,
        service = %config.service_id,
        wsaa_url = %config.wsaa_url,
        wsfe_url = %config.wsfe_url,
        ticket_dir = %config.ticket_dir.display(),
        safety_margin_secs = config.ticket_safety_margin.as_secs(),
        "Configuration loaded successfully"
    );

    if let Some(address) = &config.metrics_bind_address {
        let address: SocketAddr = address.parse().map_err(|e| {
            error!(error = %e, addr = %address, "Invalid metrics bind address");
            format!("Invalid metrics bind address: {e}")
        })?;
        init_metrics_recorder(address).map_err(|e| {
            error!(error = %e, "Failed to initialize metrics exporter");
            e
        })?;
        info!(addr = %address, "Prometheus metrics exporter listening");
    }

    // A restart reuses a ticket that is still valid instead of asking WSAA
    // for a new one, which it would refuse.
    let record = Arc::new(FileTicketRecord::new(&config.ticket_dir, &config.service_id));
    let store = Arc::new(TicketStore::new(record));
    match store.hydrate().await {
        Ok(Some(ticket)) => {
            info!(expires_at = %ticket.expires_at(), "Reusing persisted ticket");
        }
        Ok(None) => info!("No valid persisted ticket, will request one on first query"),
        Err(e) => warn!(error = %e, "Failed to read persisted ticket, will request a new one"),
    }

    let signer = Arc::new(
        OpensslCmsSigner::new(&config.openssl_bin, &config.cert_path, &config.key_path)
            .with_timeout(config.upstream_http_timeout),
    );
    let wsaa = WsaaClient::new(
        config.wsaa_url.clone(),
        config.service_id.clone(),
        signer,
        config.upstream_http_timeout,
    )?;
    let wsfe = WsfeClient::new(config.wsfe_url.clone(), config.upstream_http_timeout)?;
    let authority = TicketAuthority::new(store, Arc::new(wsaa), config.ticket_safety_margin);

    info!("Connecting to NATS...");
    let broker = NatsBroker::connect(&config.broker).await.map_err(|e| {
        error!(error = %e, "Failed to connect to NATS");
        e
    })?;
    let mut deliveries = broker
        .request_deliveries(&config.stream_name, &config.consumer_name, config.ack_wait)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to bind request consumer");
            e
        })?;

    let router = RequestRouter::new(authority, Arc::new(wsfe), Arc::new(broker));

    let shutdown_token = CancellationToken::new();
    let router_token = shutdown_token.child_token();
    let router_task = tokio::spawn(async move {
        router.run(&mut deliveries, router_token).await;
    });

    info!("ARCA Bridge running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    shutdown_token.cancel();

    if let Err(e) = router_task.await {
        error!(error = %e, "Request router task failed");
    }

    info!("ARCA Bridge shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
