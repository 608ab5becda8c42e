//! `request-last-invoice`: ask the ARCA bridge for the last authorized invoice.
//!
//! Publishes one query, prints the reply JSON and exits non-zero on any error.

#![warn(clippy::pedantic)]

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use common::config::{BrokerConfig, DEFAULT_REQUEST_SUBJECT};
use common::nats::NatsBroker;
use common::secret::SecretString;
use common::types::{InvoiceQuery, QueryOutcome};
use invoice_client::CorrelationClient;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Ask the ARCA bridge for the last authorized invoice number
#[derive(Parser, Debug)]
#[command(name = "request-last-invoice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://localhost:4222", hide_env_values = true)]
    nats_url: String,

    /// Subject the bridge consumes requests from
    #[arg(long, env = "ARCA_REQUEST_SUBJECT", default_value = DEFAULT_REQUEST_SUBJECT)]
    subject: String,

    /// Seconds to wait for the reply
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Taxpayer id (CUIT)
    #[arg(default_value = "23146234399")]
    cuit: String,

    /// Point of sale
    #[arg(default_value = "0001")]
    pto_vta: String,

    /// Invoice type code
    #[arg(default_value = "001")]
    cbte_tipo: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(QueryOutcome::Response(value)) => {
            print_json(&serde_json::json!({ "response": value }));
            ExitCode::SUCCESS
        }
        Ok(QueryOutcome::Error(message)) => {
            print_json(&serde_json::json!({ "error": message }));
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<QueryOutcome> {
    let query = InvoiceQuery::new(cli.cuit, cli.pto_vta, cli.cbte_tipo)
        .context("Invalid query")?;

    let config =
        BrokerConfig::new(SecretString::from(cli.nats_url)).with_request_subject(cli.subject);
    let broker = NatsBroker::connect(&config)
        .await
        .context("Failed to connect to NATS")?;

    let client = CorrelationClient::new(Arc::new(broker));
    let result = client
        .call(&query, Duration::from_secs(cli.timeout_secs))
        .await
        .context("Request failed")?;

    Ok(result.outcome)
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}
