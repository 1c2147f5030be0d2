//! Parley node - runs a request/response exchange between two in-process agents.

mod config;
mod loopback;

use clap::Parser;
use config::{NodeArgs, NodeConfig};
use loopback::run_exchange;
use parley_core::ParleyResult;

#[tokio::main]
async fn main() -> ParleyResult<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = NodeConfig::from(NodeArgs::parse());
    tracing::info!(
        "Starting exchange {} -> {} (timeout {:?}, retries {}, responder failures {})",
        config.requester,
        config.responder,
        config.request.timeout,
        config.request.max_retries,
        config.failures
    );

    let report = run_exchange(&config).await?;
    match &report.outcome {
        Ok(reply) => tracing::info!(
            "Request {} answered after {} retries: {}",
            report.request_id,
            report.retries,
            reply.content
        ),
        Err(e) => tracing::warn!("Request {} did not succeed: {}", report.request_id, e),
    }

    println!("{}", serde_json::to_string_pretty(&report.conversation)?);
    Ok(())
}
