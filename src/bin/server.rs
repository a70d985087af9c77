use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use raftkv::config::Config;
use raftkv::kv::Kv;
use raftkv::node::Node;
use raftkv::{applier, consensus};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::parse();
    let bind_addr = config.bind_addr().map_err(|e| {
        tracing::error!(error = %e, "invalid startup configuration");
        anyhow::anyhow!(e.to_string())
    })?;
    let node = Arc::new(Node::new(config.self_addr(), config.peers(), Kv::new()));

    info!(node = %node.id, peers = ?node.peers, "starting node");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;

    let app = raftkv::transport::server::build(node.clone());

    let consensus_task = tokio::spawn(consensus::run(node.clone()));
    let applier_task = tokio::spawn(applier::run(node.clone()));

    axum::serve(listener, app)
        .await
        .context("serving http")?;

    consensus_task.abort();
    applier_task.abort();
    Ok(())
}
