//! perchd - federated presence and roster daemon.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use perchd::accounts::StaticDirectory;
use perchd::cache::MemoryCache;
use perchd::cluster::LocalBus;
use perchd::config::Config;
use perchd::network::Gateway;
use perchd::offline::MemoryOfflineStore;
use perchd::state::Aviary;
use perchd::{http, metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(
        domain = %config.server.domain,
        accounts = config.accounts.len(),
        "Starting perchd"
    );

    metrics::init();
    if let Some(addr) = config.server.metrics_listen {
        tokio::spawn(http::run_http_server(addr));
    }

    // Federation sink. Until a server-to-server link is wired in, stanzas
    // for nonlocal domains are logged and dropped.
    let (remote_tx, mut remote_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(stanza) = remote_rx.recv().await {
            debug!(?stanza, "nonlocal stanza dropped (no federation link)");
        }
    });

    let accounts = Arc::new(StaticDirectory::new(
        config.server.domain.domain(),
        config.accounts.clone(),
    ));
    let state = Aviary::new(
        config,
        Arc::new(MemoryCache::new()),
        accounts,
        Arc::new(MemoryOfflineStore::new()),
        Arc::new(LocalBus::new()),
        remote_tx,
    );

    // Directed-presence reconciliation on cluster membership changes.
    let mut membership = state.cluster.subscribe();
    {
        let state = state.clone();
        tokio::spawn(async move {
            while let Ok(event) = membership.recv().await {
                info!(?event, "cluster membership changed; republishing directed presence");
                state.directed.republish().await;
            }
        });
    }

    Arc::new(Gateway::new(state)).run().await
}
