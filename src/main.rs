//! freight-link daemon.
//!
//! Logs in with a bearer token, keeps the push channel alive and logs every
//! recognized push event until Ctrl-C.
//!
//! ```text
//! FREIGHT_LINK_CONFIG=freight-link.toml FREIGHT_LINK_TOKEN=... freight-link
//! ```

use std::path::PathBuf;

use freight_link::config::{load_config, ClientConfig};
use freight_link::observability::{logging, metrics};
use freight_link::push::{ConnectionState, EventKind};
use freight_link::FreightClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::var_os("FREIGHT_LINK_CONFIG").map(PathBuf::from) {
        Some(path) => load_config(&path)?,
        None => ClientConfig::default(),
    };
    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        api = %config.api.base_url,
        push = %config.push.url,
        "freight-link starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let client = FreightClient::new(config)?;

    let _subscriptions: Vec<_> = EventKind::ALL
        .into_iter()
        .map(|kind| {
            client.subscribe(kind, move |payload| {
                tracing::info!(event = kind.as_str(), payload = %payload, "Push event");
            })
        })
        .collect();

    client.connection().on_state_change(|state| {
        if let Some(text) = state.indicator() {
            tracing::info!(state = state.as_str(), "{}", text);
        }
        if state == ConnectionState::Closed {
            tracing::warn!("Push channel closed");
        }
    });

    match std::env::var("FREIGHT_LINK_TOKEN") {
        Ok(token) if !token.is_empty() => client.login(token, None),
        _ => tracing::warn!("FREIGHT_LINK_TOKEN not set, push channel will not connect"),
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    client.shutdown().await;

    for (name, state, failures) in client.breakers().snapshot() {
        tracing::info!(dependency = %name, state = %state, failures, "Circuit breaker at shutdown");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
