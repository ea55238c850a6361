//! Coordinator binary.
//!
//! Logging init mirrors the teacher's `main.rs`: `tracing_subscriber::fmt`
//! with an `EnvFilter` defaulted to this crate at `info`, overridable via
//! `RUST_LOG`.

use std::sync::Arc;

use agora::net::{Endpoint, Engine};
use agora::config::{CoordinatorArgs, CoordinatorConfig};
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("agora=info".parse().unwrap()),
        )
        .init();

    let args = CoordinatorArgs::parse();
    let config: CoordinatorConfig = args.into();

    let endpoint = match Endpoint::bind(config.bind_addr).await {
        Ok(endpoint) => Arc::new(endpoint),
        Err(err) => {
            error!(error = %err, "failed to start coordinator");
            std::process::exit(1);
        }
    };

    info!(
        bind = %config.bind_addr,
        offer_window_secs = config.offer_window.as_secs(),
        abandon_timeout_secs = config.abandon_timeout.as_secs(),
        "agora-coordinator starting"
    );

    let engine = Engine::new(endpoint.clone(), config);

    tokio::select! {
        result = endpoint.run(engine) => {
            if let Err(err) = result {
                error!(error = %err, "receive loop terminated");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
}
