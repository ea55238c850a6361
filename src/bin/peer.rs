//! Reference peer participant binary.

use agora::config::{PeerArgs, PeerConfig};
use agora::peer_kit::{Inventory, PeerClient};
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

    let args = PeerArgs::parse();
    let config: PeerConfig = args.into();

    let inventory = match Inventory::load(&config.inventory_path) {
        Ok(inventory) => inventory,
        Err(err) => {
            error!(path = %config.inventory_path.display(), error = %err, "failed to load inventory");
            std::process::exit(1);
        }
    };

    let (client, listener) = match PeerClient::bind(config, inventory).await {
        Ok(pair) => pair,
        Err(err) => {
            error!(error = %err, "failed to bind peer sockets");
            std::process::exit(1);
        }
    };

    if let Err(err) = client.register().await {
        error!(error = %err, "failed to send REGISTER");
        std::process::exit(1);
    }

    info!("agora-peer running");

    tokio::select! {
        result = client.clone().run(listener) => {
            if let Err(err) = result {
                error!(error = %err, "peer loop terminated");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            let _ = client.deregister().await;
            info!("shutting down");
        }
    }
}
