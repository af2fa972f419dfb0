//! Kankan Relay: forwards board-room traffic between peers.
//!
//! The relay holds no board state. Configure it with `KANKAN_RELAY_ADDR`
//! and `KANKAN_RELAY_CAPACITY`; set `RUST_LOG` to change verbosity.

use kankan_collab::{RelayConfig, RelayServer};
use log::{error, info};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RelayConfig::from_env();
    info!("Starting Kankan relay on {}...", config.bind_addr);

    let server = match RelayServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind relay: {e}");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Relay stopped: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down relay");
        }
    }
}
