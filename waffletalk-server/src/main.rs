//! waffletalk — chat server binary.
//!
//! Usage: `waffletalk [config.json]`. Without an argument the config is read
//! from `$WAFFLETALK_CONFIG`, then `/etc/waffletalk.json`.

use log::{error, info};
use waffletalk_server::{ServerConfig, WaffleServer};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    info!("storage at {}", config.storage_path.display());

    let server = match WaffleServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("cannot open world: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = server.run().await {
        error!("server stopped: {e}");
        std::process::exit(1);
    }
}
