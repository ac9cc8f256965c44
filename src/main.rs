use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tile_capture::config::GameConfig;
use tile_capture::network::server::GameServer;
use tile_capture::store::{MemoryStore, RedisStore, SessionStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match GameConfig::load() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let store: Arc<dyn SessionStore> = match &config.redis_url {
        Some(url) => match RedisStore::connect(url, config.redis_key_prefix.clone()).await {
            Ok(store) => Arc::new(store.with_queue_ttl(config.lease_ttl())),
            Err(e) => {
                error!("Cannot reach redis at {}: {}", url, e);
                std::process::exit(1);
            }
        },
        None => {
            info!("No redis_url configured; sessions are local to this process");
            Arc::new(MemoryStore::new())
        }
    };

    if let Some(local) = &config.local_session {
        if let Err(e) = store.register_members(&local.id, &local.members).await {
            error!("Cannot register session {}: {}", local.id, e);
            std::process::exit(1);
        }
        info!(session_id = %local.id, "Registered {} members", local.members.len());
    }

    if let Err(e) = GameServer::new(config, store).run().await {
        error!("Server stopped: {}", e);
        std::process::exit(1);
    }
}
