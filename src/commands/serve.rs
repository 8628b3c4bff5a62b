use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use super::{load_config, load_registry};
use crate::cli::ServeArgs;
use jobfront::access::{AccessControl, TokenAccessControl};
use jobfront::http::HttpServer;

pub async fn run(args: ServeArgs) -> Result<()> {
    let mut config = load_config(&args.common)?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    info!("Starting server mode");
    info!("Configuration:");
    info!("  Owner: {}", config.owner);
    info!("  Entities directory: {}", config.entities.dir);
    info!("  Eviction policy: {}", config.cache.eviction_policy);
    info!("  Max cached results: {}", config.cache.max_entries);
    info!("  Admin tokens: {}", config.auth.admin_tokens.len());
    info!("  HTTP bind: {}", config.server.bind);

    let registry = load_registry(&config)?;

    // Warm-up runs in the background so the listener comes up immediately
    let warm = Arc::clone(&registry);
    tokio::task::spawn_blocking(move || {
        let completed = warm.execute_at_start();
        if completed > 0 {
            info!("Executed {} entities at start", completed);
        }
    });

    let access: Arc<dyn AccessControl> = Arc::new(TokenAccessControl::from_config(&config.auth));

    HttpServer::new(config.server.bind.clone(), registry, access)
        .run(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        let terminate = async {
            match unix_signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to set up SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
            }
            _ = terminate => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down gracefully...");
    }
}
