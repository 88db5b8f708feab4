use std::sync::Arc;

use clap::Args;
use tokio::sync::watch;

pub mod chain;
pub mod config;
pub mod middleware;

pub use middleware::KubernetesMiddleware;

/// Starts the DNS middleware and its orchestrator watcher.
#[derive(Args, Debug)]
pub struct Command;

impl Command {
    pub async fn run(&self, config: crate::config::Config) {
        tracing::info!("preparing kubernetes dns middleware");

        let killer_mode = config.registry.killer_mode;
        let resolver_cfg = config.dns.resolver_config();

        let registry = config.dns.enabled.then(|| config.registry.build());

        let (stop_tx, stop_rx) = watch::channel(false);
        let watcher_task = match &registry {
            Some(registry) => match config.watch.build().await {
                Ok(watcher) => {
                    let registry = registry.clone();
                    Some(tokio::spawn(async move {
                        watcher.run(registry, stop_rx).await;
                    }))
                }
                Err(error) => {
                    tracing::warn!(%error, "unable to build orchestrator client, serving from an empty registry");
                    None
                }
            },
            None => None,
        };

        let middleware = Arc::new(KubernetesMiddleware::new(
            registry,
            resolver_cfg,
            config.cache,
            config.predictor,
            killer_mode,
        ));

        tracing::info!(name = middleware.name(), "kubernetes middleware ready");

        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutting down");
        let _ = stop_tx.send(true);
        if let Some(task) = watcher_task {
            let _ = task.await;
        }
    }
}
