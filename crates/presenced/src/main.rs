use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod coordinator;
mod dbus_interface;
mod provider;

use config::Config;
use coordinator::spawn_coordinator;
use dbus_interface::PresenceService;
use presence_store::SqliteRepository;
use provider::DescriptorProvider;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("presenced starting");

    let config = Config::from_env();
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }

    let repository = SqliteRepository::open(&config.db_path)
        .await
        .context("opening repository")?;

    let provider = DescriptorProvider::new(config.embedding_dim);
    let coordinator = spawn_coordinator(&config, provider, repository)
        .await
        .context("starting coordinator")?;

    let service = PresenceService::new(coordinator);
    let _connection = zbus::connection::Builder::session()
        .context("connecting to session bus")?
        .name("org.freedesktop.Presence1")?
        .serve_at("/org/freedesktop/Presence1", service)?
        .build()
        .await
        .context("registering D-Bus service")?;

    tracing::info!(
        dim = config.embedding_dim,
        threshold = config.distance_threshold,
        cooldown_ms = config.cooldown_ms,
        "presenced ready"
    );

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("presenced shutting down");

    Ok(())
}
