use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use identity_directory::auth::bootstrap_admin_agent;
use identity_directory::config::{AppConfig, StoreBackend};
use identity_directory::database::{MemoryStore, PostgresStore, PublicKey, SharedStore};
use identity_directory::handlers::V1;
use identity_directory::server::{Server, Versions};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL and IDM_* settings.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env();
    let store = open_store(&config).await?;

    if let Some(key) = &config.security.admin_agent_public_key {
        let key: PublicKey = key.parse().context("invalid IDM_ADMIN_AGENT_PUBLIC_KEY")?;
        bootstrap_admin_agent(store.as_ref(), key, &config.security.admin_group)
            .await
            .context("cannot create admin agent")?;
    }

    let mut versions: Versions = BTreeMap::new();
    versions.insert("v1".to_string(), Arc::new(V1));

    let params = config.server_params();
    let server = Server::new(store, params.clone(), versions)?;

    let listener = tokio::net::TcpListener::bind(&params.private_addr)
        .await
        .with_context(|| format!("failed to bind {}", params.private_addr))?;
    tracing::info!(
        "Identity server listening on {} (public {})",
        params.private_addr,
        params.public_addr
    );

    let served = axum::serve(listener, server.router())
        .with_graceful_shutdown(shutdown_signal())
        .await;
    server.close().await;
    served.context("server error")
}

async fn open_store(config: &AppConfig) -> Result<SharedStore> {
    match config.database.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory identity store; records are lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let url = config
                .database
                .url
                .as_deref()
                .context("DATABASE_URL must be set for the postgres store")?;
            let store = PostgresStore::connect(&config.database, url)
                .await
                .context("cannot connect to DATABASE_URL")?;
            store.migrate().await.context("cannot migrate identity schema")?;
            Ok(Arc::new(store))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
