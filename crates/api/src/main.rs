use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use splitledger_infra::{ClaimReaper, InMemoryLedgerStore, LedgerConfig, LedgerService, LedgerStore, PostgresLedgerStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = LedgerConfig::from_env()?;
    splitledger_observability::init(config.log_format);

    let store: Arc<dyn LedgerStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            let store = PostgresLedgerStore::new(pool);
            store.migrate().await?;
            tracing::info!("using Postgres ledger store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory ledger store");
            Arc::new(InMemoryLedgerStore::new())
        }
    };

    let reaper = config
        .reaper_interval
        .map(|interval| ClaimReaper::new(store.clone(), config.claim_ttl).spawn(interval));

    let app = splitledger_api::app::build_app(LedgerService::new(store));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if let Some(reaper) = reaper {
        reaper.shutdown().await;
    }
    Ok(())
}
