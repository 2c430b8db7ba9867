//! Wallet ledger service binary
//!
//! Wires the store, caches and use cases together and waits for shutdown.
//! The HTTP surface is mounted by the embedding application.

use anyhow::Context;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::info;
use wallet_ledger::cache::{DistributedCache, MokaLocalCache, RedisCache, TieredCache};
use wallet_ledger::coalesce::Coalescer;
use wallet_ledger::enrichment::Enricher;
use wallet_ledger::ledger::{LedgerCaches, LedgerFlights};
use wallet_ledger::metrics::Metrics;
use wallet_ledger::service::ServiceFlights;
use wallet_ledger::store::PgStore;
use wallet_ledger::{Config, Directory, Ledger, User, WalletService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!("Starting {}", config.service_name);

    let io_timeout = config.ledger.io_timeout();
    let metrics = Metrics::new().context("Failed to register metrics")?;

    let store = Arc::new(
        PgStore::connect(&config.database, io_timeout)
            .await
            .context("Failed to connect to database")?,
    );
    store.migrate().await.context("Failed to run migrations")?;

    let redis: Arc<dyn DistributedCache> = Arc::new(
        RedisCache::connect(&config.redis.url, io_timeout)
            .await
            .context("Failed to connect to Redis")?
            .with_metrics(metrics.clone()),
    );

    let ledger = Arc::new(Ledger::new(
        store.clone(),
        LedgerCaches::moka(redis.clone(), &config.cache, &metrics),
        LedgerFlights::coalescing(&metrics),
        config.ledger.history_limit,
        metrics.clone(),
    ));

    let users = TieredCache::<Option<User>>::new(
        Arc::new(
            MokaLocalCache::with_capacity(config.cache.local_capacity)
                .with_metrics(metrics.clone()),
        ),
        redis,
        config.cache.ttl(),
    );
    let directory = Arc::new(Directory::new(
        store,
        users,
        Arc::new(Coalescer::<Option<User>>::new().with_metrics(metrics.clone())),
        metrics.clone(),
    ));

    let _service = WalletService::new(
        ledger,
        directory.clone(),
        Enricher::new(directory, config.ledger.enrichment_workers),
        ServiceFlights::coalescing(&metrics),
        config.ledger.max_topup_amount,
    );

    info!(
        local_ttl_secs = config.cache.local_ttl_secs,
        distributed_ttl_secs = config.cache.distributed_ttl_secs,
        enrichment_workers = config.ledger.enrichment_workers,
        "Wallet ledger ready"
    );

    tokio::signal::ctrl_c().await?;

    info!(
        local_hit_rate = metrics.hit_rate(wallet_ledger::metrics::TIER_LOCAL),
        distributed_hit_rate = metrics.hit_rate(wallet_ledger::metrics::TIER_DISTRIBUTED),
        "Shutting down wallet ledger"
    );
    Ok(())
}
