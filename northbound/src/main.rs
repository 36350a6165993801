mod api;
mod config;

use std::sync::Arc;

use anyhow::Context;
use gateway_core::{GatewayState, KeepaliveOptions, router::KubernetesPodAddressing};
use registry::{InMemoryRoutingCache, PostgresRegistry, RedisRoutingCache, RegistryOptions, RoutingCache};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    simple_logger::init_with_level(config.log.level.as_level())?;

    let routing_cache: Arc<dyn RoutingCache> = match RedisRoutingCache::connect(&config.cache.url).await {
        Ok(cache) => Arc::new(cache),
        Err(err) => {
            log::warn!("falling back to an in-process routing cache, redis unavailable: {err}");
            Arc::new(InMemoryRoutingCache::default())
        }
    };

    let pool = sqlx::PgPool::connect(&config.db.url).await.context("connecting to postgres")?;
    let registry = Arc::new(PostgresRegistry::new(pool, routing_cache.clone(), RegistryOptions::default()));

    let pod_addressing = Arc::new(KubernetesPodAddressing {
        service: config.pod_service.clone(),
        namespace: config.pod_namespace.clone(),
        port: config.pod_port,
    });

    // The northbound daemon never owns a device session locally, so
    // `self_pod_addr` is left empty: every lookup either forwards to the
    // owning gateway pod or reports the device offline (spec §4.8).
    let state = Arc::new(GatewayState::new(
        registry,
        routing_cache,
        pod_addressing,
        KeepaliveOptions::default(),
        String::new(),
    ));

    let app = api::build_router(state);
    let listener = tokio::net::TcpListener::bind(config.server.address).await?;
    log::info!("northbound interface listening on {}", config.server.address);

    axum::serve(listener, app).await?;
    Ok(())
}
