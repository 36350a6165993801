mod config;
mod link;
mod observer;
mod server;
mod tls;

use std::sync::Arc;

use anyhow::Context;
use gateway_core::GatewayState;
use registry::{InMemoryRoutingCache, PostgresRegistry, RedisRoutingCache, RegistryOptions, RoutingCache};

use crate::config::{Config, Network};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    simple_logger::init_with_level(config.log.level.as_level())?;

    if config.pod_ip.is_empty() {
        log::warn!("MY_POD_IP is not set; the Request Router will never treat this pod as a local owner");
    }

    let routing_cache: Arc<dyn RoutingCache> = match RedisRoutingCache::connect(&config.cache.url).await {
        Ok(cache) => Arc::new(cache),
        Err(err) => {
            log::warn!("falling back to an in-process routing cache, redis unavailable: {err}");
            Arc::new(InMemoryRoutingCache::default())
        }
    };

    let pool = sqlx::PgPool::connect(&config.db.url).await.context("connecting to postgres")?;
    let registry = Arc::new(PostgresRegistry::new(pool, routing_cache.clone(), RegistryOptions::default()));

    let pod_addressing = Arc::new(gateway_core::router::KubernetesPodAddressing {
        service: config.pod_service.clone(),
        namespace: config.pod_namespace.clone(),
        port: config.http.address.port(),
    });

    let state = Arc::new(GatewayState::new(
        registry,
        routing_cache,
        pod_addressing,
        config.keepalive.as_options(),
        config.pod_ip.clone(),
    ));

    let tls_acceptor = server::build_acceptor(
        config.server.network,
        config.tls.certificate.as_deref(),
        config.tls.certificate_key.as_deref(),
        config.tls.ca_pool.as_deref(),
    )?;

    if matches!(config.server.network, Network::TcpTls) && tls_acceptor.is_none() {
        anyhow::bail!("NETWORK=tcp-tls requires tls.certificate, tls.certificate-key and tls.ca-pool");
    }

    if config.debug.ticker {
        let ticker_state = state.clone();
        let interval = std::time::Duration::from_secs(config.debug.ticker_interval_secs);
        tokio::spawn(server::run_debug_ticker(ticker_state, interval));
    }

    let http_state = state.clone();
    let http_address = config.http.address;
    let coap = server::run(
        state,
        config.server.address,
        config.server.network,
        tls_acceptor,
        observer::Observer::default(),
    );
    let http = server::run_http(http_state, http_address);

    tokio::try_join!(coap, http)?;
    Ok(())
}
