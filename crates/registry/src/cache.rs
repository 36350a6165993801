use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Ephemeral `deviceID → podAddress` mapping with per-key TTL (spec §4.2).
/// The only write path is `Registry::update_session`; the read path is
/// `lookup_pod`. An absent or expired entry means "not connected".
#[async_trait::async_trait]
pub trait RoutingCache: Send + Sync {
    async fn set_pod(&self, device_id: &str, pod_addr: &str, ttl: Duration) -> Result<()>;

    /// Sets the entry to the unspecified address with immediate expiry,
    /// the logout convention from spec §3 ("`::/128` with TTL 0").
    async fn clear_pod(&self, device_id: &str) -> Result<()>;

    async fn lookup_pod(&self, device_id: &str) -> Result<Option<String>>;
}

/// Redis-backed implementation. A pod writes its own address with a `SET
/// key value EX ttl`; logout rewrites the key to the unspecified address
/// with a zero TTL, which Redis treats as an immediate delete.
pub struct RedisRoutingCache {
    manager: redis::aio::ConnectionManager,
}

impl RedisRoutingCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(Error::from)?;
        let manager = client.get_connection_manager().await.map_err(Error::from)?;
        Ok(Self { manager })
    }

    fn key(device_id: &str) -> String {
        format!("routing:{device_id}")
    }
}

#[async_trait::async_trait]
impl RoutingCache for RedisRoutingCache {
    async fn set_pod(&self, device_id: &str, pod_addr: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(Self::key(device_id))
            .arg(pod_addr)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await
            .map_err(Error::from)
    }

    async fn clear_pod(&self, device_id: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(Self::key(device_id))
            .query_async::<()>(&mut conn)
            .await
            .map_err(Error::from)
    }

    async fn lookup_pod(&self, device_id: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(Self::key(device_id))
            .query_async(&mut conn)
            .await
            .map_err(Error::from)
    }
}

struct Entry {
    pod_addr: String,
    expires_at: Instant,
}

/// In-process fake used by the registry's and gateway-core's integration
/// tests so the routing invariants (spec §8) can be exercised without a
/// live Redis instance.
#[derive(Default)]
pub struct InMemoryRoutingCache {
    entries: Mutex<HashMap<String, Entry>>,
}

#[async_trait::async_trait]
impl RoutingCache for InMemoryRoutingCache {
    async fn set_pod(&self, device_id: &str, pod_addr: &str, ttl: Duration) -> Result<()> {
        self.entries.lock().insert(
            device_id.to_string(),
            Entry { pod_addr: pod_addr.to_string(), expires_at: Instant::now() + ttl },
        );
        Ok(())
    }

    async fn clear_pod(&self, device_id: &str) -> Result<()> {
        self.entries.lock().remove(device_id);
        Ok(())
    }

    async fn lookup_pod(&self, device_id: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock();
        match entries.get(device_id) {
            Some(entry) if entry.expires_at > Instant::now() => {
                Ok(Some(entry.pod_addr.clone()))
            }
            Some(_) => {
                entries.remove(device_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
