//! Durable identity/token registry and ephemeral routing cache.
//!
//! This crate owns all durable identity, token, and published-resource
//! state (the `Registry` trait) plus the `deviceID → podAddress` routing
//! cache (`RoutingCache`) that the northbound daemon consults to find the
//! gateway pod currently holding a device's session.

pub mod cache;
pub mod error;
pub mod fake;
pub mod model;
pub mod store;
pub mod token;

pub use cache::{InMemoryRoutingCache, RedisRoutingCache, RoutingCache};
pub use error::{Error, Result};
pub use model::{FindDeviceQuery, PrincipalKind};
pub use store::{PostgresRegistry, Registry, RegistryOptions};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        cache::InMemoryRoutingCache,
        fake::InMemoryRegistry,
        model::PrincipalKind,
        store::{Registry, RegistryOptions},
    };

    #[tokio::test]
    async fn update_session_rejects_stale_access_token() {
        let cache = Arc::new(InMemoryRoutingCache::default());
        let registry = InMemoryRegistry::new(cache, RegistryOptions::default());

        let user_token = registry.register_user("bob", "local").await.unwrap();
        let mediator_token = registry.provision_mediator("bob", &user_token).await.unwrap();
        let one_time = registry
            .provision_principal(PrincipalKind::Device, "device-2", &mediator_token)
            .await
            .unwrap();
        let grant = registry
            .register_principal(PrincipalKind::Device, "device-2", &one_time)
            .await
            .unwrap();

        assert!(
            registry
                .update_session("device-2", &grant.user_id, "wrong-token", "10.0.0.1:5684", true)
                .await
                .is_err()
        );

        let ttl = registry
            .update_session("device-2", &grant.user_id, &grant.access_token, "10.0.0.1:5684", true)
            .await
            .unwrap();
        assert!(ttl > 0);
    }
}
