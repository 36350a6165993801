//! Cross-module registry scenario spanning provisioning, registration, and
//! token refresh (spec §8 end-to-end scenario 6).

use std::sync::Arc;

use registry::{
    FindDeviceQuery, InMemoryRoutingCache, PrincipalKind, Registry, RegistryOptions, fake::InMemoryRegistry,
};
use serde_json::json;

#[tokio::test]
async fn provision_register_refresh_round_trip_yields_distinct_tokens() {
    let cache = Arc::new(InMemoryRoutingCache::default());
    let registry = InMemoryRegistry::new(cache, RegistryOptions::default());

    let user_token = registry.register_user("alice", "local").await.unwrap();
    let mediator_token = registry.provision_mediator("alice", &user_token).await.unwrap();
    let one_time = registry
        .provision_principal(PrincipalKind::Device, "device-1", &mediator_token)
        .await
        .unwrap();

    let grant0 = registry
        .register_principal(PrincipalKind::Device, "device-1", &one_time)
        .await
        .unwrap();
    assert_eq!(grant0.ttl_secs, RegistryOptions::default().access_token_ttl_secs);

    // Spec §8: second register attempt against the now-stale one-time
    // token is rejected (Open question ii: Unauthorized).
    assert!(
        registry
            .register_principal(PrincipalKind::Device, "device-1", &one_time)
            .await
            .is_err()
    );

    let grant1 = registry
        .refresh_token(PrincipalKind::Device, "device-1", &grant0.user_id, &grant0.refresh_token)
        .await
        .unwrap();
    let grant2 = registry
        .refresh_token(PrincipalKind::Device, "device-1", &grant0.user_id, &grant1.refresh_token)
        .await
        .unwrap();

    assert_ne!(grant0.access_token, grant1.access_token);
    assert_ne!(grant1.access_token, grant2.access_token);
    assert_eq!(grant2.ttl_secs, RegistryOptions::default().access_token_ttl_secs);
    // Default policy is "preserve": refresh token stays stable across
    // refreshes.
    assert_eq!(grant0.refresh_token, grant1.refresh_token);
    assert_eq!(grant1.refresh_token, grant2.refresh_token);
}

// A link matching only one of two specified filters must not be returned:
// `FindDevice` requires every specified param to match (spec §4.1).
#[tokio::test]
async fn find_device_requires_every_specified_filter_to_match() {
    let cache = Arc::new(InMemoryRoutingCache::default());
    let registry = InMemoryRegistry::new(cache, RegistryOptions::default());

    let user_token = registry.register_user("dana", "local").await.unwrap();
    let mediator_token = registry.provision_mediator("dana", &user_token).await.unwrap();
    let one_time = registry
        .provision_principal(PrincipalKind::Device, "device-filter", &mediator_token)
        .await
        .unwrap();
    let grant = registry
        .register_principal(PrincipalKind::Device, "device-filter", &one_time)
        .await
        .unwrap();

    registry
        .publish_resource(
            "device-filter",
            json!({
                "links": [
                    {"href": "/a", "rt": ["oic.r.temperature"], "if": ["oic.if.s"]},
                    {"href": "/b", "rt": ["oic.r.light"], "if": ["oic.if.a"]},
                ]
            }),
        )
        .await
        .unwrap();

    // Matches rt but not href: AND semantics reject it.
    let query = FindDeviceQuery { rt: Some("oic.r.temperature".into()), href: Some("/b".into()), if_: None, anchor: None };
    let links = registry.find_device(&grant.user_id, &query).await.unwrap();
    assert!(links.is_empty());

    // Both filters match the same link.
    let query = FindDeviceQuery { rt: Some("oic.r.temperature".into()), href: Some("/a".into()), if_: None, anchor: None };
    let links = registry.find_device(&grant.user_id, &query).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].href, "/a");
}
