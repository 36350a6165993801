//! The Request Router (spec §4.8): given a deviceUUID, find which gateway
//! pod currently holds its CoAP connection and either dispatch locally or
//! forward the HTTP request to that pod.

use std::time::Duration;

use bytes::Bytes;
use registry::RoutingCache;

use crate::{handler::LinkError, session_container::SessionContainer};

/// The opaque pod address stored in the routing cache: a bare IP for the
/// default Kubernetes addressing scheme, but deliberately untyped since the
/// cache itself never interprets it.
pub type PodAddress = String;

/// Turns a raw pod address from the routing cache into a URL this process
/// can forward an HTTP request to. Supplemental feature (not named by the
/// core spec, drawn from the original implementation): the default
/// implementation targets a Kubernetes headless service, where each pod's
/// stable DNS name substitutes dashes for the dots in its IP.
pub trait PodAddressing: Send + Sync {
    fn resolve(&self, pod_addr: &PodAddress) -> String;
}

/// `10.1.2.3` under service `gateway` in namespace `iot` becomes
/// `10-1-2-3.gateway.iot.svc.cluster.local`, the standard per-pod DNS
/// record a Kubernetes headless service publishes.
pub struct KubernetesPodAddressing {
    pub service: String,
    pub namespace: String,
    pub port: u16,
}

impl PodAddressing for KubernetesPodAddressing {
    fn resolve(&self, pod_addr: &PodAddress) -> String {
        let host = pod_addr.replace('.', "-");
        format!(
            "http://{host}.{service}.{namespace}.svc.cluster.local:{port}",
            service = self.service,
            namespace = self.namespace,
            port = self.port,
        )
    }
}

#[derive(Debug)]
pub enum RouteError {
    /// No routing cache entry (or an expired one): the device is not
    /// currently connected to any pod.
    DeviceOffline,
    /// The cache named a pod, but the local Session Container has no
    /// session for this device — routing metadata and connection state
    /// have drifted apart.
    LocalSessionMissing,
    Transport(LinkError),
    Cache(registry::Error),
}

impl From<registry::Error> for RouteError {
    fn from(err: registry::Error) -> Self {
        RouteError::Cache(err)
    }
}

/// Step 1–2 of the Request Router: look up which pod owns `device_id` and
/// decide whether this is the owning pod. Returns `None` when the owning
/// pod is this one (`self_pod_addr`), signaling the caller should dispatch
/// locally via [`route_locally`] instead of forwarding over HTTP.
pub async fn resolve_pod(
    cache: &dyn RoutingCache,
    addressing: &dyn PodAddressing,
    device_id: &str,
    self_pod_addr: &str,
) -> Result<Option<String>, RouteError> {
    let pod_addr = cache.lookup_pod(device_id).await?.ok_or(RouteError::DeviceOffline)?;

    if pod_addr == self_pod_addr {
        Ok(None)
    } else {
        Ok(Some(addressing.resolve(&pod_addr)))
    }
}

/// Step 3 of the Request Router, run on the pod that owns the session:
/// looks the device up in the local [`SessionContainer`] and issues the
/// CoAP POST, relaying the response body back as-is.
pub async fn route_locally(
    sessions: &SessionContainer,
    device_id: &str,
    href: &str,
    body: &[u8],
    deadline: Duration,
) -> Result<Bytes, RouteError> {
    let session = sessions.find_by_device(device_id).ok_or(RouteError::LocalSessionMissing)?;
    session.post(href, body, deadline).await.map_err(RouteError::Transport)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kubernetes_addressing_substitutes_dots_for_dashes() {
        let addressing =
            KubernetesPodAddressing { service: "gateway".into(), namespace: "iot".into(), port: 5683 };
        assert_eq!(
            addressing.resolve(&"10.1.2.3".to_string()),
            "http://10-1-2-3.gateway.iot.svc.cluster.local:5683"
        );
    }

    #[tokio::test]
    async fn resolve_pod_reports_offline_when_cache_empty() {
        let cache = registry::InMemoryRoutingCache::default();
        let addressing =
            KubernetesPodAddressing { service: "gateway".into(), namespace: "iot".into(), port: 5683 };

        let result = resolve_pod(&cache, &addressing, "dev-1", "10.0.0.1").await;
        assert!(matches!(result, Err(RouteError::DeviceOffline)));
    }

    #[tokio::test]
    async fn resolve_pod_returns_none_for_local_owner() {
        let cache = registry::InMemoryRoutingCache::default();
        cache.set_pod("dev-1", "10.0.0.1", Duration::from_secs(60)).await.unwrap();
        let addressing =
            KubernetesPodAddressing { service: "gateway".into(), namespace: "iot".into(), port: 5683 };

        let result = resolve_pod(&cache, &addressing, "dev-1", "10.0.0.1").await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn resolve_pod_forwards_to_remote_owner() {
        let cache = registry::InMemoryRoutingCache::default();
        cache.set_pod("dev-1", "10.0.0.2", Duration::from_secs(60)).await.unwrap();
        let addressing =
            KubernetesPodAddressing { service: "gateway".into(), namespace: "iot".into(), port: 5683 };

        let result = resolve_pod(&cache, &addressing, "dev-1", "10.0.0.1").await.unwrap();
        assert_eq!(result, Some("http://10-0-0-2.gateway.iot.svc.cluster.local:5683".to_string()));
    }
}
