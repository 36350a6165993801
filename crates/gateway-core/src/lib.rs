//! Shared state-machine and protocol-handler logic for both the southbound
//! CoAP gateway and the northbound HTTP interface.
//!
//! Design Note: no process-wide mutable globals. Everything a handler needs
//! — the registry, the routing cache, the session table, and the tunables
//! that drive keepalive/token behavior — is bundled into a [`GatewayState`]
//! built once at startup and threaded through explicitly.

pub mod handler;
pub mod keepalive;
pub mod rd;
pub mod router;
pub mod session;
pub mod session_container;

use std::sync::Arc;

use registry::{Registry, RoutingCache};

pub use handler::{DeviceLink, LinkError, ObservationHandle};
pub use keepalive::{Keepalive, KeepaliveOptions, KeepaliveState, KeepaliveTransport, PingOutcome};
pub use rd::{RdError, RdResponse};
pub use router::{PodAddress, PodAddressing};
pub use session::{Session, SessionError};
pub use session_container::SessionContainer;

/// Everything a gateway or northbound request handler needs, constructed
/// once per process and cloned (cheaply, via `Arc`) into every task.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<dyn Registry>,
    pub routing_cache: Arc<dyn RoutingCache>,
    pub sessions: Arc<SessionContainer>,
    pub pod_addressing: Arc<dyn PodAddressing>,
    pub keepalive: KeepaliveOptions,
    /// This pod's own address, used both when a device logs in (so the
    /// routing cache entry points somewhere) and when the Request Router
    /// decides whether it owns a device's session locally (spec §4.8).
    pub self_pod_addr: String,
}

impl GatewayState {
    pub fn new(
        registry: Arc<dyn Registry>,
        routing_cache: Arc<dyn RoutingCache>,
        pod_addressing: Arc<dyn PodAddressing>,
        keepalive: KeepaliveOptions,
        self_pod_addr: String,
    ) -> Self {
        Self {
            registry,
            routing_cache,
            sessions: Arc::new(SessionContainer::default()),
            pod_addressing,
            keepalive,
            self_pod_addr,
        }
    }
}
