use std::{net::SocketAddr, sync::Arc};

use parking_lot::RwLock;

use crate::{
    handler::DeviceLink,
    keepalive::KeepaliveOptions,
    session::Session,
};

/// A thin wrapper so `ahash::HashMap` gets pre-sized capacity the way the
/// donor turn-rs session table does, without exposing the map type itself.
struct Table<K, V>(ahash::HashMap<K, V>);

impl<K: std::hash::Hash + Eq, V> Default for Table<K, V> {
    fn default() -> Self {
        Self(ahash::HashMap::with_capacity_and_hasher(256, Default::default()))
    }
}

/// Concurrent `peerAddress → Session` mapping (spec §4.5). On "session
/// new" from the CoAP server, call [`SessionContainer::open`]; on
/// "session end", call [`SessionContainer::close`], which closes the
/// session and removes it. No entry is ever mutated except via the
/// Session's own methods.
#[derive(Default)]
pub struct SessionContainer {
    sessions: RwLock<Table<SocketAddr, Arc<Session>>>,
    devices: RwLock<Table<String, SocketAddr>>,
}

impl SessionContainer {
    pub fn open(&self, peer_address: SocketAddr, link: Arc<dyn DeviceLink>, options: KeepaliveOptions) -> Arc<Session> {
        let session = Session::new(peer_address, link, options);
        self.sessions.write().0.insert(peer_address, session.clone());
        session
    }

    /// Looks up the current Session for `peer_address`, or `None` if not
    /// present (the "sentinel not present" the spec calls for).
    pub fn find(&self, peer_address: &SocketAddr) -> Option<Arc<Session>> {
        self.sessions.read().0.get(peer_address).cloned()
    }

    /// Records that `device_id` is reachable through the session at
    /// `peer_address`, so the Request Router can find it (spec §4.8 step
    /// 3). Called once a session logs in.
    pub fn bind_device(&self, device_id: &str, peer_address: SocketAddr) {
        self.devices.write().0.insert(device_id.to_string(), peer_address);
    }

    pub fn find_by_device(&self, device_id: &str) -> Option<Arc<Session>> {
        let peer_address = *self.devices.read().0.get(device_id)?;
        self.find(&peer_address)
    }

    /// Closes and removes the Session at `peer_address`, if present.
    pub async fn close(&self, peer_address: &SocketAddr) {
        let session = self.sessions.write().0.remove(peer_address);
        if let Some(session) = session {
            session.close().await;
            if let Some(device_id) = session.device_id() {
                self.devices.write().0.remove(&device_id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::{handler::LinkError, keepalive::PingOutcome};

    struct NullLink;

    #[async_trait::async_trait]
    impl DeviceLink for NullLink {
        async fn observe(&self, _href: &str) -> Result<Box<dyn crate::handler::ObservationHandle>, LinkError> {
            struct H;
            impl crate::handler::ObservationHandle for H {
                fn cancel(&self) {}
            }
            Ok(Box::new(H))
        }

        async fn get(&self, _href: &str) {}

        async fn post(&self, _href: &str, _body: &[u8], _deadline: Duration) -> Result<Bytes, LinkError> {
            Ok(Bytes::new())
        }

        async fn ping(&self, _deadline: Duration) -> PingOutcome {
            PingOutcome::Success
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn open_find_close_roundtrip() {
        let container = SessionContainer::default();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        let session = container.open(addr, Arc::new(NullLink), KeepaliveOptions::default());
        session.set_device_id("dev-1".into());
        container.bind_device("dev-1", addr);

        assert!(container.find(&addr).is_some());
        assert!(container.find_by_device("dev-1").is_some());

        container.close(&addr).await;

        assert!(container.find(&addr).is_none());
        assert!(container.find_by_device("dev-1").is_none());
    }
}
