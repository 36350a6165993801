use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    handler::{DeviceLink, LinkError, ObservationHandle},
    keepalive::{Keepalive, KeepaliveOptions, KeepaliveTransport, PingOutcome},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    AlreadyPublished,
}

struct Published {
    ins_id: u64,
    observation: Option<Box<dyn ObservationHandle>>,
}

/// Keyed by `(deviceID, href)`. A `BTreeMap` of `BTreeMap`s keeps iteration
/// order stable for tests and for the `unpublishResource("")` remove-all
/// path, without pulling in a second hashing dependency alongside
/// `ahash` (used by [`crate::session_container::SessionContainer`] for the
/// larger peer-address table).
type PublishedResources = BTreeMap<String, BTreeMap<String, Published>>;

struct KeepaliveAdapter(Arc<dyn DeviceLink>);

#[async_trait::async_trait]
impl KeepaliveTransport for KeepaliveAdapter {
    async fn ping(&self, deadline: Duration) -> PingOutcome {
        self.0.ping(deadline).await
    }

    async fn close(&self) {
        self.0.close().await
    }
}

/// Per-connection state (spec §3, §4.4): authenticated device identity once
/// logged in, the set of published resources keyed by href, and an owned
/// Keepalive. All mutation of `published` is serialized by `mutex`, never
/// held across device I/O.
pub struct Session {
    pub peer_address: SocketAddr,
    link: Arc<dyn DeviceLink>,
    device_id: Mutex<Option<String>>,
    published: Mutex<PublishedResources>,
    next_ins_id: AtomicU64,
    keepalive: Keepalive,
}

impl Session {
    pub fn new(peer_address: SocketAddr, link: Arc<dyn DeviceLink>, options: KeepaliveOptions) -> Arc<Self> {
        let keepalive = Keepalive::spawn(KeepaliveAdapter(link.clone()), options);
        Arc::new(Self {
            peer_address,
            link,
            device_id: Mutex::new(None),
            published: Mutex::new(BTreeMap::new()),
            next_ins_id: AtomicU64::new(0),
            keepalive,
        })
    }

    pub fn device_id(&self) -> Option<String> {
        self.device_id.lock().clone()
    }

    /// Binds this session to `device_id` on successful session-login (spec
    /// §3, Session lifecycle).
    pub fn set_device_id(&self, device_id: String) {
        *self.device_id.lock() = Some(device_id);
    }

    pub fn keepalive_state(&self) -> crate::keepalive::KeepaliveState {
        self.keepalive.state()
    }

    /// Publishes `href` under `device_id`, assigning the next monotonic
    /// `insID` for this session. If `observable`, establishes a CoAP
    /// OBSERVE and stores the handle alongside the map entry so removal
    /// and cancellation happen together; otherwise fires a single
    /// fire-and-forget GET.
    ///
    /// Fails with [`SessionError::AlreadyPublished`] if `(device_id, href)`
    /// is already present — the first concurrent publisher for the same
    /// key always wins (spec §4.4).
    pub async fn publish_resource(
        &self,
        device_id: &str,
        href: &str,
        observable: bool,
    ) -> Result<u64, SessionError> {
        {
            let published = self.published.lock();
            if published.get(device_id).is_some_and(|links| links.contains_key(href)) {
                return Err(SessionError::AlreadyPublished);
            }
        }

        let observation = if observable {
            match self.link.observe(href).await {
                Ok(handle) => Some(handle),
                Err(LinkError::Timeout) | Err(LinkError::Transport(_)) => None,
            }
        } else {
            self.link.get(href).await;
            None
        };

        let ins_id = self.next_ins_id.fetch_add(1, Ordering::SeqCst);

        let mut published = self.published.lock();
        // Re-check under lock: two concurrent publishers for the same key
        // raced past the first check above; the first to reach this
        // critical section wins deterministically.
        if published.get(device_id).is_some_and(|links| links.contains_key(href)) {
            if let Some(handle) = observation {
                handle.cancel();
            }
            return Err(SessionError::AlreadyPublished);
        }

        published
            .entry(device_id.to_string())
            .or_default()
            .insert(href.to_string(), Published { ins_id, observation });

        Ok(ins_id)
    }

    /// Removes resources for `device_id`. An empty `ins_ids` removes all of
    /// them; otherwise only the matching `insID`s are removed and unknown
    /// ones are reported. Cancels observations before dropping the entry.
    pub fn unpublish_resource(&self, device_id: &str, ins_ids: &[u64]) -> Result<(), Vec<u64>> {
        let mut published = self.published.lock();
        let Some(links) = published.get_mut(device_id) else {
            return Err(ins_ids.to_vec());
        };

        if ins_ids.is_empty() {
            for (_, entry) in links.iter() {
                if let Some(handle) = &entry.observation {
                    handle.cancel();
                }
            }
            published.remove(device_id);
            return Ok(());
        }

        let mut missing = Vec::new();
        for &ins_id in ins_ids {
            let href = links.iter().find(|(_, e)| e.ins_id == ins_id).map(|(h, _)| h.clone());
            match href {
                Some(href) => {
                    if let Some(entry) = links.remove(&href) {
                        if let Some(handle) = entry.observation {
                            handle.cancel();
                        }
                    }
                }
                None => missing.push(ins_id),
            }
        }

        if links.is_empty() {
            published.remove(device_id);
        }

        if missing.is_empty() { Ok(()) } else { Err(missing) }
    }

    /// Cancels the keepalive and every outstanding observation, then
    /// clears state. Idempotent: calling it twice is a no-op the second
    /// time.
    pub async fn close(&self) {
        self.keepalive.stop().await;

        let mut published = self.published.lock();
        for (_, links) in published.iter() {
            for (_, entry) in links.iter() {
                if let Some(handle) = &entry.observation {
                    handle.cancel();
                }
            }
        }
        published.clear();
    }

    pub async fn post(&self, href: &str, body: &[u8], deadline: Duration) -> Result<bytes::Bytes, LinkError> {
        self.link.post(href, body, deadline).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    use super::*;

    struct FakeLink {
        observed: Mutex<Vec<String>>,
        cancelled: Arc<AtomicBool>,
    }

    struct FakeObservation(Arc<AtomicBool>);
    impl ObservationHandle for FakeObservation {
        fn cancel(&self) {
            self.0.store(true, AtomicOrdering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl DeviceLink for FakeLink {
        async fn observe(&self, href: &str) -> Result<Box<dyn ObservationHandle>, LinkError> {
            self.observed.lock().push(href.to_string());
            Ok(Box::new(FakeObservation(self.cancelled.clone())))
        }

        async fn get(&self, _href: &str) {}

        async fn post(&self, _href: &str, _body: &[u8], _deadline: Duration) -> Result<bytes::Bytes, LinkError> {
            Ok(bytes::Bytes::new())
        }

        async fn ping(&self, _deadline: Duration) -> PingOutcome {
            PingOutcome::Success
        }

        async fn close(&self) {}
    }

    fn session() -> Arc<Session> {
        let link = Arc::new(FakeLink { observed: Mutex::new(vec![]), cancelled: Arc::new(AtomicBool::new(false)) });
        Session::new("127.0.0.1:0".parse().unwrap(), link, KeepaliveOptions::default())
    }

    #[tokio::test]
    async fn publish_assigns_strictly_increasing_ins_ids() {
        let session = session();
        let ins0 = session.publish_resource("a", "/a", false).await.unwrap();
        let ins1 = session.publish_resource("a", "/b", false).await.unwrap();
        let ins2 = session.publish_resource("b", "/c", true).await.unwrap();

        assert_eq!((ins0, ins1, ins2), (0, 1, 2));
    }

    #[tokio::test]
    async fn republishing_same_href_fails() {
        let session = session();
        session.publish_resource("a", "/a", false).await.unwrap();
        assert_eq!(
            session.publish_resource("a", "/a", false).await,
            Err(SessionError::AlreadyPublished)
        );
    }

    #[tokio::test]
    async fn unpublish_unknown_ins_reports_missing() {
        let session = session();
        session.publish_resource("b", "/c", true).await.unwrap();

        assert_eq!(session.unpublish_resource("b", &[5]), Err(vec![5]));
        assert_eq!(session.unpublish_resource("b", &[0]), Ok(()));
    }

    #[tokio::test]
    async fn unpublish_all_cancels_every_observation() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let link = Arc::new(FakeLink { observed: Mutex::new(vec![]), cancelled: cancelled.clone() });
        let session = Session::new("127.0.0.1:0".parse().unwrap(), link, KeepaliveOptions::default());

        session.publish_resource("a", "/a", true).await.unwrap();
        session.unpublish_resource("a", &[]).unwrap();

        assert!(cancelled.load(AtomicOrdering::SeqCst));
    }
}
