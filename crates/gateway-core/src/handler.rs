use std::time::Duration;

use bytes::Bytes;

use crate::keepalive::PingOutcome;

#[derive(Debug)]
pub enum LinkError {
    Timeout,
    Transport(String),
}

/// A live CoAP connection to one device, as seen by the session/keepalive
/// state machine. This is the seam a real TCP/TLS connection implements;
/// tests substitute an in-memory fake so the resource-directory and
/// keepalive logic can run without sockets.
#[async_trait::async_trait]
pub trait DeviceLink: Send + Sync {
    /// Issues a CoAP OBSERVE on `href`, returning a handle that cancels the
    /// observation when dropped or explicitly cancelled.
    async fn observe(&self, href: &str) -> Result<Box<dyn ObservationHandle>, LinkError>;

    /// Fires a single, fire-and-forget GET on `href` (the non-observable
    /// publish path, spec §4.4).
    async fn get(&self, href: &str);

    /// Issues a synchronous CoAP POST with a per-call deadline (used by the
    /// Request Router, spec §4.8 step 3).
    async fn post(&self, href: &str, body: &[u8], deadline: Duration) -> Result<Bytes, LinkError>;

    async fn ping(&self, deadline: Duration) -> PingOutcome;

    async fn close(&self);
}

/// A cancel-on-drop observation handle. Design Note: the handle lives
/// alongside its map entry in [`crate::session::Session`] rather than in a
/// side table, so removing the entry and cancelling the observation are
/// one operation.
pub trait ObservationHandle: Send + Sync {
    fn cancel(&self);
}
