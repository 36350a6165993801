//! The [`gateway_core::DeviceLink`] implementation for a live CoAP-over-TCP
//! connection: frames are read on a background task and dispatched to
//! whichever in-flight request owns the matching token.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rand::RngCore;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{mpsc, oneshot},
    time::timeout,
};

use gateway_core::{DeviceLink, LinkError, ObservationHandle, PingOutcome};
use wire::{code::Code, message::Message};

type Reader = Box<dyn AsyncRead + Unpin + Send>;
type Writer = Box<dyn AsyncWrite + Unpin + Send>;

struct Pending {
    waiters: Mutex<HashMap<Bytes, oneshot::Sender<Message>>>,
}

struct Inner {
    writer: tokio::sync::Mutex<Writer>,
    pending: Arc<Pending>,
    closed: Arc<AtomicBool>,
}

/// A live CoAP-over-TCP connection to one device (spec §3 `clientCommander`).
/// Unsolicited messages — a notification whose token no longer matches an
/// in-flight request, or any frame with no waiter — are logged and dropped
/// (spec §4.6). Cheap to clone: it is an `Arc` around the connection state,
/// which lets an [`ObservationHandle`] hold its own owning reference back to
/// the link it was issued from.
#[derive(Clone)]
pub struct TcpDeviceLink(Arc<Inner>);

/// Requests the device itself initiates (`/oic/rd` and friends), handed to
/// the per-connection request loop in [`crate::server`] for dispatch.
pub type Inbound = mpsc::Receiver<Message>;

impl TcpDeviceLink {
    /// Spawns the background read loop and returns the link plus the
    /// channel of device-initiated requests (as opposed to responses to
    /// requests this link sent, which the read loop resolves internally).
    pub fn spawn(reader: Reader, writer: Writer) -> (Self, Inbound) {
        let pending = Arc::new(Pending { waiters: Mutex::new(HashMap::new()) });
        let closed = Arc::new(AtomicBool::new(false));
        let (inbound_tx, inbound_rx) = mpsc::channel(32);

        tokio::spawn(read_loop(reader, pending.clone(), closed.clone(), inbound_tx));

        (Self(Arc::new(Inner { writer: tokio::sync::Mutex::new(writer), pending, closed })), inbound_rx)
    }

    /// Writes a response to a device-initiated request (the counterpart to
    /// the requests dispatched from [`Inbound`]).
    pub async fn respond(&self, response: Message) -> Result<(), LinkError> {
        self.0
            .writer
            .lock()
            .await
            .write_all(&response.encode())
            .await
            .map_err(|_| LinkError::Transport("write failed".into()))
    }

    fn random_token() -> Bytes {
        let mut buf = [0u8; 4];
        rand::rng().fill_bytes(&mut buf);
        Bytes::copy_from_slice(&buf)
    }

    async fn exchange(&self, message: Message, deadline: Duration) -> Result<Message, LinkError> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Transport("connection closed".into()));
        }

        let (tx, rx) = oneshot::channel();
        self.0.pending.waiters.lock().insert(message.token.clone(), tx);

        let encoded = message.encode();
        if self.0.writer.lock().await.write_all(&encoded).await.is_err() {
            self.0.pending.waiters.lock().remove(&message.token);
            return Err(LinkError::Transport("write failed".into()));
        }

        match timeout(deadline, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(LinkError::Transport("connection closed".into())),
            Err(_) => {
                self.0.pending.waiters.lock().remove(&message.token);
                Err(LinkError::Timeout)
            }
        }
    }

    /// Fire-and-forget variant used by `get` and observation teardown: the
    /// caller does not wait on the response.
    fn dispatch_detached(&self, message: Message) {
        let link = self.clone();
        tokio::spawn(async move {
            let _ = link.exchange(message, Duration::from_secs(5)).await;
        });
    }
}

async fn read_loop(
    mut reader: Reader,
    pending: Arc<Pending>,
    closed: Arc<AtomicBool>,
    inbound: mpsc::Sender<Message>,
) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut scratch = [0u8; 4096];

    loop {
        match reader.read(&mut scratch).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&scratch[..n]),
        }

        loop {
            match Message::decode(&buf) {
                Ok((message, used)) => {
                    let _ = buf.split_to(used);

                    if message.code.is_request() {
                        if inbound.send(message).await.is_err() {
                            return;
                        }
                        continue;
                    }

                    match pending.waiters.lock().remove(&message.token) {
                        Some(tx) => {
                            let _ = tx.send(message);
                        }
                        None => log::debug!("dropping unsolicited CoAP message code={:?}", message.code),
                    }
                }
                Err(wire::Error::Truncated) => break,
                Err(err) => {
                    log::warn!("dropping unparseable CoAP frame: {err}");
                    buf.clear();
                    break;
                }
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
}

struct Observation {
    link: TcpDeviceLink,
    token: Bytes,
    href: String,
}

impl ObservationHandle for Observation {
    fn cancel(&self) {
        let deregister = Message::new(Code::Get)
            .with_token(TcpDeviceLink::random_token())
            .with_observe(1)
            .with_path(&self.href);
        self.link.dispatch_detached(deregister);
        self.link.0.pending.waiters.lock().remove(&self.token);
    }
}

#[async_trait::async_trait]
impl DeviceLink for TcpDeviceLink {
    async fn observe(&self, href: &str) -> Result<Box<dyn ObservationHandle>, LinkError> {
        let token = Self::random_token();
        let request =
            Message::new(Code::Get).with_token(token.clone()).with_observe(0).with_path(href);

        self.exchange(request, Duration::from_secs(5)).await?;

        Ok(Box::new(Observation { link: self.clone(), token, href: href.to_string() }))
    }

    async fn get(&self, href: &str) {
        let request = Message::new(Code::Get).with_token(Self::random_token()).with_path(href);
        self.dispatch_detached(request);
    }

    async fn post(&self, href: &str, body: &[u8], deadline: Duration) -> Result<Bytes, LinkError> {
        let request = Message::new(Code::Post)
            .with_token(Self::random_token())
            .with_path(href)
            .with_payload(Bytes::copy_from_slice(body));

        let response = self.exchange(request, deadline).await?;
        Ok(response.payload)
    }

    async fn ping(&self, deadline: Duration) -> PingOutcome {
        let request = Message::new(Code::Ping).with_token(Self::random_token());
        match self.exchange(request, deadline).await {
            Ok(response) if response.code == Code::Pong => PingOutcome::Success,
            Ok(_) => PingOutcome::TransportError,
            Err(LinkError::Timeout) => PingOutcome::Timeout,
            Err(LinkError::Transport(_)) => PingOutcome::TransportError,
        }
    }

    async fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
        let _ = self.0.writer.lock().await.shutdown().await;
    }
}
