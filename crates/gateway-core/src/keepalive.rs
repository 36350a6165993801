use std::time::Duration;

use tokio::sync::mpsc;

/// Outcome of a single PING attempt, as reported by the owning connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    Success,
    Timeout,
    TransportError,
}

/// What the connection must be able to do on behalf of a Keepalive: send a
/// PING with a deadline and report back, and tear the connection down when
/// the FSM gives up.
#[async_trait::async_trait]
pub trait KeepaliveTransport: Send + Sync {
    async fn ping(&self, deadline: Duration) -> PingOutcome;
    async fn close(&self);
}

/// The three states of the per-session liveness FSM (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveState {
    Idle,
    Pinging,
    Dead,
}

#[derive(Debug, Clone, Copy)]
pub struct KeepaliveOptions {
    pub idle: Duration,
    pub interval: Duration,
    pub retry: u32,
    pub ping_deadline: Duration,
}

impl Default for KeepaliveOptions {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(30),
            interval: Duration::from_secs(10),
            retry: 3,
            ping_deadline: Duration::from_secs(1),
        }
    }
}

/// A handle to a running Keepalive task. Dropping it does not stop the
/// task; call [`Keepalive::stop`] explicitly, mirroring the `Done()`
/// signal of the source implementation.
pub struct Keepalive {
    done_tx: mpsc::Sender<()>,
    state_rx: tokio::sync::watch::Receiver<KeepaliveState>,
}

impl Keepalive {
    /// Spawns the FSM loop: waits `idle`, then pings every `interval` until
    /// `retry` consecutive timeouts transition it to `Dead` and close the
    /// transport, or a non-timeout transport error does the same
    /// immediately, or a `stop()` signal arrives first.
    pub fn spawn(transport: impl KeepaliveTransport + 'static, options: KeepaliveOptions) -> Self {
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
        let (state_tx, state_rx) = tokio::sync::watch::channel(KeepaliveState::Idle);

        tokio::spawn(async move {
            let mut wait = options.idle;
            let mut timeouts = 0u32;

            loop {
                tokio::select! {
                    _ = done_rx.recv() => return,
                    _ = tokio::time::sleep(wait) => {}
                }

                let _ = state_tx.send(KeepaliveState::Pinging);
                match transport.ping(options.ping_deadline).await {
                    PingOutcome::Success => {
                        timeouts = 0;
                        wait = options.idle;
                        let _ = state_tx.send(KeepaliveState::Idle);
                    }
                    PingOutcome::Timeout => {
                        timeouts += 1;
                        if timeouts >= options.retry {
                            let _ = state_tx.send(KeepaliveState::Dead);
                            transport.close().await;
                            return;
                        }
                        wait = options.interval;
                    }
                    PingOutcome::TransportError => {
                        let _ = state_tx.send(KeepaliveState::Dead);
                        return;
                    }
                }
            }
        });

        Self { done_tx, state_rx }
    }

    /// Signals the FSM task to stop without closing the transport (used on
    /// a clean session close, where the caller is already tearing the
    /// connection down).
    pub async fn stop(&self) {
        let _ = self.done_tx.send(()).await;
    }

    pub fn state(&self) -> KeepaliveState {
        *self.state_rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    struct NeverReplies {
        pings: AtomicU32,
    }

    #[async_trait::async_trait]
    impl KeepaliveTransport for Arc<NeverReplies> {
        async fn ping(&self, _deadline: Duration) -> PingOutcome {
            self.pings.fetch_add(1, Ordering::SeqCst);
            PingOutcome::Timeout
        }

        async fn close(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn dies_after_retry_consecutive_timeouts() {
        let transport = Arc::new(NeverReplies { pings: AtomicU32::new(0) });
        let options = KeepaliveOptions {
            idle: Duration::from_secs(1),
            interval: Duration::from_secs(1),
            retry: 3,
            ping_deadline: Duration::from_secs(1),
        };
        let keepalive = Keepalive::spawn(transport.clone(), options);

        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;

        assert_eq!(keepalive.state(), KeepaliveState::Dead);
        assert_eq!(transport.pings.load(Ordering::SeqCst), 3);
    }
}
