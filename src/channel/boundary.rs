//! Boundary seam to the embedded sandboxed mediator context
//!
//! A [`Boundary`] mounts the isolated context the mediator runs in and
//! hands back a [`BoundaryLink`]: an inbound frame receiver and an
//! outbound sender. The receiver exists (and buffers) before the context
//! is allowed to initialize, so an early readiness signal is never lost —
//! implementations must uphold that ordering, it is not incidental.

use crate::error::Result;
use crate::protocol::MediatorMessage;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const FRAME_BUFFER: usize = 64;

/// One raw frame received across the boundary
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Identity of the sender; checked against the expected peer before
    /// the payload is inspected
    pub origin: String,
    pub payload: String,
}

/// A mounted boundary: one peer, one frame stream each way
pub struct BoundaryLink {
    /// The only origin frames are accepted from
    pub peer: String,
    pub inbound: mpsc::Receiver<InboundFrame>,
    pub outbound: mpsc::Sender<String>,
}

/// The embedded sandboxed context hosting the mediator
#[async_trait]
pub trait Boundary: Send + Sync {
    /// Create and mount the context against the mediator endpoint
    async fn mount(&self, endpoint: &str) -> Result<BoundaryLink>;

    /// Surface the context's container so the user can interact with it
    /// (storage-access grants)
    fn reveal(&self) {}

    /// Tear the context down; must be safe to call repeatedly
    fn unmount(&self) {}
}

/// Sender half handed to an in-process mediator
#[derive(Clone)]
pub struct LoopbackPeer {
    origin: String,
    tx: mpsc::Sender<InboundFrame>,
}

impl LoopbackPeer {
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Send a raw frame under the mediator's own origin
    pub async fn send_raw(&self, payload: impl Into<String>) -> bool {
        self.send_from(self.origin.clone(), payload).await
    }

    /// Send a frame claiming an arbitrary origin (for harnesses exercising
    /// the source-identity check)
    pub async fn send_from(&self, origin: impl Into<String>, payload: impl Into<String>) -> bool {
        self.tx
            .send(InboundFrame {
                origin: origin.into(),
                payload: payload.into(),
            })
            .await
            .is_ok()
    }

    /// Serialize and send a protocol message
    pub async fn send(&self, msg: &MediatorMessage) -> bool {
        match serde_json::to_string(msg) {
            Ok(payload) => self.send_raw(payload).await,
            Err(_) => false,
        }
    }
}

type LoopbackHandler = dyn Fn(mpsc::Receiver<String>, LoopbackPeer) + Send + Sync;

/// In-process boundary for embedded mediators and test harnesses
///
/// Each `mount` invokes the handler with the outbound stream and a
/// [`LoopbackPeer`]; the handler typically spawns a task impersonating the
/// mediator. `reveal` calls are counted so harnesses can assert the
/// storage-access path ran.
pub struct LoopbackBoundary {
    origin: String,
    handler: Box<LoopbackHandler>,
    revealed: AtomicUsize,
}

impl LoopbackBoundary {
    pub fn new(
        origin: impl Into<String>,
        handler: impl Fn(mpsc::Receiver<String>, LoopbackPeer) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            origin: origin.into(),
            handler: Box::new(handler),
            revealed: AtomicUsize::new(0),
        })
    }

    /// How many times the container was surfaced
    pub fn revealed_count(&self) -> usize {
        self.revealed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Boundary for LoopbackBoundary {
    async fn mount(&self, _endpoint: &str) -> Result<BoundaryLink> {
        let (in_tx, in_rx) = mpsc::channel(FRAME_BUFFER);
        let (out_tx, out_rx) = mpsc::channel(FRAME_BUFFER);

        let peer = LoopbackPeer {
            origin: self.origin.clone(),
            tx: in_tx,
        };
        // The link's receiver is live before the handler runs: frames the
        // mediator emits while "initializing" are buffered, not lost.
        (self.handler)(out_rx, peer);

        Ok(BoundaryLink {
            peer: self.origin.clone(),
            inbound: in_rx,
            outbound: out_tx,
        })
    }

    fn reveal(&self) {
        self.revealed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_frames_buffered_before_first_read() {
        let boundary = LoopbackBoundary::new("https://m.test", |_out, peer| {
            tokio::spawn(async move {
                peer.send(&MediatorMessage::Ready).await;
            });
        });

        let mut link = boundary.mount("https://m.test").await.unwrap();
        // Sent before anyone polled the receiver; still delivered.
        let frame = link.inbound.recv().await.unwrap();
        assert_eq!(frame.origin, "https://m.test");
        assert_eq!(frame.payload, r#"{"type":"ready"}"#);
    }

    #[tokio::test]
    async fn test_loopback_spoofed_origin_carried_through() {
        let boundary = LoopbackBoundary::new("https://m.test", |_out, peer| {
            tokio::spawn(async move {
                peer.send_from("https://evil.test", "{}").await;
            });
        });

        let mut link = boundary.mount("https://m.test").await.unwrap();
        let frame = link.inbound.recv().await.unwrap();
        assert_eq!(frame.origin, "https://evil.test");
        assert_ne!(frame.origin, link.peer);
    }

    #[tokio::test]
    async fn test_loopback_reveal_counted() {
        let boundary = LoopbackBoundary::new("https://m.test", |_out, _peer| {});
        assert_eq!(boundary.revealed_count(), 0);
        boundary.reveal();
        boundary.reveal();
        assert_eq!(boundary.revealed_count(), 2);
    }

    #[tokio::test]
    async fn test_loopback_outbound_reaches_handler() {
        let (seen_tx, mut seen_rx) = mpsc::channel(1);
        let boundary = LoopbackBoundary::new("https://m.test", move |mut out, _peer| {
            let seen_tx = seen_tx.clone();
            tokio::spawn(async move {
                if let Some(raw) = out.recv().await {
                    let _ = seen_tx.send(raw).await;
                }
            });
        });

        let link = boundary.mount("https://m.test").await.unwrap();
        link.outbound.send("ping".to_string()).await.unwrap();
        assert_eq!(seen_rx.recv().await.unwrap(), "ping");
    }
}
