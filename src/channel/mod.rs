//! Mediator transport channel
//!
//! One `Channel` owns one boundary connection, its pending-request table,
//! and its granted-capability set; none of that state is shared between
//! channels. Lifecycle is `disconnected → connecting → connected`, with
//! `connecting` guarded against re-entry.

mod boundary;
mod correlator;
mod webtransport;

pub use boundary::{Boundary, BoundaryLink, InboundFrame, LoopbackBoundary, LoopbackPeer};
pub use webtransport::WebTransportBoundary;

use crate::caps::{Capability, CapabilitySet};
use crate::config::ChannelConfig;
use crate::error::{Result, ValetError};
use crate::negotiate::ApprovalSurface;
use crate::protocol::{AppMessage, LogRecord, MediatorMessage, Page, PROTOCOL_VERSION};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use correlator::Correlator;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No boundary mounted
    Disconnected,
    /// Mounting, waiting for readiness, or handshaking
    Connecting,
    /// Handshake complete; requests may be issued
    Connected,
}

/// Channel to a mediator across the sandbox boundary
///
/// Cheaply cloneable; clones share the same connection.
#[derive(Clone)]
pub struct Channel {
    pub(crate) inner: Arc<ChannelInner>,
}

pub(crate) struct ChannelInner {
    pub(crate) config: ChannelConfig,
    boundary: Arc<dyn Boundary>,
    pub(crate) surface: Arc<dyn ApprovalSurface>,
    state: watch::Sender<ChannelState>,
    state_rx: watch::Receiver<ChannelState>,
    pub(crate) granted: Mutex<CapabilitySet>,
    correlator: Correlator,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl Channel {
    /// Create a disconnected channel over the given boundary
    pub fn new(
        config: ChannelConfig,
        boundary: Arc<dyn Boundary>,
        surface: Arc<dyn ApprovalSurface>,
    ) -> Self {
        let (state, state_rx) = watch::channel(ChannelState::Disconnected);
        Self {
            inner: Arc::new(ChannelInner {
                config,
                boundary,
                surface,
                state,
                state_rx,
                granted: Mutex::new(CapabilitySet::new()),
                correlator: Correlator::new(),
                outbound: Mutex::new(None),
                shutdown: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state_rx.borrow()
    }

    /// Receiver for state changes
    pub fn state_receiver(&self) -> watch::Receiver<ChannelState> {
        self.inner.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Capabilities currently granted on this connection
    pub fn granted_capabilities(&self) -> CapabilitySet {
        self.inner.granted.lock().clone()
    }

    /// Mount the sandboxed context and complete the versioned handshake
    pub async fn connect(&self) -> Result<()> {
        // Guard re-entry atomically: a concurrent connect fails, it does
        // not queue
        let mut entered = false;
        self.inner.state.send_if_modified(|state| {
            if *state == ChannelState::Disconnected {
                *state = ChannelState::Connecting;
                entered = true;
                true
            } else {
                false
            }
        });
        if !entered {
            return Err(ValetError::Connection(format!(
                "cannot connect in state: {:?}",
                self.state()
            )));
        }

        match self.inner.establish().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.teardown();
                Err(e)
            }
        }
    }

    /// Tear everything down: unmount the context, reject outstanding
    /// requests, clear the granted set. Safe from any state, any number
    /// of times.
    pub fn disconnect(&self) {
        self.inner.teardown();
    }

    /// Get a key/value entry (requires `kv:read`)
    pub async fn kv_get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.ensure_granted(Capability::KvRead)?;
        let key = key.to_string();
        match self.inner.request(|id| AppMessage::KvGet { id, key }).await? {
            MediatorMessage::KvValue { value, .. } => Ok(value),
            other => Err(unexpected("kv_get", &other)),
        }
    }

    /// Set a key/value entry (requires `kv:write`)
    pub async fn kv_put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.ensure_granted(Capability::KvWrite)?;
        let key = key.to_string();
        match self
            .inner
            .request(|id| AppMessage::KvPut { id, key, value })
            .await?
        {
            MediatorMessage::KvOk { .. } => Ok(()),
            other => Err(unexpected("kv_put", &other)),
        }
    }

    /// Delete a key/value entry (requires `kv:write`)
    pub async fn kv_delete(&self, key: &str) -> Result<()> {
        self.ensure_granted(Capability::KvWrite)?;
        let key = key.to_string();
        match self
            .inner
            .request(|id| AppMessage::KvDelete { id, key })
            .await?
        {
            MediatorMessage::KvOk { .. } => Ok(()),
            other => Err(unexpected("kv_delete", &other)),
        }
    }

    /// Fetch a blob (requires `blob:read`)
    pub async fn blob_get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_granted(Capability::BlobRead)?;
        let name = name.to_string();
        match self
            .inner
            .request(|id| AppMessage::BlobGet { id, name })
            .await?
        {
            MediatorMessage::Blob { data: None, .. } => Ok(None),
            MediatorMessage::Blob {
                data: Some(data), ..
            } => {
                let bytes = URL_SAFE_NO_PAD
                    .decode(data)
                    .map_err(|e| ValetError::Transport(format!("undecodable blob: {e}")))?;
                Ok(Some(bytes))
            }
            other => Err(unexpected("blob_get", &other)),
        }
    }

    /// Store a blob (requires `blob:write`)
    pub async fn blob_put(&self, name: &str, data: &[u8]) -> Result<()> {
        self.ensure_granted(Capability::BlobWrite)?;
        let name = name.to_string();
        let data = URL_SAFE_NO_PAD.encode(data);
        match self
            .inner
            .request(|id| AppMessage::BlobPut { id, name, data })
            .await?
        {
            MediatorMessage::BlobOk { .. } => Ok(()),
            other => Err(unexpected("blob_put", &other)),
        }
    }

    /// Read a log page through the mediator (requires `log:read`)
    pub async fn log_read(&self, after: Option<u64>, limit: Option<u32>) -> Result<Page> {
        self.ensure_granted(Capability::LogRead)?;
        match self
            .inner
            .request(|id| AppMessage::LogRead {
                id,
                token: None,
                after,
                limit,
                include_deleted: false,
            })
            .await?
        {
            MediatorMessage::LogPage {
                records, has_more, ..
            } => Ok(Page { records, has_more }),
            other => Err(unexpected("log_read", &other)),
        }
    }

    /// Append to the log through the mediator (requires `log:append`)
    pub async fn log_append(&self, payload: serde_json::Value) -> Result<LogRecord> {
        self.ensure_granted(Capability::LogAppend)?;
        match self
            .inner
            .request(|id| AppMessage::LogAppend {
                id,
                token: None,
                payload,
            })
            .await?
        {
            MediatorMessage::Record { record, .. } => Ok(record),
            other => Err(unexpected("log_append", &other)),
        }
    }

    /// Consult (never mutate) the granted set before a gated operation
    fn ensure_granted(&self, cap: Capability) -> Result<()> {
        if !self.is_connected() {
            return Err(ValetError::NotConnected);
        }
        if self.inner.granted.lock().contains(cap) {
            Ok(())
        } else {
            Err(ValetError::PermissionDenied {
                capability: cap.to_string(),
            })
        }
    }
}

impl ChannelInner {
    fn set_state(&self, state: ChannelState) {
        let _ = self.state.send(state);
    }

    async fn establish(self: &Arc<Self>) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.config.connect_timeout;
        let mut link = self.boundary.mount(&self.config.endpoint).await?;

        // Wait for the context's explicit readiness signal. A storage-access
        // demand is a valid intermediate state: surface the container and
        // keep waiting, still bounded by the same deadline.
        loop {
            let frame = recv_frame(&mut link, deadline, "mediator readiness").await?;
            match serde_json::from_str::<MediatorMessage>(&frame.payload) {
                Ok(MediatorMessage::Ready) => break,
                Ok(MediatorMessage::StorageAccessRequired) => {
                    info!("mediator requires a storage-access gesture; surfacing container");
                    self.boundary.reveal();
                }
                Ok(other) => debug!(?other, "frame before readiness ignored"),
                Err(e) => warn!(error = %e, "unparseable frame before readiness"),
            }
        }

        // Versioned handshake
        let hello_id = Uuid::new_v4().to_string();
        let hello = AppMessage::Hello {
            id: hello_id.clone(),
            version: PROTOCOL_VERSION.to_string(),
        };
        link.outbound
            .send(serde_json::to_string(&hello)?)
            .await
            .map_err(|_| ValetError::Connection("boundary closed during handshake".into()))?;

        let granted = loop {
            let frame = recv_frame(&mut link, deadline, "handshake acknowledge").await?;
            match serde_json::from_str::<MediatorMessage>(&frame.payload) {
                Ok(MediatorMessage::Ack {
                    id,
                    version,
                    granted,
                }) if id == hello_id => {
                    debug!(version = %version, "handshake acknowledged");
                    break granted;
                }
                Ok(MediatorMessage::Error { id, code, message }) if id == hello_id => {
                    return Err(ValetError::Handshake(format!("{code}: {message}")));
                }
                Ok(other) if other.id() == Some(hello_id.as_str()) => {
                    return Err(ValetError::Handshake(
                        "unexpected response to hello".to_string(),
                    ));
                }
                Ok(other) => debug!(?other, "frame during handshake ignored"),
                Err(e) => warn!(error = %e, "unparseable frame during handshake"),
            }
        };

        // Absent grant list in the acknowledge means an empty set
        self.granted.lock().replace(granted);
        *self.outbound.lock() = Some(link.outbound.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown.lock() = Some(shutdown_tx);

        let inner = self.clone();
        tokio::spawn(pump(inner, link, shutdown_rx));

        self.set_state(ChannelState::Connected);
        info!(endpoint = %self.config.endpoint, "connected to mediator");
        Ok(())
    }

    /// Issue one correlated request and await its response
    pub(crate) async fn request(
        &self,
        build: impl FnOnce(String) -> AppMessage,
    ) -> Result<MediatorMessage> {
        if *self.state_rx.borrow() != ChannelState::Connected {
            return Err(ValetError::NotConnected);
        }

        let (id, rx) = self.correlator.register();
        let payload = serde_json::to_string(&build(id.clone()))?;

        let tx = self
            .outbound
            .lock()
            .clone()
            .ok_or(ValetError::NotConnected)?;
        if tx.send(payload).await.is_err() {
            self.correlator.forget(&id);
            return Err(ValetError::ConnectionClosed);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ValetError::ConnectionClosed),
            Err(_) => {
                self.correlator.forget(&id);
                Err(ValetError::Timeout)
            }
        }
    }

    fn handle_payload(&self, payload: &str) {
        match serde_json::from_str::<MediatorMessage>(payload) {
            Ok(msg) => match msg.id() {
                Some(id) => {
                    let id = id.to_string();
                    if !self.correlator.complete(&id, msg) {
                        debug!(id = %id, "response with no matching pending request");
                    }
                }
                None => debug!("control frame while connected ignored"),
            },
            Err(e) => warn!(error = %e, "failed to parse mediator message"),
        }
    }

    pub(crate) fn teardown(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
        *self.outbound.lock() = None;
        self.boundary.unmount();
        self.correlator.drain(|| ValetError::ConnectionClosed);
        self.granted.lock().clear();
        self.set_state(ChannelState::Disconnected);
    }
}

async fn recv_frame(
    link: &mut BoundaryLink,
    deadline: tokio::time::Instant,
    waiting_for: &str,
) -> Result<InboundFrame> {
    loop {
        let frame = tokio::time::timeout_at(deadline, link.inbound.recv())
            .await
            .map_err(|_| ValetError::Connection(format!("timed out waiting for {waiting_for}")))?
            .ok_or_else(|| {
                ValetError::Connection(format!("boundary closed waiting for {waiting_for}"))
            })?;
        if frame.origin != link.peer {
            warn!(origin = %frame.origin, "dropping frame from unexpected origin");
            continue;
        }
        return Ok(frame);
    }
}

/// Routes inbound frames for the lifetime of one connection; exactly one
/// pump per connection, torn down with it
async fn pump(
    inner: Arc<ChannelInner>,
    mut link: BoundaryLink,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            frame = link.inbound.recv() => match frame {
                Some(frame) => {
                    if frame.origin != link.peer {
                        warn!(origin = %frame.origin, "dropping frame from unexpected origin");
                        continue;
                    }
                    inner.handle_payload(&frame.payload);
                }
                None => {
                    debug!("boundary closed by peer");
                    inner.teardown();
                    break;
                }
            },
            _ = &mut shutdown_rx => break,
        }
    }
}

pub(crate) fn unexpected(op: &str, msg: &MediatorMessage) -> ValetError {
    ValetError::Transport(format!("unexpected response to {op}: {msg:?}"))
}
