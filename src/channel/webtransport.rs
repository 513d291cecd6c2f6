//! WebTransport boundary implementation
//!
//! Mounts the sandboxed mediator context as a WebTransport session: one
//! bidirectional stream, JSON frames. The session endpoint is the only
//! origin, so every inbound frame carries it.

use super::boundary::{Boundary, BoundaryLink, InboundFrame};
use crate::error::{Result, ValetError};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use wtransport::endpoint::endpoint_side::Client;
use wtransport::{ClientConfig, Connection, Endpoint, VarInt};

const FRAME_BUFFER: usize = 64;
const READ_BUFFER: usize = 65536;

/// Boundary that reaches the mediator over WebTransport
pub struct WebTransportBoundary {
    dangerous_skip_cert_verify: bool,
    connection: Mutex<Option<Connection>>,
}

impl WebTransportBoundary {
    pub fn new() -> Self {
        Self {
            dangerous_skip_cert_verify: false,
            connection: Mutex::new(None),
        }
    }

    /// Skip TLS certificate verification (DANGEROUS - only for development)
    pub fn dangerous_skip_cert_verify(mut self) -> Self {
        self.dangerous_skip_cert_verify = true;
        self
    }
}

impl Default for WebTransportBoundary {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Boundary for WebTransportBoundary {
    async fn mount(&self, endpoint: &str) -> Result<BoundaryLink> {
        let config = if self.dangerous_skip_cert_verify {
            ClientConfig::builder()
                .with_bind_default()
                .with_no_cert_validation()
                .build()
        } else {
            ClientConfig::builder()
                .with_bind_default()
                .with_native_certs()
                .build()
        };

        let client: Endpoint<Client> =
            Endpoint::client(config).map_err(|e| ValetError::Connection(e.to_string()))?;

        debug!(endpoint = %endpoint, "mounting mediator session");
        let connection = client
            .connect(endpoint)
            .await
            .map_err(|e| ValetError::Connection(e.to_string()))?;

        let (mut send, mut recv) = connection
            .open_bi()
            .await
            .map_err(|e| ValetError::Transport(e.to_string()))?
            .await
            .map_err(|e| ValetError::Transport(e.to_string()))?;

        let (in_tx, in_rx) = mpsc::channel(FRAME_BUFFER);
        let (out_tx, mut out_rx) = mpsc::channel::<String>(FRAME_BUFFER);
        let origin = endpoint.to_string();

        // The receiver above is live before either task runs: nothing the
        // mediator sends during startup is lost.
        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUFFER];
            loop {
                match recv.read(&mut buf).await {
                    Ok(Some(n)) => {
                        let payload = String::from_utf8_lossy(&buf[..n]).into_owned();
                        let frame = InboundFrame {
                            origin: origin.clone(),
                            payload,
                        };
                        if in_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        });

        tokio::spawn(async move {
            while let Some(payload) = out_rx.recv().await {
                if send.write_all(payload.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        *self.connection.lock() = Some(connection);

        Ok(BoundaryLink {
            peer: endpoint.to_string(),
            inbound: in_rx,
            outbound: out_tx,
        })
    }

    fn unmount(&self) {
        if let Some(connection) = self.connection.lock().take() {
            connection.close(VarInt::from_u32(0), b"disconnect");
        }
    }
}
