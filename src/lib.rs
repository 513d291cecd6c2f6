//! Valet
//!
//! Client-side capability brokering for a private data store: applications
//! obtain narrow, revocable access through a trusted mediator without ever
//! holding the user's credentials.
//!
//! Two ways in:
//!
//! - A [`Channel`](channel::Channel) mounts the mediator's sandboxed
//!   context, completes a versioned handshake, and negotiates capabilities
//!   (escalating to an out-of-band approval surface when needed) for
//!   multi-call sessions.
//! - A [`DirectClient`](direct::DirectClient) takes a capability token
//!   received out-of-band (say, from a share link's URL fragment) and
//!   talks to the backend directly, no mediator involved.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use valet::{Capability, Channel, ChannelConfig, NoSurface, WebTransportBoundary};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let channel = Channel::new(
//!         ChannelConfig::new("https://mediator.example:4433"),
//!         Arc::new(WebTransportBoundary::new()),
//!         Arc::new(NoSurface),
//!     );
//!
//!     channel.connect().await?;
//!
//!     let outcome = channel
//!         .request_capabilities(&[Capability::KvRead, Capability::KvWrite])
//!         .await?;
//!     if outcome.is_complete() {
//!         channel.kv_put("greeting", serde_json::json!("hello")).await?;
//!         println!("{:?}", channel.kv_get("greeting").await?);
//!     }
//!
//!     channel.disconnect();
//!     Ok(())
//! }
//! ```

pub mod caps;
pub mod channel;
pub mod config;
pub mod direct;
pub mod error;
pub mod negotiate;
pub mod protocol;
pub mod token;

pub use caps::{Capability, CapabilitySet};
pub use channel::{
    Boundary, BoundaryLink, Channel, ChannelState, InboundFrame, LoopbackBoundary, LoopbackPeer,
    WebTransportBoundary,
};
pub use config::ChannelConfig;
pub use direct::{DirectClient, RemoteBackend, ResourceTransport};
pub use error::{Result, ValetError};
pub use negotiate::{ApprovalHandle, ApprovalSurface, GrantOutcome, NoSurface};
pub use protocol::{AppMessage, LogRecord, MediatorMessage, Page, PROTOCOL_VERSION};
pub use token::{DecodedToken, Permissions, TokenError, TokenFields, TokenVersion};
