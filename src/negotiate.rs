//! Capability negotiation
//!
//! Converts a capability request into an immediate grant, a denial, or an
//! escalation through an out-of-band approval surface — a context the
//! application can neither observe nor script. The surface reports nothing
//! back; its effect is persisted state the mediator re-reads when the same
//! request is issued again.

use crate::caps::Capability;
use crate::channel::{Channel, ChannelState};
use crate::error::{Result, ValetError};
use crate::protocol::{AppMessage, MediatorMessage};
use tracing::{debug, info};

/// Terminal result of a capability negotiation
///
/// `granted` is the full currently-granted set for the connection;
/// `pending` is what was wanted but not granted. Denials and partial
/// grants are valid terminal outcomes, not errors.
#[derive(Debug, Clone, PartialEq)]
pub struct GrantOutcome {
    pub granted: Vec<Capability>,
    pub pending: Vec<Capability>,
}

impl GrantOutcome {
    /// True when everything that was asked for is granted
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Handle onto an open approval surface
pub trait ApprovalHandle: Send + Sync {
    /// Whether the user has closed the surface
    fn is_closed(&self) -> bool;
}

/// Opens the out-of-band approval surface
pub trait ApprovalSurface: Send + Sync {
    /// Open the approval page in a separate top-level context. Returns
    /// `None` when the surface could not be opened at all (blocked).
    fn open(&self, url: &str) -> Option<Box<dyn ApprovalHandle>>;
}

/// Surface for headless embedders: every open reports blocked
pub struct NoSurface;

impl ApprovalSurface for NoSurface {
    fn open(&self, _url: &str) -> Option<Box<dyn ApprovalHandle>> {
        None
    }
}

impl Channel {
    /// Request capabilities, escalating through the approval surface at
    /// most once
    ///
    /// Callable only when connected. The one outcome handled internally is
    /// the expected approval-required intermediate; everything else —
    /// structured errors included — surfaces to the caller untouched.
    pub async fn request_capabilities(&self, wanted: &[Capability]) -> Result<GrantOutcome> {
        if !self.is_connected() {
            return Err(ValetError::NotConnected);
        }

        let mut user_acted = false;
        loop {
            let capabilities = wanted.to_vec();
            let response = self
                .inner
                .request(|id| AppMessage::CapabilityRequest { id, capabilities })
                .await?;

            match response {
                MediatorMessage::CapabilityGranted { granted, .. } => {
                    let outcome = {
                        let mut set = self.inner.granted.lock();
                        set.replace(granted);
                        GrantOutcome {
                            granted: set.to_vec(),
                            pending: set.missing_from(wanted),
                        }
                    };
                    if outcome.is_complete() {
                        debug!(granted = ?outcome.granted, "capabilities granted");
                    } else {
                        info!(pending = ?outcome.pending, "capabilities partially granted");
                    }
                    return Ok(outcome);
                }

                MediatorMessage::ApprovalRequired { url, .. } => {
                    if user_acted {
                        // The user already went through the surface; the
                        // mediator still wants approval, so resolve as a
                        // denial instead of re-offering the same choice.
                        let set = self.inner.granted.lock();
                        return Ok(GrantOutcome {
                            granted: set.to_vec(),
                            pending: set.missing_from(wanted),
                        });
                    }
                    self.await_approval(&url).await?;
                    user_acted = true;
                }

                other => {
                    return Err(ValetError::Transport(format!(
                        "unexpected response to capability request: {other:?}"
                    )));
                }
            }
        }
    }

    /// Open the approval surface and wait for the user to close it
    async fn await_approval(&self, url: &str) -> Result<()> {
        info!(url = %url, "approval required; opening approval surface");
        let handle = self
            .inner
            .surface
            .open(url)
            .ok_or(ValetError::ApprovalBlocked)?;

        let mut poll = tokio::time::interval(self.inner.config.approval_poll_interval);
        poll.tick().await; // the first tick completes immediately
        loop {
            poll.tick().await;
            if self.state() != ChannelState::Connected {
                return Err(ValetError::ConnectionClosed);
            }
            if handle.is_closed() {
                break;
            }
        }
        debug!("approval surface closed");

        // The surface persists its result out-of-band; give that write a
        // moment to become visible before asking again. Tunable via
        // `ChannelConfig::grant_settle_delay`, a race mitigation rather
        // than a guarantee.
        tokio::time::sleep(self.inner.config.grant_settle_delay).await;
        Ok(())
    }
}
