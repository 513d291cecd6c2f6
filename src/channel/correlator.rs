//! Request/response correlation across the boundary
//!
//! Responses are matched by id, not by issue order; concurrent in-flight
//! requests may complete in any order. Each pending entry resolves exactly
//! once: by a matching response, by per-request timeout (handled at the
//! await site), or by a drain on disconnect.

use crate::error::{Result, ValetError};
use crate::protocol::MediatorMessage;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

pub(crate) struct Correlator {
    pending: Mutex<HashMap<String, oneshot::Sender<Result<MediatorMessage>>>>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh request id and its completion slot
    pub(crate) fn register(&self) -> (String, oneshot::Receiver<Result<MediatorMessage>>) {
        let mut pending = self.pending.lock();
        loop {
            let id = Uuid::new_v4().to_string();
            // Never two pending entries under one id; ids are not reused
            // while outstanding
            if !pending.contains_key(&id) {
                let (tx, rx) = oneshot::channel();
                pending.insert(id.clone(), tx);
                return (id, rx);
            }
        }
    }

    /// Resolve the pending request for `id` with the message's own status.
    /// Returns false when nothing was waiting (late or unsolicited reply).
    pub(crate) fn complete(&self, id: &str, msg: MediatorMessage) -> bool {
        let Some(tx) = self.pending.lock().remove(id) else {
            return false;
        };
        let result = match msg {
            MediatorMessage::Error { code, message, .. } => {
                Err(ValetError::Backend { code, message })
            }
            other => Ok(other),
        };
        tx.send(result).is_ok()
    }

    /// Drop a pending entry without resolving it (timed-out caller)
    pub(crate) fn forget(&self, id: &str) {
        self.pending.lock().remove(id);
    }

    /// Reject every outstanding request; nothing is accepted afterwards
    pub(crate) fn drain(&self, err: impl Fn() -> ValetError) {
        for (_, tx) in self.pending.lock().drain() {
            let _ = tx.send(Err(err()));
        }
    }

    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> usize {
        self.pending.lock().len()
    }
}
