//! Cross-boundary message protocol
//!
//! Every request carries a correlation `id`; every response echoes it
//! verbatim. An `error` response is valid for any request type. The
//! `ready` and `storage_access_required` frames are id-less control
//! signals emitted by the mediator before the handshake completes.

use crate::caps::Capability;
use serde::{Deserialize, Serialize};

/// Version tag exchanged in the hello/acknowledge handshake
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// One record in a resource's event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Position in the log; cursors are sequence numbers
    pub seq: u64,
    /// Bearer identifier the record is attributed to
    pub author: String,
    /// Unix seconds at which the backend accepted the record
    pub at: u64,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub deleted: bool,
}

/// One page of log records; pagination is cursor-forward only
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<LogRecord>,
    pub has_more: bool,
}

/// Messages sent by the application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppMessage {
    /// Versioned handshake opener
    Hello { id: String, version: String },

    /// Ask the mediator for capabilities
    CapabilityRequest {
        id: String,
        capabilities: Vec<Capability>,
    },

    KvGet {
        id: String,
        key: String,
    },
    KvPut {
        id: String,
        key: String,
        value: serde_json::Value,
    },
    KvDelete {
        id: String,
        key: String,
    },

    BlobGet {
        id: String,
        name: String,
    },
    BlobPut {
        id: String,
        name: String,
        /// Base64-encoded contents
        data: String,
    },

    /// Read a log page; `token` is set on the direct path, absent through
    /// the mediator
    LogRead {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        after: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        include_deleted: bool,
    },
    LogAppend {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        payload: serde_json::Value,
    },
    LogDelete {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        seq: u64,
    },
}

/// Messages received from the mediator or backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediatorMessage {
    /// The embedded context finished initializing
    Ready,

    /// The mediator needs a user gesture before it can read its own
    /// persisted state; the container must be surfaced
    StorageAccessRequired,

    /// Handshake acknowledge with the currently granted capability set
    Ack {
        id: String,
        version: String,
        #[serde(default)]
        granted: Vec<Capability>,
    },

    /// Capability request resolved; `granted` is the full current set
    CapabilityGranted {
        id: String,
        #[serde(default)]
        granted: Vec<Capability>,
    },

    /// Out-of-band user approval is needed before the grant can happen
    ApprovalRequired { id: String, url: String },

    KvValue {
        id: String,
        value: Option<serde_json::Value>,
    },
    KvOk {
        id: String,
    },

    Blob {
        id: String,
        data: Option<String>,
    },
    BlobOk {
        id: String,
    },

    LogPage {
        id: String,
        records: Vec<LogRecord>,
        has_more: bool,
    },
    /// Result of an append or delete: the resulting record
    Record {
        id: String,
        record: LogRecord,
    },

    /// Structured error, valid in reply to any request
    Error {
        id: String,
        code: String,
        message: String,
    },
}

impl MediatorMessage {
    /// Correlation id, if this message answers a request
    pub fn id(&self) -> Option<&str> {
        match self {
            MediatorMessage::Ready | MediatorMessage::StorageAccessRequired => None,
            MediatorMessage::Ack { id, .. }
            | MediatorMessage::CapabilityGranted { id, .. }
            | MediatorMessage::ApprovalRequired { id, .. }
            | MediatorMessage::KvValue { id, .. }
            | MediatorMessage::KvOk { id }
            | MediatorMessage::Blob { id, .. }
            | MediatorMessage::BlobOk { id }
            | MediatorMessage::LogPage { id, .. }
            | MediatorMessage::Record { id, .. }
            | MediatorMessage::Error { id, .. } => Some(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_serialization() {
        let msg = AppMessage::Hello {
            id: "r1".to_string(),
            version: PROTOCOL_VERSION.to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"hello","id":"r1","version":"1.0.0"}"#);
    }

    #[test]
    fn test_capability_request_serialization() {
        let msg = AppMessage::CapabilityRequest {
            id: "r2".to_string(),
            capabilities: vec![Capability::KvRead, Capability::LogAppend],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"capability_request","id":"r2","capabilities":["kv:read","log:append"]}"#
        );
    }

    #[test]
    fn test_log_read_omits_absent_fields() {
        let msg = AppMessage::LogRead {
            id: "r3".to_string(),
            token: None,
            after: None,
            limit: None,
            include_deleted: false,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"log_read","id":"r3"}"#);
    }

    #[test]
    fn test_log_read_with_token_and_cursor() {
        let msg = AppMessage::LogRead {
            id: "r4".to_string(),
            token: Some("tok".to_string()),
            after: Some(41),
            limit: Some(10),
            include_deleted: true,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"log_read","id":"r4","token":"tok","after":41,"limit":10,"include_deleted":true}"#
        );
    }

    #[test]
    fn test_ready_deserialization() {
        let msg: MediatorMessage = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert_eq!(msg, MediatorMessage::Ready);
        assert_eq!(msg.id(), None);
    }

    #[test]
    fn test_ack_deserialization_with_grants() {
        let json = r#"{"type":"ack","id":"r1","version":"1.0.0","granted":["kv:read"]}"#;
        let msg: MediatorMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            MediatorMessage::Ack {
                id: "r1".to_string(),
                version: "1.0.0".to_string(),
                granted: vec![Capability::KvRead],
            }
        );
        assert_eq!(msg.id(), Some("r1"));
    }

    #[test]
    fn test_ack_absent_grants_is_empty_set() {
        let json = r#"{"type":"ack","id":"r1","version":"1.0.0"}"#;
        let msg: MediatorMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            MediatorMessage::Ack {
                id: "r1".to_string(),
                version: "1.0.0".to_string(),
                granted: vec![],
            }
        );
    }

    #[test]
    fn test_approval_required_deserialization() {
        let json = r#"{"type":"approval_required","id":"r9","url":"https://m/approve#x"}"#;
        let msg: MediatorMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            MediatorMessage::ApprovalRequired {
                id: "r9".to_string(),
                url: "https://m/approve#x".to_string(),
            }
        );
    }

    #[test]
    fn test_error_deserialization() {
        let json = r#"{"type":"error","id":"r5","code":"denied","message":"no"}"#;
        let msg: MediatorMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id(), Some("r5"));
        assert!(matches!(msg, MediatorMessage::Error { .. }));
    }

    #[test]
    fn test_log_record_deleted_defaults_false() {
        let json = r#"{"seq":7,"author":"u1","at":123,"payload":{"k":1}}"#;
        let record: LogRecord = serde_json::from_str(json).unwrap();
        assert!(!record.deleted);
        assert_eq!(record.seq, 7);
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let result = serde_json::from_str::<MediatorMessage>(r#"{"type":"mystery","id":"x"}"#);
        assert!(result.is_err());
    }
}
