//! Token-authenticated direct resource client
//!
//! Works from a capability token alone — no mediator connection, no
//! session. Every operation first checks the decoded token's permission
//! bit and locally computed expiry and fails fast without touching the
//! network; on the happy path the raw token rides the request as the sole
//! credential. The backend re-verifies independently: the local checks are
//! a UX improvement, not a trust boundary.

use crate::channel::unexpected;
use crate::error::{Result, ValetError};
use crate::protocol::{AppMessage, LogRecord, MediatorMessage, Page};
use crate::token::{self, DecodedToken, TokenError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;
use wtransport::endpoint::endpoint_side::Client;
use wtransport::{ClientConfig, Endpoint};

/// Delivers single operations to a backend endpoint
#[async_trait]
pub trait ResourceTransport: Send + Sync {
    /// Send one request and return its reply
    async fn call(&self, endpoint: &str, request: &AppMessage) -> Result<MediatorMessage>;
}

/// Client for a resource reachable with a capability token
pub struct DirectClient {
    token: DecodedToken,
    raw: String,
    endpoint: String,
    transport: Arc<dyn ResourceTransport>,
}

impl std::fmt::Debug for DirectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectClient")
            .field("token", &self.token)
            .field("raw", &self.raw)
            .field("endpoint", &self.endpoint)
            .field("transport", &"<dyn ResourceTransport>")
            .finish()
    }
}

impl DirectClient {
    /// Decode the token and resolve the resource endpoint (externally
    /// supplied preferred, embedded fallback)
    pub fn new(
        raw_token: &str,
        external_endpoint: Option<&str>,
        transport: Arc<dyn ResourceTransport>,
    ) -> Result<Self> {
        let token = token::decode(raw_token, external_endpoint)?;
        let endpoint = token.endpoint.clone().ok_or_else(|| {
            ValetError::Connection(
                "token carries no resource endpoint and none was supplied".to_string(),
            )
        })?;

        Ok(Self {
            token,
            raw: raw_token.to_string(),
            endpoint,
            transport,
        })
    }

    /// The decoded token this client operates under
    pub fn token(&self) -> &DecodedToken {
        &self.token
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Read a log page (requires the read bit)
    pub async fn read(&self, after: Option<u64>, limit: Option<u32>) -> Result<Page> {
        self.gate(self.token.permissions.can_read(), "read")?;
        self.read_page(after, limit, false).await
    }

    /// Read a log page including deleted records (requires the
    /// read-including-deleted bit)
    pub async fn read_including_deleted(
        &self,
        after: Option<u64>,
        limit: Option<u32>,
    ) -> Result<Page> {
        self.gate(self.token.permissions.can_read_deleted(), "read-deleted")?;
        self.read_page(after, limit, true).await
    }

    /// Append a record (requires the append bit); returns the stored record
    pub async fn append(&self, payload: serde_json::Value) -> Result<LogRecord> {
        self.gate(self.token.permissions.can_append(), "append")?;
        let id = Uuid::new_v4().to_string();
        let request = AppMessage::LogAppend {
            id: id.clone(),
            token: Some(self.raw.clone()),
            payload,
        };
        match self.call(&id, &request).await? {
            MediatorMessage::Record { record, .. } => Ok(record),
            other => Err(unexpected("append", &other)),
        }
    }

    /// Delete a record this bearer authored (requires the delete-own bit);
    /// authorship is the backend's call
    pub async fn delete_own(&self, seq: u64) -> Result<LogRecord> {
        self.gate(self.token.permissions.can_delete_own(), "delete-own")?;
        self.delete(seq).await
    }

    /// Delete any record (requires the delete-any bit)
    pub async fn delete_any(&self, seq: u64) -> Result<LogRecord> {
        self.gate(self.token.permissions.can_delete_any(), "delete-any")?;
        self.delete(seq).await
    }

    async fn read_page(
        &self,
        after: Option<u64>,
        limit: Option<u32>,
        include_deleted: bool,
    ) -> Result<Page> {
        let id = Uuid::new_v4().to_string();
        let request = AppMessage::LogRead {
            id: id.clone(),
            token: Some(self.raw.clone()),
            after,
            limit,
            include_deleted,
        };
        match self.call(&id, &request).await? {
            MediatorMessage::LogPage {
                records, has_more, ..
            } => Ok(Page { records, has_more }),
            other => Err(unexpected("read", &other)),
        }
    }

    async fn delete(&self, seq: u64) -> Result<LogRecord> {
        let id = Uuid::new_v4().to_string();
        let request = AppMessage::LogDelete {
            id: id.clone(),
            token: Some(self.raw.clone()),
            seq,
        };
        match self.call(&id, &request).await? {
            MediatorMessage::Record { record, .. } => Ok(record),
            other => Err(unexpected("delete", &other)),
        }
    }

    /// Local gate: expiry on the bearer's clock, then the permission bit.
    /// Failures here never reach the network.
    fn gate(&self, allowed: bool, permission: &str) -> Result<()> {
        if self.token.is_expired() {
            return Err(ValetError::Token(TokenError::Expired));
        }
        if !allowed {
            return Err(ValetError::PermissionDenied {
                capability: permission.to_string(),
            });
        }
        Ok(())
    }

    async fn call(&self, sent_id: &str, request: &AppMessage) -> Result<MediatorMessage> {
        let response = self.transport.call(&self.endpoint, request).await?;
        if response.id() != Some(sent_id) {
            return Err(ValetError::Transport(
                "response id does not match request".to_string(),
            ));
        }
        if let MediatorMessage::Error { code, message, .. } = response {
            return Err(ValetError::Backend { code, message });
        }
        Ok(response)
    }
}

/// WebTransport transport to a real backend
///
/// One session per call keeps the client stateless: the token is the whole
/// credential, so there is no connection state worth preserving.
pub struct RemoteBackend {
    dangerous_skip_cert_verify: bool,
}

impl RemoteBackend {
    pub fn new() -> Self {
        Self {
            dangerous_skip_cert_verify: false,
        }
    }

    /// Skip TLS certificate verification (DANGEROUS - only for development)
    pub fn dangerous_skip_cert_verify(mut self) -> Self {
        self.dangerous_skip_cert_verify = true;
        self
    }
}

impl Default for RemoteBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceTransport for RemoteBackend {
    async fn call(&self, endpoint: &str, request: &AppMessage) -> Result<MediatorMessage> {
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

        debug!(endpoint = %endpoint, "direct backend call");
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

        send.write_all(&serde_json::to_vec(request)?)
            .await
            .map_err(|e| ValetError::Transport(e.to_string()))?;

        let mut buf = vec![0u8; 65536];
        let n = recv
            .read(&mut buf)
            .await
            .map_err(|e| ValetError::Transport(e.to_string()))?
            .ok_or_else(|| ValetError::Connection("backend closed without replying".to_string()))?;

        Ok(serde_json::from_slice(&buf[..n])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{encode, Permissions, TokenFields, TokenVersion, HOUR_EPOCH_SECS};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &[u8] = b"direct-test-secret";

    /// Transport that scripts one reply and records what it saw
    struct MockTransport {
        calls: AtomicUsize,
        last_request: Mutex<Option<AppMessage>>,
        reply: Box<dyn Fn(&AppMessage) -> MediatorMessage + Send + Sync>,
    }

    impl MockTransport {
        fn new(
            reply: impl Fn(&AppMessage) -> MediatorMessage + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
                reply: Box::new(reply),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceTransport for MockTransport {
        async fn call(&self, _endpoint: &str, request: &AppMessage) -> Result<MediatorMessage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock() = Some(request.clone());
            Ok((self.reply)(request))
        }
    }

    fn request_id(msg: &AppMessage) -> String {
        match msg {
            AppMessage::LogRead { id, .. }
            | AppMessage::LogAppend { id, .. }
            | AppMessage::LogDelete { id, .. } => id.clone(),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    fn future_hour() -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        ((now / 3600) + 2) * 3600
    }

    fn mint(bits: u8, expires_at: u64) -> String {
        let fields = TokenFields {
            scope: "abc123".to_string(),
            endpoint: None,
            bearer: "u1".to_string(),
            permissions: Permissions::from_bits(bits),
            expires_at,
        };
        encode(&fields, TokenVersion::Compact, SECRET).unwrap()
    }

    fn record(id: &str) -> MediatorMessage {
        MediatorMessage::Record {
            id: id.to_string(),
            record: LogRecord {
                seq: 7,
                author: "u1".to_string(),
                at: 123,
                payload: serde_json::json!({"ok": true}),
                deleted: false,
            },
        }
    }

    #[tokio::test]
    async fn test_missing_permission_fails_without_network_call() {
        let transport = MockTransport::new(|req| record(&request_id(req)));
        let raw = mint(Permissions::READ | Permissions::APPEND, future_hour());
        let client =
            DirectClient::new(&raw, Some("https://store.test"), transport.clone()).unwrap();

        let err = client.delete_own(3).await.unwrap_err();
        assert!(
            matches!(err, ValetError::PermissionDenied { ref capability } if capability.contains("delete-own"))
        );
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_token_fails_locally() {
        let transport = MockTransport::new(|req| record(&request_id(req)));
        let raw = mint(Permissions::READ, HOUR_EPOCH_SECS + 3600);
        let client =
            DirectClient::new(&raw, Some("https://store.test"), transport.clone()).unwrap();

        let err = client.read(None, None).await.unwrap_err();
        assert!(matches!(err, ValetError::Token(TokenError::Expired)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_append_attaches_token_and_returns_record() {
        let transport = MockTransport::new(|req| record(&request_id(req)));
        let raw = mint(Permissions::APPEND, future_hour());
        let client =
            DirectClient::new(&raw, Some("https://store.test"), transport.clone()).unwrap();

        let stored = client.append(serde_json::json!({"n": 1})).await.unwrap();
        assert_eq!(stored.seq, 7);
        assert_eq!(transport.calls(), 1);

        let last_request = transport.last_request.lock().clone().unwrap();
        match last_request {
            AppMessage::LogAppend { token, .. } => assert_eq!(token.as_deref(), Some(raw.as_str())),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_passes_cursor_and_returns_page() {
        let transport = MockTransport::new(|req| MediatorMessage::LogPage {
            id: request_id(req),
            records: vec![],
            has_more: true,
        });
        let raw = mint(Permissions::READ, future_hour());
        let client =
            DirectClient::new(&raw, Some("https://store.test"), transport.clone()).unwrap();

        let page = client.read(Some(41), Some(10)).await.unwrap();
        assert!(page.has_more);
        assert!(page.records.is_empty());

        let last_request = transport.last_request.lock().clone().unwrap();
        match last_request {
            AppMessage::LogRead {
                after,
                limit,
                include_deleted,
                ..
            } => {
                assert_eq!(after, Some(41));
                assert_eq!(limit, Some(10));
                assert!(!include_deleted);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_including_deleted_needs_its_own_bit() {
        let transport = MockTransport::new(|req| MediatorMessage::LogPage {
            id: request_id(req),
            records: vec![],
            has_more: false,
        });
        // read bit alone is not enough
        let raw = mint(Permissions::READ, future_hour());
        let client =
            DirectClient::new(&raw, Some("https://store.test"), transport.clone()).unwrap();
        assert!(matches!(
            client.read_including_deleted(None, None).await,
            Err(ValetError::PermissionDenied { .. })
        ));

        let raw = mint(Permissions::READ_DELETED, future_hour());
        let client =
            DirectClient::new(&raw, Some("https://store.test"), transport.clone()).unwrap();
        client.read_including_deleted(None, None).await.unwrap();

        let last_request = transport.last_request.lock().clone().unwrap();
        match last_request {
            AppMessage::LogRead { include_deleted, .. } => assert!(include_deleted),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_backend_error_passed_through() {
        let transport = MockTransport::new(|req| MediatorMessage::Error {
            id: request_id(req),
            code: "not_found".to_string(),
            message: "no such record".to_string(),
        });
        let raw = mint(Permissions::DELETE_ANY, future_hour());
        let client = DirectClient::new(&raw, Some("https://store.test"), transport).unwrap();

        let err = client.delete_any(99).await.unwrap_err();
        assert!(matches!(err, ValetError::Backend { code, .. } if code == "not_found"));
    }

    #[tokio::test]
    async fn test_mismatched_response_id_rejected() {
        let transport = MockTransport::new(|_req| record("some-other-id"));
        let raw = mint(Permissions::APPEND, future_hour());
        let client = DirectClient::new(&raw, Some("https://store.test"), transport).unwrap();

        let err = client.append(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ValetError::Transport(_)));
    }

    #[tokio::test]
    async fn test_new_requires_an_endpoint_from_somewhere() {
        let transport = MockTransport::new(|req| record(&request_id(req)));
        // Compact tokens embed no endpoint
        let raw = mint(Permissions::READ, future_hour());

        assert!(matches!(
            DirectClient::new(&raw, None, transport.clone()),
            Err(ValetError::Connection(_))
        ));

        // Legacy tokens embed one; no external endpoint needed
        let fields = TokenFields {
            scope: "abc123".to_string(),
            endpoint: Some("https://store.test".to_string()),
            bearer: "u1".to_string(),
            permissions: Permissions::from_bits(Permissions::READ),
            expires_at: future_hour(),
        };
        let raw = encode(&fields, TokenVersion::Legacy, SECRET).unwrap();
        let client = DirectClient::new(&raw, None, transport).unwrap();
        assert_eq!(client.endpoint(), "https://store.test");
    }

    #[tokio::test]
    async fn test_undecodable_token_is_fatal() {
        let transport = MockTransport::new(|req| record(&request_id(req)));
        let err = DirectClient::new("!!not-a-token!!", None, transport).unwrap_err();
        assert!(matches!(err, ValetError::Token(_)));
    }
}
