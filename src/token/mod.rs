//! Capability token codec
//!
//! Token layouts, dispatched on the decoded bytes:
//! - `1|...` ASCII prefix : legacy text format (embeds its endpoint,
//!   absolute-seconds expiry, single-character permission tags)
//! - `0x02` : compact binary (6-byte scope, fixed 8-byte bearer, 16-byte tag)
//! - `0x03` : extended binary (8-byte scope, length-prefixed bearer, 32-byte tag)
//!
//! Binary expiries are hours since 2020-01-01T00:00:00Z, 3 bytes — the
//! token shrinks at the cost of hour-granularity expiry. Everything decodes
//! to one normalized [`DecodedToken`]; no caller branches on version after
//! the dispatch point.

mod binary;
mod text;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Epoch for the binary formats' hour-granularity expiry (2020-01-01T00:00:00Z)
pub const HOUR_EPOCH_SECS: u64 = 1_577_836_800;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token encoding")]
    InvalidEncoding,

    #[error("unknown token version: {0}")]
    UnknownVersion(u8),

    #[error("wrong token length: expected {expected} bytes, got {got}")]
    WrongLength { expected: usize, got: usize },

    #[error("token truncated")]
    Truncated,

    #[error("malformed token field: {0}")]
    MalformedField(&'static str),

    #[error("invalid token expiry")]
    InvalidExpiry,

    #[error("cannot encode token: {0}")]
    Unencodable(&'static str),

    #[error("token expired")]
    Expired,

    #[error("token signature mismatch")]
    SignatureMismatch,
}

/// Token layout versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVersion {
    /// Oldest text format, endpoint embedded
    Legacy,
    /// Fixed-width binary format
    Compact,
    /// Variable-bearer binary format with a full-length tag
    Extended,
}

/// Permission bitmap shared by every token version
///
/// The legacy text format spells the same bits as single-character tags.
/// Unknown bits and tags are dropped on decode; a token with zero
/// permissions is valid but useless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Permissions(u8);

impl Permissions {
    pub const READ: u8 = 0x01;
    pub const APPEND: u8 = 0x02;
    pub const DELETE_OWN: u8 = 0x04;
    pub const DELETE_ANY: u8 = 0x08;
    pub const READ_DELETED: u8 = 0x10;

    const KNOWN: u8 = 0x1f;

    /// Build from raw bits, dropping unknown bits
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::KNOWN)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn can_read(self) -> bool {
        self.0 & Self::READ != 0
    }

    pub fn can_append(self) -> bool {
        self.0 & Self::APPEND != 0
    }

    pub fn can_delete_own(self) -> bool {
        self.0 & Self::DELETE_OWN != 0
    }

    pub fn can_delete_any(self) -> bool {
        self.0 & Self::DELETE_ANY != 0
    }

    pub fn can_read_deleted(self) -> bool {
        self.0 & Self::READ_DELETED != 0
    }

    /// Parse legacy tag characters; unknown tags are ignored
    pub(crate) fn from_tags(tags: &str) -> Self {
        let mut bits = 0u8;
        for c in tags.chars() {
            bits |= match c {
                'r' => Self::READ,
                'a' => Self::APPEND,
                'd' => Self::DELETE_OWN,
                'D' => Self::DELETE_ANY,
                'x' => Self::READ_DELETED,
                _ => 0,
            };
        }
        Self(bits)
    }

    /// Render as legacy tag characters
    pub(crate) fn tags(self) -> String {
        let mut out = String::new();
        for (bit, tag) in [
            (Self::READ, 'r'),
            (Self::APPEND, 'a'),
            (Self::DELETE_OWN, 'd'),
            (Self::DELETE_ANY, 'D'),
            (Self::READ_DELETED, 'x'),
        ] {
            if self.0 & bit != 0 {
                out.push(tag);
            }
        }
        out
    }
}

/// Fields a token is issued from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFields {
    /// Resource identifier the token is scoped to
    pub scope: String,
    /// Embedded resource endpoint; only the legacy format stores one
    pub endpoint: Option<String>,
    /// Bearer identifier
    pub bearer: String,
    pub permissions: Permissions,
    /// Absolute expiry, unix seconds (binary formats round down to the hour)
    pub expires_at: u64,
}

/// A decoded, normalized capability token
///
/// Decoding trusts nothing: call [`DecodedToken::verify`] before acting on
/// any field, and re-check expiry at every use, not only at decode time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
    pub version: TokenVersion,
    pub scope: String,
    /// Resolved endpoint: externally supplied if given, else embedded
    pub endpoint: Option<String>,
    pub bearer: String,
    pub permissions: Permissions,
    pub expires_at: u64,
    /// Bytes covered by the authentication tag
    signed: Vec<u8>,
    tag: Vec<u8>,
}

impl DecodedToken {
    /// Check the authentication tag against the resource's signing secret,
    /// then the expiry against the local clock
    pub fn verify(&self, secret: &[u8]) -> Result<(), TokenError> {
        self.verify_at(secret, now_secs())
    }

    /// Like [`verify`](Self::verify) with an explicit clock
    pub fn verify_at(&self, secret: &[u8], now: u64) -> Result<(), TokenError> {
        let mut mac =
            HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
        mac.update(&self.signed);
        mac.verify_truncated_left(&self.tag)
            .map_err(|_| TokenError::SignatureMismatch)?;

        if self.is_expired_at(now) {
            return Err(TokenError::Expired);
        }
        Ok(())
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_secs())
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Decode a raw token string
///
/// An externally supplied endpoint always wins over an embedded one: the
/// embedded endpoint spares the caller a second parameter but bakes a
/// mutable infrastructure detail into an immutable credential, so callers
/// that know where the resource lives should say so.
pub fn decode(raw: &str, external_endpoint: Option<&str>) -> Result<DecodedToken, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(raw)
        .map_err(|_| TokenError::InvalidEncoding)?;
    if bytes.is_empty() {
        return Err(TokenError::Truncated);
    }

    let mut token = if text::is_text(&bytes) {
        text::decode(&bytes)?
    } else {
        match bytes[0] {
            binary::COMPACT_VERSION => binary::decode_compact(&bytes)?,
            binary::EXTENDED_VERSION => binary::decode_extended(&bytes)?,
            other => return Err(TokenError::UnknownVersion(other)),
        }
    };

    if let Some(endpoint) = external_endpoint {
        token.endpoint = Some(endpoint.to_string());
    }
    Ok(token)
}

/// Encode and sign a token in the given layout
pub fn encode(
    fields: &TokenFields,
    version: TokenVersion,
    secret: &[u8],
) -> Result<String, TokenError> {
    let bytes = match version {
        TokenVersion::Legacy => text::encode(fields, secret)?,
        TokenVersion::Compact => binary::encode_compact(fields, secret)?,
        TokenVersion::Extended => binary::encode_extended(fields, secret)?,
    };
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

pub(crate) fn sign(secret: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
