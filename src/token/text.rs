//! Legacy text token layout
//!
//! `1|endpoint|scope|tags|bearer|expires_secs|sig` — the only layout that
//! embeds its endpoint, with expiry in absolute unix seconds. `sig` is
//! base64 of the first 16 bytes of HMAC-SHA256 over everything before the
//! final `|`.

use super::{sign, DecodedToken, Permissions, TokenError, TokenFields, TokenVersion};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

const PREFIX: &[u8] = b"1|";
const TAG_LEN: usize = 16;

/// Text-prefix heuristic: the binary discriminants (0x02/0x03) can never
/// collide with ASCII `1`
pub(super) fn is_text(bytes: &[u8]) -> bool {
    bytes.starts_with(PREFIX)
}

pub(super) fn decode(bytes: &[u8]) -> Result<DecodedToken, TokenError> {
    let s = std::str::from_utf8(bytes).map_err(|_| TokenError::MalformedField("utf-8"))?;

    let parts: Vec<&str> = s.split('|').collect();
    if parts.len() != 7 {
        return Err(TokenError::MalformedField("field count"));
    }

    let endpoint = parts[1];
    let scope = parts[2];
    let tags = parts[3];
    let bearer = parts[4];
    if endpoint.is_empty() || scope.is_empty() || bearer.is_empty() {
        return Err(TokenError::MalformedField("empty field"));
    }

    let expires_at: u64 = parts[5].parse().map_err(|_| TokenError::InvalidExpiry)?;

    let tag = URL_SAFE_NO_PAD
        .decode(parts[6])
        .map_err(|_| TokenError::MalformedField("signature"))?;
    if tag.len() != TAG_LEN {
        return Err(TokenError::MalformedField("signature length"));
    }

    // Signed region is everything before the final separator
    let signed_len = s.len() - parts[6].len() - 1;

    Ok(DecodedToken {
        version: TokenVersion::Legacy,
        scope: scope.to_string(),
        endpoint: Some(endpoint.to_string()),
        bearer: bearer.to_string(),
        permissions: Permissions::from_tags(tags),
        expires_at,
        signed: bytes[..signed_len].to_vec(),
        tag,
    })
}

pub(super) fn encode(fields: &TokenFields, secret: &[u8]) -> Result<Vec<u8>, TokenError> {
    let endpoint = fields
        .endpoint
        .as_deref()
        .ok_or(TokenError::Unencodable("legacy layout embeds its endpoint"))?;

    for field in [endpoint, &fields.scope, &fields.bearer] {
        if field.is_empty() {
            return Err(TokenError::Unencodable("empty field"));
        }
        if field.contains('|') {
            return Err(TokenError::Unencodable("'|' inside a field"));
        }
    }

    let body = format!(
        "1|{}|{}|{}|{}|{}",
        endpoint,
        fields.scope,
        fields.permissions.tags(),
        fields.bearer,
        fields.expires_at
    );
    let tag = sign(secret, body.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(&tag[..TAG_LEN]);

    Ok(format!("{body}|{sig_b64}").into_bytes())
}
