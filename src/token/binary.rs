//! Binary token layouts
//!
//! Compact (0x02): `[ver][scope:6][bits][bearer:8][hours:3][tag:16]`, 35
//! bytes exactly; the bearer field is zero-padded on the right.
//! Extended (0x03): `[ver][scope:8][bits][len][bearer:len][hours:3][tag:32]`
//! with a length-prefixed bearer of 1–64 bytes and a full-length tag.
//!
//! Neither layout stores an endpoint; it must arrive out-of-band.

use super::{
    sign, DecodedToken, Permissions, TokenError, TokenFields, TokenVersion, HOUR_EPOCH_SECS,
};

pub(super) const COMPACT_VERSION: u8 = 0x02;
pub(super) const EXTENDED_VERSION: u8 = 0x03;

const COMPACT_SCOPE_LEN: usize = 6;
const COMPACT_BEARER_LEN: usize = 8;
const COMPACT_TAG_LEN: usize = 16;
const COMPACT_LEN: usize = 1 + COMPACT_SCOPE_LEN + 1 + COMPACT_BEARER_LEN + 3 + COMPACT_TAG_LEN;

const EXTENDED_SCOPE_LEN: usize = 8;
const EXTENDED_TAG_LEN: usize = 32;
const EXTENDED_MAX_BEARER_LEN: usize = 64;
// version + scope + bits + bearer length byte
const EXTENDED_HEADER_LEN: usize = 1 + EXTENDED_SCOPE_LEN + 1 + 1;

const MAX_HOURS: u64 = (1 << 24) - 1;

pub(super) fn decode_compact(bytes: &[u8]) -> Result<DecodedToken, TokenError> {
    if bytes.len() != COMPACT_LEN {
        return Err(TokenError::WrongLength {
            expected: COMPACT_LEN,
            got: bytes.len(),
        });
    }

    let scope = utf8_field(&bytes[1..7], "scope")?;
    let permissions = Permissions::from_bits(bytes[7]);

    let bearer_raw = &bytes[8..16];
    let bearer_len = bearer_raw
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(COMPACT_BEARER_LEN);
    if bearer_len == 0 {
        return Err(TokenError::MalformedField("bearer"));
    }
    let bearer = utf8_field(&bearer_raw[..bearer_len], "bearer")?;

    let expires_at = expiry_from_hours(&bytes[16..19]);

    Ok(DecodedToken {
        version: TokenVersion::Compact,
        scope,
        endpoint: None,
        bearer,
        permissions,
        expires_at,
        signed: bytes[..COMPACT_LEN - COMPACT_TAG_LEN].to_vec(),
        tag: bytes[COMPACT_LEN - COMPACT_TAG_LEN..].to_vec(),
    })
}

pub(super) fn decode_extended(bytes: &[u8]) -> Result<DecodedToken, TokenError> {
    if bytes.len() < EXTENDED_HEADER_LEN {
        return Err(TokenError::Truncated);
    }

    let bearer_len = bytes[EXTENDED_HEADER_LEN - 1] as usize;
    if bearer_len == 0 || bearer_len > EXTENDED_MAX_BEARER_LEN {
        return Err(TokenError::MalformedField("bearer length"));
    }

    let expected = EXTENDED_HEADER_LEN + bearer_len + 3 + EXTENDED_TAG_LEN;
    if bytes.len() != expected {
        return Err(TokenError::WrongLength {
            expected,
            got: bytes.len(),
        });
    }

    let scope = utf8_field(&bytes[1..9], "scope")?;
    let permissions = Permissions::from_bits(bytes[9]);
    let bearer = utf8_field(
        &bytes[EXTENDED_HEADER_LEN..EXTENDED_HEADER_LEN + bearer_len],
        "bearer",
    )?;

    let hours_at = EXTENDED_HEADER_LEN + bearer_len;
    let expires_at = expiry_from_hours(&bytes[hours_at..hours_at + 3]);

    Ok(DecodedToken {
        version: TokenVersion::Extended,
        scope,
        endpoint: None,
        bearer,
        permissions,
        expires_at,
        signed: bytes[..expected - EXTENDED_TAG_LEN].to_vec(),
        tag: bytes[expected - EXTENDED_TAG_LEN..].to_vec(),
    })
}

pub(super) fn encode_compact(fields: &TokenFields, secret: &[u8]) -> Result<Vec<u8>, TokenError> {
    if fields.endpoint.is_some() {
        return Err(TokenError::Unencodable("compact layout carries no endpoint"));
    }
    if fields.scope.len() != COMPACT_SCOPE_LEN {
        return Err(TokenError::Unencodable("scope must be exactly 6 bytes"));
    }
    if fields.bearer.is_empty() || fields.bearer.len() > COMPACT_BEARER_LEN {
        return Err(TokenError::Unencodable("bearer must be 1-8 bytes"));
    }
    if fields.bearer.as_bytes().contains(&0) {
        return Err(TokenError::Unencodable("NUL inside bearer"));
    }

    let mut out = Vec::with_capacity(COMPACT_LEN);
    out.push(COMPACT_VERSION);
    out.extend_from_slice(fields.scope.as_bytes());
    out.push(fields.permissions.bits());

    let mut bearer = [0u8; COMPACT_BEARER_LEN];
    bearer[..fields.bearer.len()].copy_from_slice(fields.bearer.as_bytes());
    out.extend_from_slice(&bearer);

    out.extend_from_slice(&hours_bytes(fields.expires_at)?);

    let tag = sign(secret, &out);
    out.extend_from_slice(&tag[..COMPACT_TAG_LEN]);
    Ok(out)
}

pub(super) fn encode_extended(fields: &TokenFields, secret: &[u8]) -> Result<Vec<u8>, TokenError> {
    if fields.endpoint.is_some() {
        return Err(TokenError::Unencodable("extended layout carries no endpoint"));
    }
    if fields.scope.len() != EXTENDED_SCOPE_LEN {
        return Err(TokenError::Unencodable("scope must be exactly 8 bytes"));
    }
    if fields.bearer.is_empty() || fields.bearer.len() > EXTENDED_MAX_BEARER_LEN {
        return Err(TokenError::Unencodable("bearer must be 1-64 bytes"));
    }

    let mut out = Vec::with_capacity(EXTENDED_HEADER_LEN + fields.bearer.len() + 3 + EXTENDED_TAG_LEN);
    out.push(EXTENDED_VERSION);
    out.extend_from_slice(fields.scope.as_bytes());
    out.push(fields.permissions.bits());
    out.push(fields.bearer.len() as u8);
    out.extend_from_slice(fields.bearer.as_bytes());
    out.extend_from_slice(&hours_bytes(fields.expires_at)?);

    let tag = sign(secret, &out);
    out.extend_from_slice(&tag);
    Ok(out)
}

fn utf8_field(bytes: &[u8], name: &'static str) -> Result<String, TokenError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| TokenError::MalformedField(name))
}

fn expiry_from_hours(bytes: &[u8]) -> u64 {
    let hours = u64::from(bytes[0]) << 16 | u64::from(bytes[1]) << 8 | u64::from(bytes[2]);
    HOUR_EPOCH_SECS + hours * 3600
}

fn hours_bytes(expires_at: u64) -> Result<[u8; 3], TokenError> {
    if expires_at < HOUR_EPOCH_SECS {
        return Err(TokenError::InvalidExpiry);
    }
    let hours = (expires_at - HOUR_EPOCH_SECS) / 3600;
    if hours > MAX_HOURS {
        return Err(TokenError::InvalidExpiry);
    }
    Ok([(hours >> 16) as u8, (hours >> 8) as u8, hours as u8])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"binary-secret";

    fn compact_fields() -> TokenFields {
        TokenFields {
            scope: "abc123".to_string(),
            endpoint: None,
            bearer: "u1".to_string(),
            permissions: Permissions::from_bits(Permissions::READ),
            expires_at: HOUR_EPOCH_SECS + 48 * 3600,
        }
    }

    #[test]
    fn test_compact_is_exactly_35_bytes() {
        let bytes = encode_compact(&compact_fields(), SECRET).unwrap();
        assert_eq!(bytes.len(), 35);
        assert_eq!(bytes[0], COMPACT_VERSION);
    }

    #[test]
    fn test_compact_scope_length_enforced() {
        let mut f = compact_fields();
        f.scope = "short".to_string();
        assert!(matches!(
            encode_compact(&f, SECRET),
            Err(TokenError::Unencodable(_))
        ));
    }

    #[test]
    fn test_compact_rejects_embedded_endpoint() {
        let mut f = compact_fields();
        f.endpoint = Some("https://e".to_string());
        assert!(matches!(
            encode_compact(&f, SECRET),
            Err(TokenError::Unencodable(_))
        ));
    }

    #[test]
    fn test_compact_bearer_padding_trimmed() {
        let bytes = encode_compact(&compact_fields(), SECRET).unwrap();
        let decoded = decode_compact(&bytes).unwrap();
        assert_eq!(decoded.bearer, "u1");

        let mut f = compact_fields();
        f.bearer = "eightchr".to_string();
        let bytes = encode_compact(&f, SECRET).unwrap();
        assert_eq!(decode_compact(&bytes).unwrap().bearer, "eightchr");
    }

    #[test]
    fn test_compact_wrong_length() {
        let mut bytes = encode_compact(&compact_fields(), SECRET).unwrap();
        bytes.push(0);
        assert_eq!(
            decode_compact(&bytes),
            Err(TokenError::WrongLength { expected: 35, got: 36 })
        );
    }

    #[test]
    fn test_extended_variable_bearer_length() {
        let mut f = compact_fields();
        f.scope = "scope--8".to_string();
        f.bearer = "someone@stores.example".to_string();
        let bytes = encode_extended(&f, SECRET).unwrap();
        assert_eq!(bytes[0], EXTENDED_VERSION);
        assert_eq!(bytes.len(), 11 + f.bearer.len() + 3 + 32);

        let decoded = decode_extended(&bytes).unwrap();
        assert_eq!(decoded.bearer, f.bearer);
    }

    #[test]
    fn test_extended_bearer_too_long() {
        let mut f = compact_fields();
        f.scope = "scope--8".to_string();
        f.bearer = "b".repeat(65);
        assert!(matches!(
            encode_extended(&f, SECRET),
            Err(TokenError::Unencodable(_))
        ));
    }

    #[test]
    fn test_extended_zero_bearer_length_rejected() {
        let mut bytes = vec![EXTENDED_VERSION];
        bytes.extend_from_slice(b"scope--8");
        bytes.push(0x01);
        bytes.push(0); // bearer length
        bytes.extend_from_slice(&[0u8; 35]);
        assert_eq!(
            decode_extended(&bytes),
            Err(TokenError::MalformedField("bearer length"))
        );
    }

    #[test]
    fn test_extended_short_input_is_truncated() {
        assert_eq!(decode_extended(&[EXTENDED_VERSION, 1, 2]), Err(TokenError::Truncated));
    }

    #[test]
    fn test_hour_granularity_rounds_down() {
        let mut f = compact_fields();
        f.expires_at = HOUR_EPOCH_SECS + 48 * 3600 + 1800; // half past the hour
        let bytes = encode_compact(&f, SECRET).unwrap();
        let decoded = decode_compact(&bytes).unwrap();
        // Rounding down shortens validity rather than extending it
        assert_eq!(decoded.expires_at, HOUR_EPOCH_SECS + 48 * 3600);
    }

    #[test]
    fn test_expiry_before_epoch_rejected() {
        let mut f = compact_fields();
        f.expires_at = HOUR_EPOCH_SECS - 1;
        assert_eq!(encode_compact(&f, SECRET), Err(TokenError::InvalidExpiry));
    }

    #[test]
    fn test_expiry_beyond_three_bytes_rejected() {
        let mut f = compact_fields();
        f.expires_at = HOUR_EPOCH_SECS + (MAX_HOURS + 1) * 3600;
        assert_eq!(encode_compact(&f, SECRET), Err(TokenError::InvalidExpiry));
    }
}
