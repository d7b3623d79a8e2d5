use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing or invalid signature")]
    Missing,
    #[error("signature mismatch")]
    Mismatch,
}

/// Verify a GitHub-style HMAC signature over the raw request body.
/// Expects header value like "sha256=<hex>".
pub fn verify(secret: &[u8], body: &[u8], signature_header: Option<&str>) -> Result<(), SignatureError> {
    let expected_hex = signature_header
        .and_then(|h| h.strip_prefix(SIGNATURE_PREFIX))
        .ok_or(SignatureError::Missing)?;

    // GitHub sends lowercase hex; anything else is not its signature.
    if expected_hex.bytes().any(|b| b.is_ascii_uppercase()) {
        return Err(SignatureError::Mismatch);
    }
    let expected = hex::decode(expected_hex).map_err(|_| SignatureError::Mismatch)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::Mismatch)?;
    mac.update(body);
    // verify_slice compares in constant time.
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

/// Header value a sender attaches for `body` signed with `secret`.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(body);
    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
}
