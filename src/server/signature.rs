//! Workflow callback signature verification using HMAC-SHA256.
//!
//! The workflow service signs each callback body with a shared secret and
//! sends the result in `X-Signature-256` as `sha256=<hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Parses a signature header (e.g. `sha256=abc123...`) into raw bytes.
///
/// Returns `None` for a missing prefix or invalid hex. Never panics.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("sha256=")?;
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA256 of `payload`, or `None` if the key is unusable.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Formats a signature as a header value: `sha256=<hex>`.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

/// Verifies `signature_header` against `payload` in constant time.
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(expected) = parse_signature_header(signature_header) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn header_for(payload: &[u8], secret: &[u8]) -> String {
        format_signature_header(&compute_signature(payload, secret).unwrap())
    }

    #[test]
    fn parse_accepts_prefixed_hex() {
        assert_eq!(
            parse_signature_header("sha256=1234abcd"),
            Some(vec![0x12, 0x34, 0xab, 0xcd])
        );
        assert_eq!(
            parse_signature_header("sha256=ABCD"),
            Some(vec![0xab, 0xcd])
        );
    }

    #[test]
    fn parse_rejects_malformed_headers() {
        assert_eq!(parse_signature_header("1234abcd"), None);
        assert_eq!(parse_signature_header("sha1=1234abcd"), None);
        assert_eq!(parse_signature_header("sha256=xyz"), None);
        assert_eq!(parse_signature_header("sha256=abc"), None);
        assert_eq!(parse_signature_header(""), None);
    }

    #[test]
    fn verify_accepts_matching_secret() {
        let payload = br#"{"job_id":"job-1","status":"completed"}"#;
        let header = header_for(payload, b"shared");
        assert!(verify_signature(payload, &header, b"shared"));
    }

    #[test]
    fn verify_rejects_wrong_secret_or_payload() {
        let payload = b"callback";
        let header = header_for(payload, b"shared");
        assert!(!verify_signature(payload, &header, b"other"));
        assert!(!verify_signature(b"callbacK", &header, b"shared"));
        assert!(!verify_signature(payload, "sha256=", b"shared"));
    }

    proptest! {
        #[test]
        fn verify_never_panics(payload: Vec<u8>, header in ".*", secret: Vec<u8>) {
            let _ = verify_signature(&payload, &header, &secret);
        }

        #[test]
        fn signed_payloads_verify(payload: Vec<u8>, secret in proptest::collection::vec(any::<u8>(), 1..64)) {
            let header = header_for(&payload, &secret);
            prop_assert!(verify_signature(&payload, &header, &secret));
        }
    }
}
