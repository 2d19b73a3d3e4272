//! Callback signatures
//!
//! The platform signs server callbacks with `SHA1(sort(parts).join(""))`,
//! hex encoded. Plain callbacks sign `(token, timestamp, nonce)`; encrypted
//! ones add the `Encrypt` payload and send it as `msg_signature`.

use sha1::{Digest, Sha1};

/// Sort the parts, concatenate and SHA1 them
pub fn signature(parts: &[&str]) -> String {
    let mut parts = parts.to_vec();
    parts.sort_unstable();

    let hash = Sha1::digest(parts.concat().as_bytes());
    hex::encode(hash)
}

pub fn verify_signature(parts: &[&str], expected: &str) -> bool {
    signature(parts).eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_known_vector() {
        // sha1("1234567890abc123test_token")
        assert_eq!(
            signature(&["test_token", "1234567890", "abc123"]),
            "d511e9028390949bd7b8192e1f8bc6dbb5c63bc4"
        );
    }

    #[test]
    fn test_signature_is_order_independent() {
        let a = signature(&["token", "1700000000", "nonce"]);
        let b = signature(&["nonce", "token", "1700000000"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn test_verify_signature() {
        let parts = ["token", "1700000000", "nonce"];
        let sig = signature(&parts);
        assert!(verify_signature(&parts, &sig));
        assert!(verify_signature(&parts, &sig.to_uppercase()));
        assert!(!verify_signature(&["token", "1700000000", "other"], &sig));
    }

    #[test]
    fn test_message_signature_includes_payload() {
        let plain = signature(&["token", "1", "n"]);
        let with_payload = signature(&["token", "1", "n", "ENCRYPTED"]);
        assert_ne!(plain, with_payload);
    }
}
