//! # Token Helpers
//!
//! Credential tokens are opaque strings. Some peers require them to travel
//! base64 encoded in the `Authorization` header.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use uuid::Uuid;

/// Generates a fresh credentials token.
pub fn generate_token() -> String {
    Uuid::new_v4().to_string()
}

pub fn base64_encode(token: &str) -> String {
    STANDARD.encode(token.as_bytes())
}

/// Decodes a base64 token, falling back to the input when it is not valid
/// base64 of a printable UTF-8 string.
pub fn try_base64_decode(token: &str) -> String {
    STANDARD
        .decode(token.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .filter(|decoded| !decoded.is_empty() && decoded.chars().all(|c| c.is_ascii_graphic()))
        .unwrap_or_else(|| token.to_string())
}

/// Returns the token as it must appear on the wire for a peer.
pub fn transport_token(token: &str, base64: bool) -> String {
    if base64 {
        base64_encode(token)
    } else {
        token.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn test_encode_then_decode() {
        let token = generate_token();
        assert_eq!(try_base64_decode(&base64_encode(&token)), token);
    }

    #[test]
    fn test_decode_falls_back_to_plain_token() {
        assert_eq!(try_base64_decode("plain-token!"), "plain-token!");
    }

    #[test]
    fn test_transport_token() {
        assert_eq!(transport_token("abc", false), "abc");
        assert_eq!(transport_token("abc", true), "YWJj");
    }
}
