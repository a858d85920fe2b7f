//! Decoder for Cloudflare-style email obfuscation.
//!
//! The payload is a hex string whose first byte is an XOR key for every
//! following byte.

use crate::error::DecodeError;

/// Path fragment Cloudflare uses for protected `mailto:` links.
pub(crate) const PROTECTION_PATH: &str = "/cdn-cgi/l/email-protection#";

/// Decodes one `data-cfemail` payload.
pub(crate) fn decode_cf_email(encoded: &str) -> Result<String, DecodeError> {
    let bytes = hex::decode(encoded.trim())?;
    let (key, payload) = bytes.split_first().ok_or(DecodeError::Empty)?;
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }
    let plain: Vec<u8> = payload.iter().map(|b| b ^ key).collect();
    String::from_utf8(plain).map_err(|_| DecodeError::Utf8)
}

/// Extracts and decodes the payload of an email-protection link, if `href` is one.
pub(crate) fn decode_protected_href(href: &str) -> Option<Result<String, DecodeError>> {
    let (_, encoded) = href.split_once(PROTECTION_PATH)?;
    Some(decode_cf_email(encoded))
}

#[cfg(test)]
pub(crate) fn encode_cf_email(email: &str, key: u8) -> String {
    let mut bytes = vec![key];
    bytes.extend(email.bytes().map(|b| b ^ key));
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_payload() {
        // key 0x42, "a@b.co"
        let encoded = encode_cf_email("a@b.co", 0x42);
        assert!(encoded.starts_with("42"));
        assert_eq!(decode_cf_email(&encoded).unwrap(), "a@b.co");
    }

    #[test]
    fn decodes_with_any_key() {
        for key in [0x00, 0x17, 0xff] {
            let encoded = encode_cf_email("office@firm.example", key);
            assert_eq!(decode_cf_email(&encoded).unwrap(), "office@firm.example");
        }
    }

    #[test]
    fn rejects_bad_payloads() {
        assert_eq!(decode_cf_email(""), Err(DecodeError::Empty));
        assert_eq!(decode_cf_email("42"), Err(DecodeError::Empty));
        assert!(matches!(decode_cf_email("zz12"), Err(DecodeError::Hex(_))));
        assert!(matches!(decode_cf_email("123"), Err(DecodeError::Hex(_))));
        // 0x00 ^ 0xff = 0xff, never valid UTF-8 on its own.
        assert_eq!(decode_cf_email("ff00"), Err(DecodeError::Utf8));
    }

    #[test]
    fn decodes_protected_links() {
        let encoded = encode_cf_email("info@site.org", 0x5a);
        let href = format!("/cdn-cgi/l/email-protection#{encoded}");
        assert_eq!(
            decode_protected_href(&href).unwrap().unwrap(),
            "info@site.org"
        );
        assert!(decode_protected_href("/contact").is_none());
    }
}
