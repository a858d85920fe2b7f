//! Turns raw email-shaped matches into canonical addresses.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// Broad pattern used to pull candidates out of arbitrary text and markup.
pub(crate) static CANDIDATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
        .expect("Failed to compile candidate email regex. This should not happen.")
});

/// The grammar every accepted address must match after cleanup.
static CANONICAL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$")
        .expect("Failed to compile canonical email regex. This should not happen.")
});

static HEX32_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-f0-9]{32}$").expect("Failed to compile hex regex. This should not happen.")
});

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "svg", "webp", "gif", "bmp", "ico", "tiff", "tif", "heic", "avif",
];

/// Returns every candidate match in `text`.
pub(crate) fn find_candidates(text: &str) -> impl Iterator<Item = &str> {
    CANDIDATE_REGEX.find_iter(text).map(|m| m.as_str())
}

const MAILTO: &str = "mailto:";

/// Normalizes a raw candidate into a canonical email, or rejects it.
///
/// # Arguments
/// * `raw` - A string pulled from any extraction surface (may carry `mailto:`,
///   a query string, percent escapes or stray punctuation).
///
/// # Returns
/// * `Some(String)` with the lowercase canonical address.
/// * `None` if the candidate is malformed, an image filename or a tracking id.
pub(crate) fn normalize_email(raw: &str) -> Option<String> {
    let candidate = raw.trim();
    let candidate = match candidate.get(..MAILTO.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(MAILTO) => &candidate[MAILTO.len()..],
        _ => candidate,
    };
    let candidate = candidate.split('?').next().unwrap_or("").trim();

    let decoded = match urlencoding::decode(candidate) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => candidate.to_string(),
    };

    let email: String = decoded
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '+' | '-'))
        .collect::<String>()
        .to_lowercase();

    if !CANONICAL_REGEX.is_match(&email) {
        return None;
    }

    let extension = email.rsplit('.').next().unwrap_or("");
    if IMAGE_EXTENSIONS.contains(&extension) {
        tracing::trace!("Rejecting image-like candidate: {}", email);
        return None;
    }

    let local_part = email.split('@').next().unwrap_or("");
    if HEX32_REGEX.is_match(local_part) {
        tracing::trace!("Rejecting tracking-id candidate: {}", email);
        return None;
    }

    Some(email)
}

/// Normalizes every candidate and collects the accepted ones into a set.
pub(crate) fn collect_emails<I, S>(candidates: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    candidates
        .into_iter()
        .filter_map(|raw| normalize_email(raw.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_mailto_and_query() {
        assert_eq!(
            normalize_email("mailto:Jane.Doe@Example.COM?subject=hi"),
            Some("jane.doe@example.com".to_string())
        );
        for raw in [
            " mailto:jane@example.com",
            "MAILTO:jane@example.com",
            "Mailto:jane@example.com",
        ] {
            assert_eq!(normalize_email(raw), Some("jane@example.com".to_string()), "{raw}");
        }
    }

    #[test]
    fn test_percent_decoding() {
        assert_eq!(
            normalize_email("%20info%40example.com"),
            Some("info@example.com".to_string())
        );
        // Malformed escapes are kept as-is, then stripped of '%'.
        assert_eq!(
            normalize_email("sales%zz@example.com"),
            Some("saleszz@example.com".to_string())
        );
    }

    #[test]
    fn test_strips_stray_characters() {
        assert_eq!(
            normalize_email("  <office@firm.law>, "),
            Some("office@firm.law".to_string())
        );
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(normalize_email(""), None);
        assert_eq!(normalize_email("mailto:"), None);
        assert_eq!(normalize_email("not-an-email"), None);
        assert_eq!(normalize_email("user@localhost"), None);
        assert_eq!(normalize_email("user@example.c"), None);
        assert_eq!(normalize_email("a@b@example.com"), None);
    }

    #[test]
    fn test_rejects_image_extensions() {
        assert_eq!(normalize_email("logo@site.png"), None);
        assert_eq!(normalize_email("hero@2x.WEBP"), None);
        assert_eq!(normalize_email("icon@favicon.ico"), None);
        assert_eq!(normalize_email("photo@camera.heic"), None);
        assert!(normalize_email("png@site.com").is_some());
    }

    #[test]
    fn test_rejects_hex_tracking_local_part() {
        assert_eq!(
            normalize_email("ab12cd34ef56ab12cd34ef56ab12cd34@tracking.com"),
            None
        );
        // 34 characters is not a tracking id by this rule.
        assert!(normalize_email("ab12cd34ef56ab12cd34ef56ab12cd34ef@tracking.com").is_some());
        // Uppercase hex is lowercased first.
        assert_eq!(
            normalize_email("AB12CD34EF56AB12CD34EF56AB12CD34@tracking.com"),
            None
        );
    }

    #[test]
    fn test_idempotent_on_canonical() {
        for email in ["jane.doe@example.com", "a+b_c-d@mail.example.co.uk"] {
            let once = normalize_email(email).unwrap();
            assert_eq!(once, email);
            assert_eq!(normalize_email(&once).unwrap(), once);
        }
    }

    #[test]
    fn test_accepted_emails_hold_invariants() {
        let inputs = [
            "mailto:Foo%2BBar@Example.org?cc=x",
            "%22quoted%22@site.io",
            "UPPER@CASE.NET",
            "mailto:%20x@y.com",
        ];
        for email in collect_emails(inputs) {
            assert_eq!(email, email.to_lowercase());
            assert!(CANONICAL_REGEX.is_match(&email));
            assert!(!email.contains('%'));
            assert!(!email.contains("mailto:"));
        }
    }

    #[test]
    fn test_collect_deduplicates_case_insensitively() {
        let set = collect_emails([
            "Info@Example.com",
            "info@example.com",
            "mailto:INFO@EXAMPLE.COM",
        ]);
        assert_eq!(set.len(), 1);
        assert!(set.contains("info@example.com"));
    }

    #[test]
    fn test_find_candidates() {
        let text = "Write to sales@acme.io or support@acme.io today.";
        let found: Vec<&str> = find_candidates(text).collect();
        assert_eq!(found, vec!["sales@acme.io", "support@acme.io"]);
    }
}
