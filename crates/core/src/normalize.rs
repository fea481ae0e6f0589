//! Normalization of the identity fields shared by every integration:
//! email addresses, phone numbers and merchant-supplied tags.

use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of an email address (RFC 5321 path limit).
pub const MAX_EMAIL_LEN: usize = 254;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .expect("email pattern is valid")
});

/// Lower-case and trim an email. Profiles are keyed by this form.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Check an (already trimmed) email against the address grammar and length limit.
pub fn is_valid_email(email: &str) -> bool {
    email.len() <= MAX_EMAIL_LEN && EMAIL_RE.is_match(email)
}

/// Normalize a phone number toward E.164. Ten-digit numbers are assumed to be
/// North American. Returns `None` when too few digits remain.
pub fn normalize_phone(phone: &str) -> Option<String> {
    let trimmed = phone.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.len() {
        0..=6 => None,
        10 if !trimmed.starts_with('+') => Some(format!("+1{digits}")),
        11 if digits.starts_with('1') => Some(format!("+{digits}")),
        7..=15 => Some(format!("+{digits}")),
        _ => None,
    }
}

/// Turn a free-form category or tag into a lower-case hyphenated slug.
pub fn slugify_tag(tag: &str) -> String {
    let mut slug = String::with_capacity(tag.len());
    let mut pending_dash = false;
    for c in tag.trim().chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn test_valid_emails() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last+tag@sub.example.co.uk"));
    }

    #[test]
    fn test_invalid_emails() {
        for email in ["", "plain", "a@", "@x.com", "a@x", "a b@x.com", "a@-x.com", "a@@x.com"] {
            assert!(!is_valid_email(email), "{email} should be rejected");
        }
    }

    #[test]
    fn test_email_length_limit() {
        let local = "a".repeat(64);
        let domain = format!("{}.com", "b".repeat(60));
        let long = format!("{local}@{domain}.{domain}.{domain}");
        assert!(long.len() > MAX_EMAIL_LEN);
        assert!(!is_valid_email(&long));
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("(555) 123-4567").as_deref(), Some("+15551234567"));
        assert_eq!(normalize_phone("1 555 123 4567").as_deref(), Some("+15551234567"));
        assert_eq!(normalize_phone("+44 20 7946 0958").as_deref(), Some("+442079460958"));
        assert_eq!(normalize_phone("12345"), None);
    }

    #[test]
    fn test_slugify_tag() {
        assert_eq!(slugify_tag("  Coaching Buyer "), "coaching-buyer");
        assert_eq!(slugify_tag("VIP_Upsell"), "vip-upsell");
        assert_eq!(slugify_tag("already-slugged"), "already-slugged");
        assert_eq!(slugify_tag("--"), "");
    }
}
