//! Utility functions and helpers.

pub mod http;
pub mod log;

use url::Url;

/// Resolve `href` into the absolute form used as an article's identity.
///
/// Fragments are dropped; non-HTTP links (`javascript:`, `mailto:`, bare `#`)
/// yield `None`.
pub fn canonical_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_url() {
        let base = Url::parse("https://minfin.com.ua").unwrap();
        assert_eq!(
            canonical_url(&base, "/ua/news/123/#comments"),
            Some("https://minfin.com.ua/ua/news/123/".to_string())
        );
        assert_eq!(canonical_url(&base, "javascript:void(0)"), None);
        assert_eq!(canonical_url(&base, "#"), None);
        assert_eq!(canonical_url(&base, "   "), None);
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(
            collapse_whitespace("  Зміни\n\t до   ПДФО "),
            "Зміни до ПДФО"
        );
    }
}
