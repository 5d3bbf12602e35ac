// src/utils/url.rs

//! URL manipulation utilities.

use url::Url;

/// Resolve a potentially relative link against the page it was found on.
///
/// Handles root-relative (`/jobs/1`), protocol-relative (`//cdn.example/x`)
/// and document-relative (`jobs/1`) links. Returns `None` when the link
/// cannot be made absolute.
///
/// # Examples
/// ```
/// use jobwatch::utils::url::resolve;
///
/// assert_eq!(
///     resolve("https://example.com/careers/", "/jobs/1").as_deref(),
///     Some("https://example.com/jobs/1")
/// );
/// ```
pub fn resolve(page_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    // Already absolute
    if let Ok(url) = Url::parse(href) {
        return Some(url.to_string());
    }

    let base = Url::parse(page_url).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

/// Whether an href points somewhere a reader can follow.
pub fn is_followable(href: &str) -> bool {
    let href = href.trim().to_ascii_lowercase();
    !(href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_absolute_url() {
        assert_eq!(
            resolve("https://example.com/path/", "https://other.com/page").as_deref(),
            Some("https://other.com/page")
        );
    }

    #[test]
    fn test_resolve_absolute_path() {
        assert_eq!(
            resolve("https://example.com/path/", "/root.html").as_deref(),
            Some("https://example.com/root.html")
        );
    }

    #[test]
    fn test_resolve_protocol_relative() {
        assert_eq!(
            resolve("https://example.com/path/", "//jobs.example.com/1").as_deref(),
            Some("https://jobs.example.com/1")
        );
    }

    #[test]
    fn test_resolve_relative_from_file() {
        assert_eq!(
            resolve("https://example.com/path/index.html", "other.html").as_deref(),
            Some("https://example.com/path/other.html")
        );
    }

    #[test]
    fn test_resolve_empty_href() {
        assert_eq!(resolve("https://example.com/", "  "), None);
    }

    #[test]
    fn test_is_followable() {
        assert!(is_followable("/jobs/1"));
        assert!(!is_followable("#top"));
        assert!(!is_followable("javascript:void(0)"));
    }
}
