//! Link extraction from fetched bodies.
//!
//! These parsers are deliberately small: they turn a body into a list of
//! absolute URLs (plus, for HTML, whether each reference is navigation or an
//! inline requisite). Recursion policy is applied elsewhere.

pub mod css;
pub mod html;
pub mod sitemap;

use url::Url;

/// How a document references a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Followed link (`a href`, `area href`, sitemap entries).
    Navigation,
    /// Inline page requisite (`img src`, stylesheets, scripts, frames).
    Inline,
}

/// One discovered reference, already resolved to an absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    pub url: Url,
    pub kind: LinkKind,
}

/// Resolves `raw` against `base`, dropping non-fetchable references.
#[must_use]
pub(crate) fn resolve_reference(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let lowered = raw.to_ascii_lowercase();
    if lowered.starts_with("javascript:")
        || lowered.starts_with("mailto:")
        || lowered.starts_with("data:")
        || lowered.starts_with("tel:")
    {
        return None;
    }
    let mut url = base.join(raw).ok()?;
    url.set_fragment(None);
    match url.scheme() {
        "http" | "https" => Some(url),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_and_absolute() {
        let base = Url::parse("http://a.test/dir/page.html").unwrap();
        assert_eq!(
            resolve_reference(&base, "img.png").unwrap().as_str(),
            "http://a.test/dir/img.png"
        );
        assert_eq!(
            resolve_reference(&base, "/root.png").unwrap().as_str(),
            "http://a.test/root.png"
        );
        assert_eq!(
            resolve_reference(&base, "http://b.test/x").unwrap().as_str(),
            "http://b.test/x"
        );
    }

    #[test]
    fn test_resolve_drops_non_fetchable() {
        let base = Url::parse("http://a.test/").unwrap();
        assert!(resolve_reference(&base, "#top").is_none());
        assert!(resolve_reference(&base, "javascript:void(0)").is_none());
        assert!(resolve_reference(&base, "mailto:x@y.z").is_none());
        assert!(resolve_reference(&base, "data:text/plain,hi").is_none());
        assert!(resolve_reference(&base, "ftp://b.test/x").is_none());
        assert!(resolve_reference(&base, "").is_none());
    }

    #[test]
    fn test_resolve_strips_fragment() {
        let base = Url::parse("http://a.test/").unwrap();
        let url = resolve_reference(&base, "/page.html#sec2").unwrap();
        assert_eq!(url.as_str(), "http://a.test/page.html");
    }
}
