//! CSS reference discovery: `url(...)` tokens and `@import` rules.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use super::{ExtractedLink, LinkKind, resolve_reference};

static URL_TOKEN: OnceLock<Regex> = OnceLock::new();
static IMPORT_RULE: OnceLock<Regex> = OnceLock::new();

/// Extracts every reference from a stylesheet. All CSS references are
/// inline requisites.
#[must_use]
pub fn extract_links(body: &str, document_url: &Url) -> Vec<ExtractedLink> {
    let url_re = URL_TOKEN.get_or_init(|| {
        Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)'"\s]+))\s*\)"#)
            .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    });
    let import_re = IMPORT_RULE.get_or_init(|| {
        Regex::new(r#"@import\s+(?:"([^"]+)"|'([^']+)')"#)
            .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    });

    let mut links = Vec::new();
    for caps in url_re.captures_iter(body).chain(import_re.captures_iter(body)) {
        let raw = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map(|m| m.as_str());
        if let Some(url) = raw.and_then(|r| resolve_reference(document_url, r)) {
            if !links.iter().any(|l: &ExtractedLink| l.url == url) {
                links.push(ExtractedLink {
                    url,
                    kind: LinkKind::Inline,
                });
            }
        }
    }
    links
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://a.test/css/site.css").unwrap()
    }

    fn urls(body: &str) -> Vec<String> {
        extract_links(body, &base())
            .into_iter()
            .map(|l| l.url.to_string())
            .collect()
    }

    #[test]
    fn test_url_tokens_quoted_and_bare() {
        let body = r#"
            .a { background: url("bg.png"); }
            .b { background: url('dots.gif'); }
            .c { background: url(plain.jpg); }
        "#;
        assert_eq!(
            urls(body),
            vec![
                "http://a.test/css/bg.png",
                "http://a.test/css/dots.gif",
                "http://a.test/css/plain.jpg"
            ]
        );
    }

    #[test]
    fn test_import_rules() {
        let body = r#"@import "reset.css"; @import 'theme.css';"#;
        assert_eq!(
            urls(body),
            vec!["http://a.test/css/reset.css", "http://a.test/css/theme.css"]
        );
    }

    #[test]
    fn test_import_url_form_counted_once() {
        let body = r#"@import url("once.css");"#;
        assert_eq!(urls(body), vec!["http://a.test/css/once.css"]);
    }

    #[test]
    fn test_data_uris_skipped() {
        let body = r#".x { background: url(data:image/png;base64,AAAA); }"#;
        assert!(urls(body).is_empty());
    }

    #[test]
    fn test_absolute_urls_kept() {
        let body = r#".x { background: url(http://cdn.test/i.png); }"#;
        assert_eq!(urls(body), vec!["http://cdn.test/i.png"]);
    }
}
