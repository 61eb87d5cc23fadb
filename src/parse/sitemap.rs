//! Sitemap parsing: XML sitemaps and sitemap indexes (optionally
//! gzip-compressed) plus plain-text URL lists.

use std::io::Read;
use std::sync::OnceLock;

use flate2::read::GzDecoder;
use regex::Regex;
use tracing::debug;
use url::Url;

/// Entries discovered in a sitemap.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SitemapEntries {
    /// Page URLs (`<urlset>` entries or text lines).
    pub pages: Vec<Url>,
    /// Nested sitemap URLs (`<sitemapindex>` entries).
    pub sitemaps: Vec<Url>,
}

static LOC: OnceLock<Regex> = OnceLock::new();
static SITEMAP_BLOCK: OnceLock<Regex> = OnceLock::new();

/// Parses a sitemap body, transparently inflating gzip.
#[must_use]
pub fn parse(raw: &[u8]) -> SitemapEntries {
    let body = match inflate_if_gzip(raw) {
        Some(text) => text,
        None => return SitemapEntries::default(),
    };

    if body.contains("<urlset") || body.contains("<sitemapindex") {
        parse_xml(&body)
    } else {
        parse_text(&body)
    }
}

fn inflate_if_gzip(raw: &[u8]) -> Option<String> {
    if raw.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = GzDecoder::new(raw);
        let mut out = String::new();
        match decoder.read_to_string(&mut out) {
            Ok(_) => Some(out),
            Err(e) => {
                debug!(error = %e, "gzip sitemap failed to inflate");
                None
            }
        }
    } else {
        Some(String::from_utf8_lossy(raw).into_owned())
    }
}

fn parse_xml(body: &str) -> SitemapEntries {
    let loc_re = LOC.get_or_init(|| {
        Regex::new(r"(?is)<loc>\s*([^<\s]+)\s*</loc>")
            .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    });
    let sitemap_re = SITEMAP_BLOCK.get_or_init(|| {
        Regex::new(r"(?is)<sitemap>(.*?)</sitemap>")
            .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    });

    let mut entries = SitemapEntries::default();

    // <sitemap> blocks hold nested sitemaps; every other <loc> is a page.
    let mut index_spans: Vec<(usize, usize)> = Vec::new();
    for caps in sitemap_re.captures_iter(body) {
        if let Some(whole) = caps.get(0) {
            index_spans.push((whole.start(), whole.end()));
        }
        if let Some(inner) = caps.get(1) {
            for loc in loc_re.captures_iter(inner.as_str()) {
                if let Some(url) = loc.get(1).and_then(|m| Url::parse(m.as_str().trim()).ok()) {
                    entries.sitemaps.push(url);
                }
            }
        }
    }
    for caps in loc_re.captures_iter(body) {
        let Some(m) = caps.get(0) else { continue };
        if index_spans
            .iter()
            .any(|(start, end)| m.start() >= *start && m.end() <= *end)
        {
            continue;
        }
        if let Some(url) = caps.get(1).and_then(|c| Url::parse(c.as_str().trim()).ok()) {
            entries.pages.push(url);
        }
    }
    entries
}

fn parse_text(body: &str) -> SitemapEntries {
    let mut entries = SitemapEntries::default();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Ok(url) = Url::parse(line) {
            if matches!(url.scheme(), "http" | "https") {
                entries.pages.push(url);
            }
        }
    }
    entries
}
