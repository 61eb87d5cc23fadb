//! HTML link discovery.
//!
//! Navigation links come from `a`/`area` hrefs; inline requisites from
//! `img`/`script`/`source`/`embed`/`iframe` srcs and stylesheet/icon
//! `link` hrefs. A `<base href>` re-bases every relative reference.

use scraper::{Html, Selector};
use url::Url;

use super::{ExtractedLink, LinkKind, resolve_reference};

/// Extracts all references from an HTML document.
///
/// `document_url` is the fetched URL; the effective base is `<base href>`
/// when present and valid.
#[must_use]
pub fn extract_links(body: &str, document_url: &Url) -> Vec<ExtractedLink> {
    let doc = Html::parse_document(body);
    let base = effective_base(&doc, document_url);

    let mut links = Vec::new();
    collect(&doc, &base, "a[href], area[href]", "href", LinkKind::Navigation, &mut links);
    collect(
        &doc,
        &base,
        "link[rel=\"stylesheet\"][href], link[rel=\"icon\"][href], link[rel=\"shortcut icon\"][href]",
        "href",
        LinkKind::Inline,
        &mut links,
    );
    collect(
        &doc,
        &base,
        "img[src], script[src], source[src], embed[src], iframe[src], input[src], audio[src], video[src], track[src]",
        "src",
        LinkKind::Inline,
        &mut links,
    );
    links
}

fn effective_base(doc: &Html, document_url: &Url) -> Url {
    let Ok(selector) = Selector::parse("base[href]") else {
        return document_url.clone();
    };
    doc.select(&selector)
        .next()
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| document_url.join(href).ok())
        .unwrap_or_else(|| document_url.clone())
}

fn collect(
    doc: &Html,
    base: &Url,
    selector: &str,
    attr: &str,
    kind: LinkKind,
    out: &mut Vec<ExtractedLink>,
) {
    let Ok(selector) = Selector::parse(selector) else {
        return;
    };
    for element in doc.select(&selector) {
        let Some(raw) = element.value().attr(attr) else {
            continue;
        };
        if let Some(url) = resolve_reference(base, raw) {
            out.push(ExtractedLink { url, kind });
        }
    }
}
