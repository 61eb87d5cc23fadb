//! Canonical URL identity and the fetched-once set.
//!
//! Two URLs are the same download iff their canonical forms are byte-equal:
//! lowercase scheme and host, explicit port, path and query kept, fragment
//! dropped. The blacklist stores canonical forms and admits each one once per
//! process; there is no removal.

use std::collections::HashSet;

use url::Url;

/// Canonical identity string for `url`.
///
/// `scheme://host:port/path?query` with the scheme and host lowercased and
/// the port always explicit (default port filled in per scheme). The
/// fragment does not participate in identity.
#[must_use]
pub fn canonical_key(url: &Url) -> String {
    let scheme = url.scheme().to_ascii_lowercase();
    let host = url.host_str().unwrap_or("").to_ascii_lowercase();
    let port = url
        .port_or_known_default()
        .unwrap_or_else(|| default_port(&scheme));
    let path = if url.path().is_empty() { "/" } else { url.path() };
    match url.query() {
        Some(q) => format!("{scheme}://{host}:{port}{path}?{q}"),
        None => format!("{scheme}://{host}:{port}{path}"),
    }
}

/// Default port for a scheme this crate fetches.
#[must_use]
pub fn default_port(scheme: &str) -> u16 {
    match scheme {
        "https" => 443,
        _ => 80,
    }
}

/// Set of canonical URLs already enqueued or visited.
#[derive(Debug, Default)]
pub struct Blacklist {
    seen: HashSet<String>,
}

impl Blacklist {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `url`; returns `true` when it was not seen before.
    pub fn try_insert(&mut self, url: &Url) -> bool {
        self.seen.insert(canonical_key(url))
    }

    /// Records a pre-computed canonical key.
    pub fn try_insert_key(&mut self, key: String) -> bool {
        self.seen.insert(key)
    }

    /// Whether `url` was already recorded.
    #[must_use]
    pub fn contains(&self, url: &Url) -> bool {
        self.seen.contains(&canonical_key(url))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
