//! robots.txt parsing.
//!
//! Supports `User-agent: *` sections with `Disallow: /path` rules plus
//! top-level `Sitemap:` pointers. Fetching and per-host gating live in the
//! coordinator; this module only turns a body into a [`RobotsPolicy`].

/// Parsed robots rules for one host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsPolicy {
    /// Disallowed path prefixes, longest first.
    disallowed: Vec<String>,
    /// Sitemap URLs advertised by the file.
    sitemaps: Vec<String>,
}

impl RobotsPolicy {
    /// Policy with explicit disallow prefixes (rules are normalized and
    /// sorted longest-first).
    #[must_use]
    pub fn from_rules(rules: Vec<String>) -> Self {
        let mut disallowed: Vec<String> = rules
            .into_iter()
            .map(|r| normalize_disallow_path(&r))
            .filter(|r| !r.is_empty())
            .collect();
        disallowed.sort_by_key(|p| std::cmp::Reverse(p.len()));
        disallowed.dedup();
        Self {
            disallowed,
            sitemaps: Vec::new(),
        }
    }

    /// Parses a robots.txt body. An empty or unparseable body yields an
    /// all-permissive policy.
    #[must_use]
    pub fn parse(body: &str) -> Self {
        let mut in_star = false;
        let mut disallowed = Vec::new();
        let mut sitemaps = Vec::new();

        for line in body.lines() {
            // Strip comments before matching directives.
            let line = match line.find('#') {
                Some(idx) => line[..idx].trim(),
                None => line.trim(),
            };
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = strip_directive(line, "user-agent:") {
                in_star = rest == "*";
                continue;
            }
            if let Some(rest) = strip_directive(line, "sitemap:") {
                // Sitemap records are global, not section-scoped.
                if !rest.is_empty() {
                    sitemaps.push(rest.to_string());
                }
                continue;
            }
            if in_star {
                if let Some(rest) = strip_directive(line, "disallow:") {
                    let prefix = normalize_disallow_path(rest);
                    if !prefix.is_empty() && !disallowed.contains(&prefix) {
                        disallowed.push(prefix);
                    }
                }
            }
        }

        disallowed.sort_by_key(|p| std::cmp::Reverse(p.len()));
        Self {
            disallowed,
            sitemaps,
        }
    }

    /// Whether `path` survives the disallow rules.
    #[must_use]
    pub fn allows(&self, path: &str) -> bool {
        !self
            .disallowed
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Sitemap URLs advertised by the robots file.
    #[must_use]
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    #[must_use]
    pub fn is_permissive(&self) -> bool {
        self.disallowed.is_empty()
    }
}

fn strip_directive<'a>(line: &'a str, directive: &str) -> Option<&'a str> {
    if line.len() < directive.len() {
        return None;
    }
    let (head, tail) = line.split_at(directive.len());
    if head.eq_ignore_ascii_case(directive) {
        Some(tail.trim())
    } else {
        None
    }
}

fn normalize_disallow_path(path: &str) -> String {
    let s = path.trim();
    if s.is_empty() {
        return String::new();
    }
    if s.starts_with('/') {
        s.to_string()
    } else {
        format!("/{s}")
    }
}
