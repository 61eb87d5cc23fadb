//! Work items flowing through the coordinator.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use url::Url;

use crate::download::parts::PartSet;
use crate::queue::blacklist::default_port;

/// Identity of an origin: scheme, lowercased host, explicit port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl HostKey {
    /// Extracts the host key from a parsed URL.
    ///
    /// Returns `None` for URLs without a host (e.g. `data:`).
    #[must_use]
    pub fn from_url(url: &Url) -> Option<Self> {
        let scheme = url.scheme().to_ascii_lowercase();
        let host = url.host_str()?.to_ascii_lowercase();
        let port = url
            .port_or_known_default()
            .unwrap_or_else(|| default_port(&scheme));
        Some(Self { scheme, host, port })
    }

    /// Whether connections to this origin use TLS.
    #[must_use]
    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Role of a plain fetch job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchFlags {
    /// This is the `/robots.txt` fetch gating its host.
    pub robots: bool,
    /// The body is a sitemap (XML, gzip, or plain text), not page content.
    pub sitemap: bool,
    /// The job was created by following a redirect.
    pub redirect: bool,
    /// The body is a Metalink description document.
    pub metalink_doc: bool,
    /// Discovered as an inline requisite (src-ish reference), not navigation.
    pub requisite: bool,
}

/// What a worker should do with a job.
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Fetch the job's URL and run the response pipeline.
    Fetch(FetchFlags),
    /// Fetch one piece of a multi-part file from the part set's mirrors.
    Part {
        set: Arc<PartSet>,
        piece: usize,
    },
}

/// A unit of work: one URL plus the context needed to fetch it.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u64,
    pub url: Url,
    pub referer: Option<Url>,
    /// Length of the redirect chain that produced this job.
    pub redirect_depth: u32,
    /// Canonical keys of the chain, for loop detection.
    pub redirect_chain: Vec<String>,
    /// Recursion depth; seeds are level 0.
    pub level: u32,
    /// Origin the job is queued under (mirror 0 for part jobs).
    pub host: HostKey,
    /// Forced local filename; computed from the URL when absent.
    pub filename: Option<PathBuf>,
    pub kind: JobKind,
    /// Failed attempts so far (fetch jobs: per-URL tries; part jobs: mirror
    /// rotation index).
    pub attempt: u32,
    /// A 401 challenge retry has already been spent.
    pub auth_retried: bool,
}

impl Job {
    /// Creates a plain fetch job at recursion level `level`.
    #[must_use]
    pub fn fetch(id: u64, url: Url, host: HostKey, level: u32, flags: FetchFlags) -> Self {
        Self {
            id,
            url,
            referer: None,
            redirect_depth: 0,
            redirect_chain: Vec::new(),
            level,
            host,
            filename: None,
            kind: JobKind::Fetch(flags),
            attempt: 0,
            auth_retried: false,
        }
    }

    /// Flags of a fetch job; `None` for part jobs.
    #[must_use]
    pub fn fetch_flags(&self) -> Option<FetchFlags> {
        match &self.kind {
            JobKind::Fetch(flags) => Some(*flags),
            JobKind::Part { .. } => None,
        }
    }

    #[must_use]
    pub fn is_robots(&self) -> bool {
        self.fetch_flags().is_some_and(|f| f.robots)
    }

    #[must_use]
    pub fn is_part(&self) -> bool {
        matches!(self.kind, JobKind::Part { .. })
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            JobKind::Fetch(_) => write!(f, "job#{} {}", self.id, self.url),
            JobKind::Part { piece, .. } => {
                write!(f, "job#{} part {} of {}", self.id, piece, self.url)
            }
        }
    }
}
