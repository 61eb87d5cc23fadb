//! Error types for the fetch pipeline.
//!
//! Every variant maps to an [`ExitStatus`] class and to a retry
//! classification; both mappings live here so the policy is in one place.

use std::path::PathBuf;

use thiserror::Error;

use crate::error::ExitStatus;
use crate::resolver::ResolveError;

/// Errors raised while fetching one job.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Hostname resolution failed.
    #[error("DNS failure for {host}: {source}")]
    Dns {
        host: String,
        #[source]
        source: ResolveError,
    },

    /// TCP connect failed or was refused.
    #[error("connection failure for {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// TLS handshake or certificate validation failed.
    #[error("TLS failure for {url}: {source}")]
    Tls {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The operation exceeded its timeout.
    #[error("timeout fetching {url}")]
    Timeout { url: String },

    /// Transport-level failure mid-exchange.
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with an error status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// The resource does not exist (HTTP 404).
    #[error("remote file missing: {url}")]
    RemoteMissing { url: String },

    /// Authentication failed (twice-rejected credentials or none configured).
    #[error("authentication failed for {url}")]
    Auth { url: String },

    /// Redirect chain exceeded the configured limit.
    #[error("too many redirects fetching {url} (limit {limit})")]
    TooManyRedirects { url: String, limit: u32 },

    /// The redirect chain revisited a URL.
    #[error("redirect loop detected at {url}")]
    RedirectLoop { url: String },

    /// Protocol-level violation (unparseable response, bad Location).
    #[error("protocol error fetching {url}: {detail}")]
    Protocol { url: String, detail: String },

    /// Local filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Hash verification over a completed multi-part file failed.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The download quota was reached.
    #[error("download quota exceeded")]
    QuotaExceeded,

    /// The run was cancelled by a signal.
    #[error("cancelled")]
    Cancelled,

    /// The URL cannot be fetched (unsupported scheme, no host).
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },
}

impl FetchError {
    pub fn dns(host: impl Into<String>, source: ResolveError) -> Self {
        Self::Dns {
            host: host.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn protocol(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Protocol {
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// Wraps a transport error from reqwest, splitting connect, TLS, and
    /// timeout classes.
    pub fn from_transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else if is_tls_error(&source) {
            Self::Tls { url, source }
        } else if source.is_connect() {
            Self::Connect { url, source }
        } else {
            Self::Network { url, source }
        }
    }

    /// Exit-status class of this error.
    #[must_use]
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Self::Dns { .. } | Self::Connect { .. } | Self::Timeout { .. } | Self::Network { .. } => {
                ExitStatus::Network
            }
            Self::Tls { .. } => ExitStatus::Tls,
            Self::Auth { .. } => ExitStatus::Auth,
            Self::RemoteMissing { .. } => ExitStatus::RemoteMissing,
            Self::HttpStatus { .. }
            | Self::TooManyRedirects { .. }
            | Self::RedirectLoop { .. }
            | Self::Protocol { .. } => ExitStatus::Protocol,
            Self::Io { .. } => ExitStatus::Io,
            Self::Integrity { .. } => ExitStatus::Integrity,
            Self::InvalidUrl { .. } => ExitStatus::Init,
            Self::QuotaExceeded | Self::Cancelled => ExitStatus::Generic,
        }
    }

    /// Whether another attempt at the same job could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect { .. } | Self::Timeout { .. } | Self::Network { .. } => true,
            Self::Dns { source, .. } => source.is_transient(),
            Self::HttpStatus { status, .. } => (500..600).contains(status) || *status == 408,
            _ => false,
        }
    }

    /// Whether the failure counts against the host's consecutive-failure
    /// budget (connection-class failures only).
    #[must_use]
    pub fn is_connection_class(&self) -> bool {
        matches!(
            self,
            Self::Dns { .. }
                | Self::Connect { .. }
                | Self::Tls { .. }
                | Self::Timeout { .. }
                | Self::Network { .. }
                | Self::HttpStatus { status: 500..=599, .. }
        )
    }
}

/// TLS problems surface inside reqwest's error chain without a dedicated
/// kind; sniff the message like the rest of the ecosystem does.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let text = error.to_string().to_lowercase();
    text.contains("certificate") || text.contains("tls") || text.contains("ssl") || text.contains("handshake")
}
