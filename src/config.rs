//! Runtime configuration assembled from the command line.
//!
//! [`Config`] is the immutable settings bundle shared by the coordinator,
//! the workers, and the input driver. It is built once from the parsed CLI
//! arguments and never mutated afterwards.

use std::path::PathBuf;
use std::time::Duration;

/// Per-operation timeout setting.
///
/// Mirrors the CLI convention: `0` means fail immediately, a negative value
/// means wait forever, anything else is a duration in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// No limit.
    Infinite,
    /// Fail without waiting.
    Immediate,
    /// Bounded wait.
    After(Duration),
}

impl Timeout {
    /// Parses a seconds value using the sign convention above.
    #[must_use]
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs < 0.0 {
            Self::Infinite
        } else if secs == 0.0 {
            Self::Immediate
        } else {
            Self::After(Duration::from_secs_f64(secs))
        }
    }

    /// The value to hand to a socket API: `None` disables the timeout.
    #[must_use]
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::Immediate => Some(Duration::from_millis(1)),
            Self::After(d) => Some(d),
        }
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::Infinite
    }
}

/// HTTPS fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpsEnforce {
    /// Fetch URLs with whatever scheme they carry.
    #[default]
    None,
    /// Upgrade http URLs to https, fall back to http when that fails.
    Soft,
    /// Upgrade http URLs to https; never fall back.
    Hard,
}

/// Address-family handling for DNS answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FamilyPreference {
    /// Use answers in resolver order.
    #[default]
    Any,
    /// Move IPv4 answers to the front.
    PreferV4,
    /// Move IPv6 answers to the front.
    PreferV6,
    /// Drop non-IPv4 answers; error when none remain.
    RequireV4,
    /// Drop non-IPv6 answers; error when none remain.
    RequireV6,
}

/// Which resolver backend performs uncached lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsBackendKind {
    /// The operating-system resolver.
    System,
    /// DNS-over-HTTPS against the given resolver endpoint.
    Doh { resolver_url: String },
}

impl Default for DnsBackendKind {
    fn default() -> Self {
        Self::System
    }
}

/// Immutable run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // Recursion.
    pub recursive: bool,
    pub level: u32,
    pub no_parent: bool,
    pub span_hosts: bool,
    pub include_domains: Vec<String>,
    pub exclude_domains: Vec<String>,
    pub page_requisites: bool,

    // Scheme policy.
    pub https_only: bool,
    pub https_enforce: HttpsEnforce,

    // Transfer policy.
    pub max_redirect: u32,
    pub tries: u32,
    pub wait: Option<Duration>,
    pub waitretry: Option<Duration>,
    pub random_wait: bool,
    pub chunk_size: Option<u64>,
    pub metalink: bool,
    pub timestamping: bool,
    pub continue_download: bool,
    pub no_clobber: bool,
    pub quota: Option<u64>,
    pub spider: bool,
    pub robots: bool,

    // Pool & host policy.
    pub threads: usize,
    pub per_host_limit: usize,
    pub failure_threshold: u32,

    // Timeouts.
    pub dns_timeout: Timeout,
    pub connect_timeout: Timeout,
    pub read_timeout: Timeout,

    // Request shaping.
    pub user_agent: String,
    pub referer: Option<String>,
    pub headers: Vec<(String, String)>,
    pub accept_language: Option<String>,
    pub compression: bool,
    pub user: Option<String>,
    pub password: Option<String>,

    // DNS.
    pub dns_backend: DnsBackendKind,
    pub family: FamilyPreference,

    // File layout.
    pub prefix_dir: Option<PathBuf>,
    pub host_directories: bool,
    pub protocol_directories: bool,
    pub cut_dirs: u32,
    pub restrict_file_names: bool,

    // Input.
    pub input_file: Option<String>,
    pub force_html: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recursive: false,
            level: DEFAULT_LEVEL,
            no_parent: false,
            span_hosts: false,
            include_domains: Vec::new(),
            exclude_domains: Vec::new(),
            page_requisites: false,
            https_only: false,
            https_enforce: HttpsEnforce::None,
            max_redirect: DEFAULT_MAX_REDIRECT,
            tries: DEFAULT_TRIES,
            wait: None,
            waitretry: None,
            random_wait: false,
            chunk_size: None,
            metalink: false,
            timestamping: false,
            continue_download: false,
            no_clobber: false,
            quota: None,
            spider: false,
            robots: true,
            threads: DEFAULT_THREADS,
            per_host_limit: 1,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            dns_timeout: Timeout::Infinite,
            connect_timeout: Timeout::Infinite,
            read_timeout: Timeout::Infinite,
            user_agent: default_user_agent(),
            referer: None,
            headers: Vec::new(),
            accept_language: None,
            compression: true,
            user: None,
            password: None,
            dns_backend: DnsBackendKind::System,
            family: FamilyPreference::Any,
            prefix_dir: None,
            host_directories: true,
            protocol_directories: false,
            cut_dirs: 0,
            restrict_file_names: true,
            input_file: None,
            force_html: false,
        }
    }
}

/// Default recursion depth.
pub const DEFAULT_LEVEL: u32 = 5;
/// Default redirect chain limit.
pub const DEFAULT_MAX_REDIRECT: u32 = 20;
/// Default attempts per job.
pub const DEFAULT_TRIES: u32 = 20;
/// Default worker-thread count.
pub const DEFAULT_THREADS: usize = 5;
/// Consecutive connection failures before a host backs off.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

fn default_user_agent() -> String {
    format!("webgrab/{}", env!("CARGO_PKG_VERSION"))
}

/// Parses a byte count with an optional `k`/`m`/`g` suffix (binary units).
///
/// # Errors
///
/// Returns a message when the number is malformed or overflows.
pub fn parse_size(value: &str) -> Result<u64, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty size value".to_string());
    }
    let (digits, multiplier) = match value.chars().last() {
        Some('k' | 'K') => (&value[..value.len() - 1], 1u64 << 10),
        Some('m' | 'M') => (&value[..value.len() - 1], 1u64 << 20),
        Some('g' | 'G') => (&value[..value.len() - 1], 1u64 << 30),
        _ => (value, 1),
    };
    let base: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid size value: {value}"))?;
    base.checked_mul(multiplier)
        .ok_or_else(|| format!("size value out of range: {value}"))
}
