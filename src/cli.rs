//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::{
    Config, DEFAULT_LEVEL, DEFAULT_MAX_REDIRECT, DEFAULT_THREADS, DEFAULT_TRIES, DnsBackendKind,
    FamilyPreference, HttpsEnforce, Timeout, parse_size,
};

/// Recursive, multi-threaded downloader for HTTP and HTTPS.
#[derive(Parser, Debug, Clone)]
#[command(name = "webgrab")]
#[command(author, version, about)]
#[command(
    after_help = "Exit codes:\n  0 = success\n  1 = generic error\n  2 = parse or initialization error\n  3 = file I/O error\n  4 = network failure\n  5 = TLS failure\n  6 = authentication failure\n  7 = protocol error\n  8 = remote resource missing\n  9 = checksum verification failure\nThe lowest non-zero code among all observed errors wins."
)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with_all = ["quiet", "debug"])]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with_all = ["verbose", "debug"])]
    pub quiet: bool,

    /// Enable full debug tracing output
    #[arg(long, conflicts_with_all = ["verbose", "quiet"])]
    pub debug: bool,

    /// Read seed URLs from FILE (use `-` for stdin)
    #[arg(short = 'i', long = "input-file", value_name = "FILE")]
    pub input_file: Option<String>,

    /// Treat the input file as HTML regardless of its name
    #[arg(long = "force-html", requires = "input_file")]
    pub force_html: bool,

    /// Turn on recursive retrieving
    #[arg(short = 'r', long)]
    pub recursive: bool,

    /// Maximum recursion depth
    #[arg(short = 'l', long, default_value_t = DEFAULT_LEVEL, value_name = "N")]
    pub level: u32,

    /// Do not ascend to the parent directory of the seed URLs
    #[arg(long = "no-parent")]
    pub no_parent: bool,

    /// Follow links onto foreign hosts when recursing
    #[arg(short = 'H', long = "span-hosts")]
    pub span_hosts: bool,

    /// Comma-separated list of additional accepted domains
    #[arg(short = 'D', long = "domains", value_name = "LIST", value_delimiter = ',')]
    pub domains: Vec<String>,

    /// Comma-separated list of rejected domains
    #[arg(long = "exclude-domains", value_name = "LIST", value_delimiter = ',')]
    pub exclude_domains: Vec<String>,

    /// Follow only HTTPS links when recursing
    #[arg(long = "https-only")]
    pub https_only: bool,

    /// Upgrade HTTP URLs to HTTPS (soft falls back, hard never does)
    #[arg(long = "https-enforce", value_enum, default_value_t = HttpsEnforceArg::None)]
    pub https_enforce: HttpsEnforceArg,

    /// Also fetch the images, stylesheets, and scripts pages need
    #[arg(short = 'p', long = "page-requisites")]
    pub page_requisites: bool,

    /// Maximum redirections to follow per job
    #[arg(long = "max-redirect", default_value_t = DEFAULT_MAX_REDIRECT, value_name = "N")]
    pub max_redirect: u32,

    /// Attempts per URL (including the first)
    #[arg(short = 't', long, default_value_t = DEFAULT_TRIES, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub tries: u32,

    /// Seconds to wait between requests to the same host
    #[arg(short = 'w', long, value_name = "SEC")]
    pub wait: Option<f64>,

    /// Fixed seconds to wait between retries of a failed fetch
    #[arg(long, value_name = "SEC")]
    pub waitretry: Option<f64>,

    /// Randomize the inter-request wait (0.5x to 1.5x)
    #[arg(long = "random-wait", requires = "wait")]
    pub random_wait: bool,

    /// Split files larger than SIZE into ranged parts (e.g. 1M)
    #[arg(long = "chunk-size", value_name = "SIZE")]
    pub chunk_size: Option<String>,

    /// Process Metalink descriptions and Link headers
    #[arg(long)]
    pub metalink: bool,

    /// Only fetch files newer than the local copy
    #[arg(short = 'N', long)]
    pub timestamping: bool,

    /// Resume partially downloaded files
    #[arg(short = 'c', long = "continue")]
    pub continue_download: bool,

    /// Never overwrite or re-fetch existing files
    #[arg(long = "no-clobber", conflicts_with_all = ["timestamping", "continue_download"])]
    pub no_clobber: bool,

    /// Stop after downloading SIZE bytes in total
    #[arg(long, value_name = "SIZE")]
    pub quota: Option<String>,

    /// Number of download worker threads
    #[arg(long, default_value_t = DEFAULT_THREADS, value_name = "N", value_parser = clap::value_parser!(usize))]
    pub threads: usize,

    /// DNS lookup timeout in seconds (0 = immediate, negative = infinite)
    #[arg(long = "dns-timeout", value_name = "SEC", allow_hyphen_values = true)]
    pub dns_timeout: Option<f64>,

    /// TCP connect timeout in seconds (0 = immediate, negative = infinite)
    #[arg(long = "connect-timeout", value_name = "SEC", allow_hyphen_values = true)]
    pub connect_timeout: Option<f64>,

    /// Socket read timeout in seconds (0 = immediate, negative = infinite)
    #[arg(long = "read-timeout", value_name = "SEC", allow_hyphen_values = true)]
    pub read_timeout: Option<f64>,

    /// Identify as AGENT instead of the default
    #[arg(short = 'U', long = "user-agent", value_name = "AGENT")]
    pub user_agent: Option<String>,

    /// Send URL as the default Referer header
    #[arg(long, value_name = "URL")]
    pub referer: Option<String>,

    /// Extra request header as `Name: value` (repeatable)
    #[arg(long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Accept-Language request header value
    #[arg(long = "accept-language", value_name = "LANG")]
    pub accept_language: Option<String>,

    /// Do not advertise or decode compressed responses
    #[arg(long = "no-compression")]
    pub no_compression: bool,

    /// Username for server authentication
    #[arg(long, value_name = "USER")]
    pub user: Option<String>,

    /// Password for server authentication
    #[arg(long, value_name = "PASS")]
    pub password: Option<String>,

    /// Ignore robots.txt and the robots nofollow convention
    #[arg(long = "no-robots")]
    pub no_robots: bool,

    /// Check that pages exist without saving anything
    #[arg(long)]
    pub spider: bool,

    /// Save all files under DIR
    #[arg(short = 'P', long = "directory-prefix", value_name = "DIR")]
    pub directory_prefix: Option<PathBuf>,

    /// Do not create per-host directories
    #[arg(long = "no-host-directories")]
    pub no_host_directories: bool,

    /// Put http/https directories above the host directories
    #[arg(long = "protocol-directories")]
    pub protocol_directories: bool,

    /// Ignore the first N remote directory components
    #[arg(long = "cut-dirs", default_value_t = 0, value_name = "N")]
    pub cut_dirs: u32,

    /// Local filename character policy
    #[arg(long = "restrict-file-names", value_enum, default_value_t = RestrictArg::Portable)]
    pub restrict_file_names: RestrictArg,

    /// Resolver backend for hostname lookups
    #[arg(long = "dns-backend", value_enum, default_value_t = DnsBackendArg::System)]
    pub dns_backend: DnsBackendArg,

    /// DNS-over-HTTPS resolver endpoint
    #[arg(long = "doh-server", value_name = "URL", default_value = "https://cloudflare-dns.com/dns-query")]
    pub doh_server: String,

    /// Address family preference for DNS answers
    #[arg(long = "prefer-family", value_enum, default_value_t = FamilyArg::None)]
    pub prefer_family: FamilyArg,

    /// Connect to IPv4 addresses only
    #[arg(short = '4', long = "inet4-only", conflicts_with = "inet6_only")]
    pub inet4_only: bool,

    /// Connect to IPv6 addresses only
    #[arg(short = '6', long = "inet6-only")]
    pub inet6_only: bool,

    /// URLs to download.
    /// Use `--` to pass a URL that starts with `-`.
    pub urls: Vec<String>,
}

/// `--https-enforce` values.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpsEnforceArg {
    None,
    Soft,
    Hard,
}

/// `--restrict-file-names` values.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictArg {
    /// Replace characters that are unsafe on common filesystems.
    Portable,
    /// Keep names exactly as the URL spells them.
    None,
}

/// `--dns-backend` values.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsBackendArg {
    System,
    Doh,
}

/// `--prefer-family` values.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyArg {
    None,
    #[value(name = "IPv4", alias = "ipv4")]
    Ipv4,
    #[value(name = "IPv6", alias = "ipv6")]
    Ipv6,
}

impl Cli {
    /// Builds the run configuration, consuming the parsed arguments.
    ///
    /// # Errors
    ///
    /// Returns a message for values clap cannot validate alone (sizes,
    /// malformed headers).
    pub fn into_config(self) -> Result<(Config, Vec<String>), String> {
        let mut headers = Vec::new();
        for raw in &self.headers {
            let (name, value) = raw
                .split_once(':')
                .ok_or_else(|| format!("invalid header (expected `Name: value`): {raw}"))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(format!("invalid header (empty name): {raw}"));
            }
            headers.push((name.to_string(), value.trim().to_string()));
        }

        let chunk_size = self.chunk_size.as_deref().map(parse_size).transpose()?;
        if chunk_size == Some(0) {
            return Err("chunk size must be positive".to_string());
        }
        let quota = self.quota.as_deref().map(parse_size).transpose()?;

        let family = if self.inet4_only {
            FamilyPreference::RequireV4
        } else if self.inet6_only {
            FamilyPreference::RequireV6
        } else {
            match self.prefer_family {
                FamilyArg::None => FamilyPreference::Any,
                FamilyArg::Ipv4 => FamilyPreference::PreferV4,
                FamilyArg::Ipv6 => FamilyPreference::PreferV6,
            }
        };

        let defaults = Config::default();
        let cfg = Config {
            recursive: self.recursive,
            level: self.level,
            no_parent: self.no_parent,
            span_hosts: self.span_hosts,
            include_domains: self.domains,
            exclude_domains: self.exclude_domains,
            page_requisites: self.page_requisites,
            https_only: self.https_only,
            https_enforce: match self.https_enforce {
                HttpsEnforceArg::None => HttpsEnforce::None,
                HttpsEnforceArg::Soft => HttpsEnforce::Soft,
                HttpsEnforceArg::Hard => HttpsEnforce::Hard,
            },
            max_redirect: self.max_redirect,
            tries: self.tries,
            wait: self.wait.filter(|w| *w > 0.0).map(std::time::Duration::from_secs_f64),
            waitretry: self
                .waitretry
                .filter(|w| *w > 0.0)
                .map(std::time::Duration::from_secs_f64),
            random_wait: self.random_wait,
            chunk_size,
            metalink: self.metalink,
            timestamping: self.timestamping,
            continue_download: self.continue_download,
            no_clobber: self.no_clobber,
            quota,
            spider: self.spider,
            robots: !self.no_robots,
            threads: self.threads.max(1),
            dns_timeout: self.dns_timeout.map_or(defaults.dns_timeout, Timeout::from_secs_f64),
            connect_timeout: self
                .connect_timeout
                .map_or(defaults.connect_timeout, Timeout::from_secs_f64),
            read_timeout: self
                .read_timeout
                .map_or(defaults.read_timeout, Timeout::from_secs_f64),
            user_agent: self.user_agent.unwrap_or(defaults.user_agent),
            referer: self.referer,
            headers,
            accept_language: self.accept_language,
            compression: !self.no_compression,
            user: self.user,
            password: self.password,
            dns_backend: match self.dns_backend {
                DnsBackendArg::System => DnsBackendKind::System,
                DnsBackendArg::Doh => DnsBackendKind::Doh {
                    resolver_url: self.doh_server,
                },
            },
            family,
            prefix_dir: self.directory_prefix,
            host_directories: !self.no_host_directories,
            protocol_directories: self.protocol_directories,
            cut_dirs: self.cut_dirs,
            restrict_file_names: self.restrict_file_names == RestrictArg::Portable,
            input_file: self.input_file,
            force_html: self.force_html,
            ..defaults
        };
        Ok((cfg, self.urls))
    }

    /// Default tracing filter for the chosen verbosity.
    #[must_use]
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "trace"
        } else if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }
}
