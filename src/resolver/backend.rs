//! Resolver backends: the OS resolver and DNS-over-HTTPS.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};

use super::ResolveError;

/// A blocking hostname lookup.
///
/// Implementations do the raw lookup only; caching, retries, and
/// family-preference handling live in [`super::DnsCache`].
pub trait DnsBackend: Send + Sync {
    /// Resolves `host` to socket addresses carrying `port`.
    fn lookup(
        &self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Vec<SocketAddr>, ResolveError>;
}

/// The operating-system resolver (`getaddrinfo` behind `ToSocketAddrs`).
///
/// The OS call has no timeout knob; the configured timeout is accepted but
/// enforcement is left to the host system's resolver configuration.
#[derive(Debug, Default)]
pub struct SystemBackend;

impl DnsBackend for SystemBackend {
    fn lookup(
        &self,
        host: &str,
        port: u16,
        _timeout: Option<Duration>,
    ) -> Result<Vec<SocketAddr>, ResolveError> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|source| classify_io(host, source))?
            .collect();
        if addrs.is_empty() {
            return Err(ResolveError::no_addresses(host));
        }
        Ok(addrs)
    }
}

fn classify_io(host: &str, source: std::io::Error) -> ResolveError {
    // getaddrinfo surfaces EAI_AGAIN through std as WouldBlock/TimedOut;
    // those are worth retrying, the rest are not.
    match source.kind() {
        std::io::ErrorKind::WouldBlock
        | std::io::ErrorKind::Interrupted
        | std::io::ErrorKind::TimedOut => ResolveError::transient(host, source),
        _ => ResolveError::permanent(host, source),
    }
}

/// DNS-over-HTTPS backend speaking the JSON query format
/// (`accept: application/dns-json`).
pub struct DohBackend {
    resolver_url: String,
    client: reqwest::blocking::Client,
}

impl std::fmt::Debug for DohBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DohBackend")
            .field("resolver_url", &self.resolver_url)
            .finish_non_exhaustive()
    }
}

impl DohBackend {
    /// Creates a backend querying `resolver_url` (e.g.
    /// `https://cloudflare-dns.com/dns-query`).
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Backend`] when the HTTP client cannot be built.
    pub fn new(resolver_url: &str, timeout: Option<Duration>) -> Result<Self, ResolveError> {
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t).connect_timeout(t);
        }
        let client = builder
            .build()
            .map_err(|e| ResolveError::Backend(e.to_string()))?;
        Ok(Self {
            resolver_url: resolver_url.to_string(),
            client,
        })
    }

    fn query(&self, host: &str, rrtype: &str) -> Result<Vec<IpAddr>, ResolveError> {
        let response = self
            .client
            .get(&self.resolver_url)
            .query(&[("name", host), ("type", rrtype)])
            .header("accept", "application/dns-json")
            .send()
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ResolveError::transient(host, std::io::Error::other(e.to_string()))
                } else {
                    ResolveError::Backend(e.to_string())
                }
            })?;
        if !response.status().is_success() {
            return Err(ResolveError::Backend(format!(
                "DoH resolver returned HTTP {}",
                response.status().as_u16()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .map_err(|e| ResolveError::Backend(e.to_string()))?;

        let mut out = Vec::new();
        if let Some(answers) = body.get("Answer").and_then(|a| a.as_array()) {
            for answer in answers {
                // type 1 = A, type 28 = AAAA; skip CNAMEs and anything else.
                let rtype = answer.get("type").and_then(serde_json::Value::as_u64);
                if !matches!(rtype, Some(1 | 28)) {
                    continue;
                }
                if let Some(ip) = answer
                    .get("data")
                    .and_then(|d| d.as_str())
                    .and_then(|d| d.parse::<IpAddr>().ok())
                {
                    out.push(ip);
                } else {
                    warn!(host, "unparseable address in DoH answer");
                }
            }
        }
        Ok(out)
    }
}

impl DnsBackend for DohBackend {
    fn lookup(
        &self,
        host: &str,
        port: u16,
        _timeout: Option<Duration>,
    ) -> Result<Vec<SocketAddr>, ResolveError> {
        // Literal addresses never go over the wire.
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        let mut ips = self.query(host, "A")?;
        match self.query(host, "AAAA") {
            Ok(v6) => ips.extend(v6),
            // A v6 failure with usable v4 answers is not fatal.
            Err(e) if !ips.is_empty() => debug!(host, error = %e, "AAAA query failed"),
            Err(e) => return Err(e),
        }

        if ips.is_empty() {
            return Err(ResolveError::no_addresses(host));
        }
        Ok(ips
            .into_iter()
            .map(|ip| SocketAddr::new(ip, port))
            .collect())
    }
}
