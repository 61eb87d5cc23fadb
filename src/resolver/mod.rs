//! Blocking DNS resolution with a shared, process-wide cache.
//!
//! The cache guarantees that a cached (host, port) pair never triggers a
//! network lookup, and that concurrent cold-cache queries for the same pair
//! collapse into a single backend call: the cache mutex is held across the
//! lookup, so every racer blocks until the winner has stored its answer.
//! Contention is therefore bounded by the number of distinct hostnames, not
//! by request rate.

mod backend;

pub use backend::{DnsBackend, DohBackend, SystemBackend};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::{Config, DnsBackendKind, FamilyPreference, Timeout};
use crate::progress::StatsSink;

/// Attempts for lookups that fail transiently.
const TRANSIENT_ATTEMPTS: u32 = 3;
/// Pause between transient-failure attempts.
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(100);

/// Errors from hostname resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The resolver is momentarily unable to answer (equivalent of EAI_AGAIN).
    #[error("temporary failure resolving {host}: {source}")]
    Transient {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The name does not resolve.
    #[error("failed to resolve {host}: {source}")]
    Permanent {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The lookup succeeded but returned nothing usable.
    #[error("no addresses found for {host}")]
    NoAddresses { host: String },

    /// A strict family requirement could not be satisfied.
    #[error("no {family} address for {host}")]
    WrongFamily { host: String, family: &'static str },

    /// Backend-level failure (DoH transport, malformed answer).
    #[error("resolver backend error: {0}")]
    Backend(String),
}

impl ResolveError {
    pub(crate) fn transient(host: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transient {
            host: host.into(),
            source,
        }
    }

    pub(crate) fn permanent(host: impl Into<String>, source: std::io::Error) -> Self {
        Self::Permanent {
            host: host.into(),
            source,
        }
    }

    pub(crate) fn no_addresses(host: impl Into<String>) -> Self {
        Self::NoAddresses { host: host.into() }
    }

    /// Whether retrying the same query later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Per-query options overriding the configured defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    pub family: Option<FamilyPreference>,
    pub timeout: Option<Timeout>,
}

/// Process-wide DNS cache with single-flight lookups.
pub struct DnsCache {
    entries: Mutex<HashMap<(String, u16), Arc<Vec<SocketAddr>>>>,
    backend: Box<dyn DnsBackend>,
    default_family: FamilyPreference,
    default_timeout: Timeout,
    stats: Arc<dyn StatsSink>,
}

impl std::fmt::Debug for DnsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsCache")
            .field("entries", &lock(&self.entries).len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned lock only means another thread panicked while holding it;
    // the map itself stays structurally sound.
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl DnsCache {
    /// Builds a cache with the backend selected by `cfg`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Backend`] when the DoH client cannot be built.
    pub fn from_config(cfg: &Config, stats: Arc<dyn StatsSink>) -> Result<Self, ResolveError> {
        let backend: Box<dyn DnsBackend> = match &cfg.dns_backend {
            DnsBackendKind::System => Box::new(SystemBackend),
            DnsBackendKind::Doh { resolver_url } => Box::new(DohBackend::new(
                resolver_url,
                cfg.dns_timeout.as_duration(),
            )?),
        };
        Ok(Self::new(backend, cfg.family, cfg.dns_timeout, stats))
    }

    /// Builds a cache over an explicit backend.
    pub fn new(
        backend: Box<dyn DnsBackend>,
        default_family: FamilyPreference,
        default_timeout: Timeout,
        stats: Arc<dyn StatsSink>,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            backend,
            default_family,
            default_timeout,
            stats,
        }
    }

    /// Resolves `host`/`port`, consulting the cache first.
    ///
    /// Cache entries are immutable once stored; callers get a shared view of
    /// the winner's answer.
    ///
    /// # Errors
    ///
    /// Propagates backend failures after exhausting transient retries, and
    /// family violations under a strict preference.
    #[instrument(level = "debug", skip(self, opts))]
    pub fn resolve(
        &self,
        host: &str,
        port: u16,
        opts: &ResolveOptions,
    ) -> Result<Arc<Vec<SocketAddr>>, ResolveError> {
        let key = (host.to_ascii_lowercase(), port);
        let family = opts.family.unwrap_or(self.default_family);
        let timeout = opts.timeout.unwrap_or(self.default_timeout).as_duration();

        let mut entries = lock(&self.entries);
        if let Some(found) = entries.get(&key) {
            debug!(host, port, "resolver cache hit");
            return Ok(Arc::clone(found));
        }

        // Single-flight: the lock stays held across the lookup (including
        // transient-retry sleeps) so concurrent identical queries block here
        // and then take the cache-hit path above.
        let started = Instant::now();
        let raw = self.lookup_with_retry(&key.0, port, timeout)?;
        let ordered = apply_family_preference(raw, family, &key.0)?;
        self.stats
            .dns_resolved(&key.0, port, &ordered, started.elapsed());
        debug!(host, port, count = ordered.len(), "resolved");

        let entry = Arc::new(ordered);
        entries.insert(key, Arc::clone(&entry));
        Ok(entry)
    }

    fn lookup_with_retry(
        &self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Vec<SocketAddr>, ResolveError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.backend.lookup(host, port, timeout) {
                Ok(addrs) => return Ok(addrs),
                Err(e) if e.is_transient() && attempt < TRANSIENT_ATTEMPTS => {
                    debug!(host, attempt, error = %e, "transient resolve failure, retrying");
                    std::thread::sleep(TRANSIENT_BACKOFF);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Number of cached (host, port) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reorders or filters `addrs` according to `family`, preserving the relative
/// order within each family.
fn apply_family_preference(
    addrs: Vec<SocketAddr>,
    family: FamilyPreference,
    host: &str,
) -> Result<Vec<SocketAddr>, ResolveError> {
    match family {
        FamilyPreference::Any => Ok(addrs),
        FamilyPreference::PreferV4 => Ok(stable_partition(addrs, SocketAddr::is_ipv4)),
        FamilyPreference::PreferV6 => Ok(stable_partition(addrs, SocketAddr::is_ipv6)),
        FamilyPreference::RequireV4 => {
            let kept: Vec<SocketAddr> = addrs.into_iter().filter(SocketAddr::is_ipv4).collect();
            if kept.is_empty() {
                Err(ResolveError::WrongFamily {
                    host: host.to_string(),
                    family: "IPv4",
                })
            } else {
                Ok(kept)
            }
        }
        FamilyPreference::RequireV6 => {
            let kept: Vec<SocketAddr> = addrs.into_iter().filter(SocketAddr::is_ipv6).collect();
            if kept.is_empty() {
                Err(ResolveError::WrongFamily {
                    host: host.to_string(),
                    family: "IPv6",
                })
            } else {
                Ok(kept)
            }
        }
    }
}

fn stable_partition<F>(addrs: Vec<SocketAddr>, preferred: F) -> Vec<SocketAddr>
where
    F: Fn(&SocketAddr) -> bool,
{
    let (mut head, tail): (Vec<SocketAddr>, Vec<SocketAddr>) =
        addrs.into_iter().partition(|a| preferred(a));
    head.extend(tail);
    head
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::progress::NullStats;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn v4(last: u8) -> SocketAddr {
        SocketAddr::new(Ipv4Addr::new(192, 0, 2, last).into(), 80)
    }

    fn v6(last: u16) -> SocketAddr {
        SocketAddr::new(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, last).into(), 80)
    }

    /// Backend that counts lookups and serves a fixed answer.
    struct CountingBackend {
        calls: AtomicUsize,
        answer: Vec<SocketAddr>,
    }

    impl CountingBackend {
        fn new(answer: Vec<SocketAddr>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                answer,
            }
        }
    }

    impl DnsBackend for CountingBackend {
        fn lookup(
            &self,
            _host: &str,
            _port: u16,
            _timeout: Option<Duration>,
        ) -> Result<Vec<SocketAddr>, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Simulate real lookup latency so racing threads overlap.
            std::thread::sleep(Duration::from_millis(30));
            Ok(self.answer.clone())
        }
    }

    /// Backend that fails transiently `failures` times, then succeeds.
    struct FlakyBackend {
        calls: AtomicUsize,
        failures: usize,
    }

    impl DnsBackend for FlakyBackend {
        fn lookup(
            &self,
            host: &str,
            _port: u16,
            _timeout: Option<Duration>,
        ) -> Result<Vec<SocketAddr>, ResolveError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ResolveError::transient(
                    host,
                    std::io::Error::new(std::io::ErrorKind::WouldBlock, "try again"),
                ))
            } else {
                Ok(vec![v4(1)])
            }
        }
    }

    fn cache_over(backend: Box<dyn DnsBackend>) -> DnsCache {
        DnsCache::new(
            backend,
            FamilyPreference::Any,
            Timeout::Infinite,
            Arc::new(NullStats),
        )
    }

    // ==================== Cache behavior ====================

    #[test]
    fn test_cache_hit_skips_backend() {
        let cache = cache_over(Box::new(CountingBackend::new(vec![v4(1)])));
        let first = cache
            .resolve("example.com", 80, &ResolveOptions::default())
            .unwrap();
        let second = cache
            .resolve("example.com", 80, &ResolveOptions::default())
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_key_is_case_insensitive_host_plus_port() {
        let cache = cache_over(Box::new(CountingBackend::new(vec![v4(1)])));
        cache
            .resolve("Example.COM", 80, &ResolveOptions::default())
            .unwrap();
        cache
            .resolve("example.com", 80, &ResolveOptions::default())
            .unwrap();
        assert_eq!(cache.len(), 1);
        cache
            .resolve("example.com", 443, &ResolveOptions::default())
            .unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_concurrent_resolves_single_flight() {
        let backend = Arc::new(CountingBackend::new(vec![v4(7)]));
        struct Shared(Arc<CountingBackend>);
        impl DnsBackend for Shared {
            fn lookup(
                &self,
                host: &str,
                port: u16,
                timeout: Option<Duration>,
            ) -> Result<Vec<SocketAddr>, ResolveError> {
                self.0.lookup(host, port, timeout)
            }
        }

        let cache = Arc::new(cache_over(Box::new(Shared(Arc::clone(&backend)))));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                cache
                    .resolve("example.com", 80, &ResolveOptions::default())
                    .unwrap()
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 1, "one lookup total");
        assert!(results.iter().all(|r| **r == vec![v4(7)]));
    }

    #[test]
    fn test_transient_failures_retry_then_succeed() {
        let cache = cache_over(Box::new(FlakyBackend {
            calls: AtomicUsize::new(0),
            failures: 2,
        }));
        let addrs = cache
            .resolve("flaky.test", 80, &ResolveOptions::default())
            .unwrap();
        assert_eq!(*addrs, vec![v4(1)]);
    }

    #[test]
    fn test_transient_failures_exhaust_attempts() {
        let cache = cache_over(Box::new(FlakyBackend {
            calls: AtomicUsize::new(0),
            failures: 10,
        }));
        let err = cache
            .resolve("flaky.test", 80, &ResolveOptions::default())
            .unwrap_err();
        assert!(err.is_transient());
        assert!(cache.is_empty(), "failed lookups are not cached");
    }

    // ==================== Family preference ====================

    #[test]
    fn test_prefer_v4_moves_v4_to_front_preserving_order() {
        let mixed = vec![v6(1), v4(1), v6(2), v4(2)];
        let ordered = apply_family_preference(mixed, FamilyPreference::PreferV4, "h").unwrap();
        assert_eq!(ordered, vec![v4(1), v4(2), v6(1), v6(2)]);
    }

    #[test]
    fn test_prefer_v6_moves_v6_to_front_preserving_order() {
        let mixed = vec![v4(1), v6(1), v4(2), v6(2)];
        let ordered = apply_family_preference(mixed, FamilyPreference::PreferV6, "h").unwrap();
        assert_eq!(ordered, vec![v6(1), v6(2), v4(1), v4(2)]);
    }

    #[test]
    fn test_require_v4_filters_and_errors_when_empty() {
        let mixed = vec![v6(1), v4(1)];
        let kept = apply_family_preference(mixed, FamilyPreference::RequireV4, "h").unwrap();
        assert_eq!(kept, vec![v4(1)]);

        let only_v6 = vec![v6(1)];
        let err = apply_family_preference(only_v6, FamilyPreference::RequireV4, "h").unwrap_err();
        assert!(matches!(
            err,
            ResolveError::WrongFamily { family: "IPv4", .. }
        ));
    }

    #[test]
    fn test_require_v6_filters_and_errors_when_empty() {
        let only_v4 = vec![v4(1)];
        let err = apply_family_preference(only_v4, FamilyPreference::RequireV6, "h").unwrap_err();
        assert!(matches!(
            err,
            ResolveError::WrongFamily { family: "IPv6", .. }
        ));
    }

    #[test]
    fn test_any_preference_is_identity() {
        let mixed = vec![v6(1), v4(1)];
        let same = apply_family_preference(mixed.clone(), FamilyPreference::Any, "h").unwrap();
        assert_eq!(same, mixed);
    }
}
