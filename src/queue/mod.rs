//! The download coordinator: global job queue, host registry, and blacklist
//! behind one mutex and two condition variables.
//!
//! `work_available` wakes workers when jobs arrive or the input closes;
//! `work_completed` wakes the controller after every finished job. Critical
//! sections never touch the network.
//!
//! Ordering guarantees: FIFO within a host, any order across hosts. Part
//! jobs live in their own FIFO served ahead of the host queues and are
//! exempt from the per-host in-flight limit (ranged transfers exist to open
//! parallel connections).

pub mod blacklist;
pub mod host;
pub mod job;

pub use blacklist::{Blacklist, canonical_key};
pub use host::{HostState, RobotsGate};
pub use job::{FetchFlags, HostKey, Job, JobKind};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::Config;
use crate::download::parts::PartSet;
use crate::download::robots::RobotsPolicy;

/// Result of a non-blocking dequeue attempt.
#[derive(Debug)]
pub enum Polled {
    /// A job to run.
    Job(Job),
    /// Nothing dispatchable before this instant.
    WaitUntil(Instant),
    /// No queued work at all; `drained` is set once nothing can arrive
    /// anymore (input closed, nothing in flight).
    Empty { drained: bool },
}

/// Why an enqueue attempt did not queue a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Already fetched or queued in this run.
    Duplicate,
    /// robots.txt rules exclude the path (informational, not an error).
    RobotsDisallowed,
    /// The host was blocked by a final failure.
    HostBlocked,
    /// Host/scheme filters rejected the URL.
    OutOfScope,
}

#[derive(Debug, Default)]
struct SeedScope {
    hosts: HashSet<String>,
    /// (host, parent directory); `None` directory = any path permitted.
    parents: Vec<(String, Option<String>)>,
}

#[derive(Debug)]
struct CoordState {
    hosts: HashMap<HostKey, HostState>,
    host_order: Vec<HostKey>,
    parts: VecDeque<Job>,
    blacklist: Blacklist,
    pending: usize,
    in_flight: usize,
    input_open: bool,
    terminating: bool,
    scope: SeedScope,
}

/// Snapshot of the queue counters, for the controller and for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub in_flight: usize,
    pub input_open: bool,
    pub terminating: bool,
}

impl QueueSnapshot {
    /// True when no work remains and none can arrive.
    #[must_use]
    pub fn drained(&self) -> bool {
        self.pending == 0 && self.in_flight == 0 && !self.input_open
    }
}

/// Shared coordinator handed to every worker, the input driver, and the
/// controller.
pub struct Coordinator {
    cfg: Arc<Config>,
    next_id: AtomicU64,
    state: Mutex<CoordState>,
    work_available: Condvar,
    work_completed: Condvar,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("Coordinator")
            .field("pending", &snap.pending)
            .field("in_flight", &snap.in_flight)
            .field("input_open", &snap.input_open)
            .finish_non_exhaustive()
    }
}

fn lock<'a>(state: &'a Mutex<CoordState>) -> MutexGuard<'a, CoordState> {
    state
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Coordinator {
    #[must_use]
    pub fn new(cfg: Arc<Config>) -> Self {
        Self {
            cfg,
            next_id: AtomicU64::new(1),
            state: Mutex::new(CoordState {
                hosts: HashMap::new(),
                host_order: Vec::new(),
                parts: VecDeque::new(),
                blacklist: Blacklist::new(),
                pending: 0,
                in_flight: 0,
                input_open: true,
                terminating: false,
                scope: SeedScope::default(),
            }),
            work_available: Condvar::new(),
            work_completed: Condvar::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocates an id for a job built outside the coordinator (redirects,
    /// Metalink description fetches).
    #[must_use]
    pub fn next_job_id(&self) -> u64 {
        self.allocate_id()
    }

    // ==================== Enqueue paths ====================

    /// Queues a seed URL, recording its host and parent directory for the
    /// recursion scope.
    #[instrument(level = "debug", skip(self))]
    pub fn add_seed(&self, url: Url) -> EnqueueOutcome {
        let Some(key) = HostKey::from_url(&url) else {
            return EnqueueOutcome::OutOfScope;
        };
        if key.scheme != "http" && key.scheme != "https" {
            return EnqueueOutcome::OutOfScope;
        }

        let mut st = lock(&self.state);
        st.scope.hosts.insert(key.host.clone());
        st.scope
            .parents
            .push((key.host.clone(), parent_dir(url.path())));

        if !st.blacklist.try_insert(&url) {
            return EnqueueOutcome::Duplicate;
        }
        let job = Job::fetch(self.allocate_id(), url, key, 0, FetchFlags::default());
        self.enqueue_locked(&mut st, job);
        EnqueueOutcome::Queued
    }

    /// Queues a URL discovered during recursion, applying host scope,
    /// no-parent, robots, and at-most-once filtering.
    ///
    /// Depth and scheme filters that need only the configuration are the
    /// caller's responsibility.
    pub fn enqueue_discovered(
        &self,
        url: Url,
        referer: Option<Url>,
        level: u32,
        flags: FetchFlags,
    ) -> EnqueueOutcome {
        let Some(key) = HostKey::from_url(&url) else {
            return EnqueueOutcome::OutOfScope;
        };
        if key.scheme != "http" && key.scheme != "https" {
            return EnqueueOutcome::OutOfScope;
        }

        let mut st = lock(&self.state);

        if !self.host_in_scope(&st, &key.host) {
            return EnqueueOutcome::OutOfScope;
        }
        if self.cfg.no_parent && !parent_permits(&st.scope, &key.host, url.path()) {
            return EnqueueOutcome::OutOfScope;
        }
        if let Some(host) = st.hosts.get(&key) {
            if host.blocked {
                return EnqueueOutcome::HostBlocked;
            }
            if host.gate == RobotsGate::Ready && !host.robots_allows(url.path()) {
                info!(%url, "not following: excluded by robots.txt");
                return EnqueueOutcome::RobotsDisallowed;
            }
        }
        if !st.blacklist.try_insert(&url) {
            return EnqueueOutcome::Duplicate;
        }

        let mut job = Job::fetch(self.allocate_id(), url, key, level, flags);
        job.referer = referer;
        self.enqueue_locked(&mut st, job);
        EnqueueOutcome::Queued
    }

    /// Queues a fully-formed job, bypassing scope filters and the blacklist
    /// gate (the canonical key is still recorded). Used for redirect targets
    /// and Metalink description fetches.
    pub fn enqueue_job(&self, job: Job) -> EnqueueOutcome {
        let mut st = lock(&self.state);
        if let Some(host) = st.hosts.get(&job.host) {
            if host.blocked {
                return EnqueueOutcome::HostBlocked;
            }
        }
        let url_key = canonical_key(&job.url);
        let _ = st.blacklist.try_insert_key(url_key);
        self.enqueue_locked(&mut st, job);
        EnqueueOutcome::Queued
    }

    /// Queues one part job per unfinished piece of `set`.
    pub fn enqueue_parts(&self, set: &Arc<PartSet>) {
        let mut st = lock(&self.state);
        let mirror_url = set.primary_url();
        let Some(key) = HostKey::from_url(&mirror_url) else {
            return;
        };
        let mut queued = 0;
        for piece in set.unfinished_pieces() {
            let job = Job {
                id: self.allocate_id(),
                url: mirror_url.clone(),
                referer: None,
                redirect_depth: 0,
                redirect_chain: Vec::new(),
                level: 0,
                host: key.clone(),
                filename: None,
                kind: JobKind::Part {
                    set: Arc::clone(set),
                    piece,
                },
                attempt: 0,
                auth_retried: false,
            };
            st.parts.push_back(job);
            st.pending += 1;
            queued += 1;
        }
        debug!(dest = %set.dest().display(), parts = queued, "queued part jobs");
        drop(st);
        self.work_available.notify_all();
    }

    fn enqueue_locked(&self, st: &mut CoordState, job: Job) {
        let key = job.host.clone();
        if !st.hosts.contains_key(&key) {
            let robots_gated = self.cfg.robots && !job.is_robots();
            let mut host = HostState::new(key.clone(), self.cfg.robots);
            if robots_gated {
                // First dispatch for a new host is always its robots.txt.
                if let Some(robots_job) = self.robots_job(&key, &mut st.blacklist) {
                    host.push(robots_job);
                    st.pending += 1;
                } else {
                    // The robots URL was already claimed by a plain job (a
                    // user-seeded robots.txt); nothing can settle the gate,
                    // so the host runs ungated.
                    host.gate = RobotsGate::Disabled;
                }
            }
            st.hosts.insert(key.clone(), host);
            st.host_order.push(key.clone());
        }
        if let Some(host) = st.hosts.get_mut(&key) {
            host.push(job);
            st.pending += 1;
        }
        self.work_available.notify_one();
    }

    fn robots_job(&self, key: &HostKey, blacklist: &mut Blacklist) -> Option<Job> {
        let robots_url =
            Url::parse(&format!("{}://{}:{}/robots.txt", key.scheme, key.host, key.port)).ok()?;
        if !blacklist.try_insert(&robots_url) {
            return None;
        }
        Some(Job::fetch(
            self.allocate_id(),
            robots_url,
            key.clone(),
            0,
            FetchFlags {
                robots: true,
                ..FetchFlags::default()
            },
        ))
    }

    fn host_in_scope(&self, st: &CoordState, host: &str) -> bool {
        if domain_in_list(host, &self.cfg.exclude_domains) {
            return false;
        }
        if self.cfg.span_hosts {
            return true;
        }
        st.scope.hosts.contains(host) || domain_in_list(host, &self.cfg.include_domains)
    }

    // ==================== Dequeue ====================

    /// One dispatch attempt at time `now`; never blocks.
    pub fn try_dequeue(&self, now: Instant) -> Polled {
        let mut st = lock(&self.state);
        self.poll_locked(&mut st, now)
    }

    fn poll_locked(&self, st: &mut CoordState, now: Instant) -> Polled {
        if st.terminating {
            return Polled::Empty { drained: true };
        }
        if let Some(job) = st.parts.pop_front() {
            st.pending -= 1;
            st.in_flight += 1;
            return Polled::Job(job);
        }

        let limit = self.cfg.per_host_limit;
        let keys: Vec<HostKey> = st.host_order.clone();
        for key in &keys {
            let Some(host) = st.hosts.get_mut(key) else {
                continue;
            };
            if host.dispatchable(now, limit) {
                if let Some(job) = host.pop_ready(now, limit) {
                    st.pending -= 1;
                    st.in_flight += 1;
                    return Polled::Job(job);
                }
            }
        }

        let earliest = keys
            .iter()
            .filter_map(|k| st.hosts.get(k).and_then(|h| h.ready_at(now, limit)))
            .min();
        if let Some(at) = earliest {
            return Polled::WaitUntil(at);
        }

        Polled::Empty {
            drained: st.pending == 0 && st.in_flight == 0 && !st.input_open,
        }
    }

    /// Blocking dequeue for workers. Returns `None` when the run is over
    /// (drained or terminating).
    pub fn next_job(&self) -> Option<Job> {
        let mut st = lock(&self.state);
        loop {
            let now = Instant::now();
            match self.poll_locked(&mut st, now) {
                Polled::Job(job) => return Some(job),
                Polled::Empty { drained: true } => {
                    // Wake siblings so they observe the drain too.
                    self.work_available.notify_all();
                    return None;
                }
                Polled::WaitUntil(at) => {
                    let wait = at.saturating_duration_since(now);
                    let (guard, _timeout) = self
                        .work_available
                        .wait_timeout(st, wait)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    st = guard;
                }
                Polled::Empty { drained: false } => {
                    st = self
                        .work_available
                        .wait(st)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
            }
        }
    }

    // ==================== Completion ====================

    /// Marks a job finished (any terminal disposition).
    pub fn complete(&self, job: &Job) {
        let mut st = lock(&self.state);
        self.finish_locked(&mut st, job);
        drop(st);
        self.notify_all();
    }

    /// Marks the robots.txt job for a host finished and releases the jobs
    /// deferred behind it, dropping those the rules exclude.
    pub fn complete_robots(&self, job: &Job, policy: RobotsPolicy) {
        let mut st = lock(&self.state);
        self.finish_locked(&mut st, job);
        let released = match st.hosts.get_mut(&job.host) {
            Some(host) => host.robots_settled(policy),
            None => Vec::new(),
        };
        let mut dropped = 0;
        for deferred in released {
            let allowed = st
                .hosts
                .get(&job.host)
                .is_none_or(|h| h.robots_allows(deferred.url.path()));
            if allowed {
                if let Some(host) = st.hosts.get_mut(&job.host) {
                    host.push_released(deferred);
                }
            } else {
                info!(url = %deferred.url, "not fetching: excluded by robots.txt");
                st.pending -= 1;
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(host = %job.host, dropped, "robots rules dropped deferred jobs");
        }
        drop(st);
        self.notify_all();
    }

    /// Returns a job to its queue for another attempt, optionally delaying
    /// its host.
    pub fn requeue(&self, mut job: Job, delay: Option<Duration>) {
        let mut st = lock(&self.state);
        st.in_flight -= 1;
        job.attempt += 1;
        if job.is_part() {
            st.parts.push_back(job);
        } else {
            if let Some(host) = st.hosts.get_mut(&job.host) {
                host.in_flight = host.in_flight.saturating_sub(1);
                if let Some(d) = delay {
                    host.delay_until(Instant::now() + d);
                }
                host.push_released(job);
            } else {
                // Host record disappeared (blocked + drained): drop the job.
                drop(st);
                self.notify_all();
                return;
            }
        }
        st.pending += 1;
        drop(st);
        self.notify_all();
    }

    fn finish_locked(&self, st: &mut CoordState, job: &Job) {
        st.in_flight -= 1;
        if !job.is_part() {
            if let Some(host) = st.hosts.get_mut(&job.host) {
                host.in_flight = host.in_flight.saturating_sub(1);
                if let Some(wait) = self.cfg.wait {
                    host.delay_until(Instant::now() + self.jittered(wait));
                }
            }
        }
    }

    fn jittered(&self, wait: Duration) -> Duration {
        if self.cfg.random_wait {
            let factor = rand::thread_rng().gen_range(0.5..=1.5);
            wait.mul_f64(factor)
        } else {
            wait
        }
    }

    fn notify_all(&self) {
        self.work_available.notify_all();
        self.work_completed.notify_all();
    }

    // ==================== Host registry passthrough ====================

    /// Records a connection-class failure against a host.
    pub fn record_failure(&self, key: &HostKey) {
        let mut st = lock(&self.state);
        if let Some(host) = st.hosts.get_mut(key) {
            host.record_failure(self.cfg.failure_threshold, Instant::now());
        }
    }

    /// Clears a host's consecutive-failure counter.
    pub fn record_success(&self, key: &HostKey) {
        let mut st = lock(&self.state);
        if let Some(host) = st.hosts.get_mut(key) {
            host.record_success();
        }
    }

    /// Permanently blocks a host and drops its queued work.
    pub fn mark_final(&self, key: &HostKey) {
        let mut st = lock(&self.state);
        if let Some(host) = st.hosts.get_mut(key) {
            let dropped = host.mark_final();
            st.pending -= dropped.len();
            if !dropped.is_empty() {
                info!(host = %key, dropped = dropped.len(), "host blocked, dropping queued jobs");
            }
        }
        drop(st);
        self.notify_all();
    }

    /// Robots rules for `key` when already known.
    #[must_use]
    pub fn robots_policy(&self, key: &HostKey) -> Option<RobotsPolicy> {
        let st = lock(&self.state);
        st.hosts.get(key).and_then(|h| h.robots.clone())
    }

    // ==================== Lifecycle ====================

    /// Signals that no further seeds will arrive.
    pub fn close_input(&self) {
        let mut st = lock(&self.state);
        st.input_open = false;
        drop(st);
        self.notify_all();
    }

    /// Requests an orderly shutdown; workers stop after their current job.
    pub fn terminate(&self) {
        let mut st = lock(&self.state);
        st.terminating = true;
        drop(st);
        self.notify_all();
    }

    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        let st = lock(&self.state);
        QueueSnapshot {
            pending: st.pending,
            in_flight: st.in_flight,
            input_open: st.input_open,
            terminating: st.terminating,
        }
    }

    /// Pending job count.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.state).pending
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks the controller until a completion signal or `timeout`, then
    /// reports the current counters.
    pub fn wait_completion(&self, timeout: Duration) -> QueueSnapshot {
        let st = lock(&self.state);
        let (st, _) = self
            .work_completed
            .wait_timeout(st, timeout)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        QueueSnapshot {
            pending: st.pending,
            in_flight: st.in_flight,
            input_open: st.input_open,
            terminating: st.terminating,
        }
    }
}

/// Directory prefix of `path` (through the final `/`), or `None` when the
/// path has no directory component worth restricting to.
fn parent_dir(path: &str) -> Option<String> {
    if path.is_empty() || path == "/" {
        return None;
    }
    path.rfind('/')
        .map(|idx| path[..=idx].to_string())
        .filter(|dir| dir != "/")
}

fn parent_permits(scope: &SeedScope, host: &str, path: &str) -> bool {
    let mut saw_host = false;
    for (seed_host, dir) in &scope.parents {
        if seed_host != host {
            continue;
        }
        saw_host = true;
        match dir {
            None => return true,
            Some(prefix) if path.starts_with(prefix.as_str()) => return true,
            Some(_) => {}
        }
    }
    // Hosts without a seed (reachable only with span-hosts) carry no
    // directory restriction.
    !saw_host
}

fn domain_in_list(host: &str, domains: &[String]) -> bool {
    domains.iter().any(|d| {
        let d = d.trim_start_matches('.');
        host == d || host.ends_with(&format!(".{d}"))
    })
}
