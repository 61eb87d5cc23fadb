//! Per-host scheduling state.
//!
//! Each origin gets one [`HostState`] holding its pending-job FIFO, the
//! robots gate, and the failure bookkeeping that drives per-host backoff and
//! permanent blocking.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::download::robots::RobotsPolicy;
use crate::queue::job::{HostKey, Job};

/// Base delay once the consecutive-failure threshold is crossed.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Cap for the per-host exponential backoff.
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Progress of the robots.txt prerequisite for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotsGate {
    /// Robots processing is off; jobs dispatch freely.
    Disabled,
    /// The robots.txt job is queued but not yet picked up.
    Pending,
    /// A worker is fetching robots.txt; everything else stays deferred.
    InFlight,
    /// Robots rules are known (possibly empty); jobs dispatch freely.
    Ready,
}

/// Scheduling state for one origin.
#[derive(Debug)]
pub struct HostState {
    pub key: HostKey,
    queue: VecDeque<Job>,
    deferred: VecDeque<Job>,
    pub gate: RobotsGate,
    pub robots: Option<RobotsPolicy>,
    pub failures: u32,
    pub blocked: bool,
    pub retry_at: Option<Instant>,
    pub in_flight: usize,
}

impl HostState {
    #[must_use]
    pub fn new(key: HostKey, robots_enabled: bool) -> Self {
        Self {
            key,
            queue: VecDeque::new(),
            deferred: VecDeque::new(),
            gate: if robots_enabled {
                RobotsGate::Pending
            } else {
                RobotsGate::Disabled
            },
            robots: None,
            failures: 0,
            blocked: false,
            retry_at: None,
            in_flight: 0,
        }
    }

    /// Queues `job`, parking it behind the robots gate when necessary.
    ///
    /// Returns `true` when the job went to the dispatchable FIFO, `false`
    /// when it was deferred.
    pub fn push(&mut self, job: Job) -> bool {
        let gated = matches!(self.gate, RobotsGate::Pending | RobotsGate::InFlight);
        if gated && !job.is_robots() {
            self.deferred.push_back(job);
            false
        } else {
            self.queue.push_back(job);
            true
        }
    }

    /// Pops the next dispatchable job, honoring the block flag, the retry
    /// timestamp, and the per-host in-flight limit.
    pub fn pop_ready(&mut self, now: Instant, per_host_limit: usize) -> Option<Job> {
        if self.blocked || self.in_flight >= per_host_limit {
            return None;
        }
        if let Some(at) = self.retry_at {
            if at > now {
                return None;
            }
        }
        let job = self.queue.pop_front()?;
        if job.is_robots() {
            self.gate = RobotsGate::InFlight;
        }
        self.in_flight += 1;
        Some(job)
    }

    /// When this host could dispatch next, given it has queued work.
    ///
    /// `None` means it is dispatchable right now or permanently undispatchable.
    #[must_use]
    pub fn ready_at(&self, now: Instant, per_host_limit: usize) -> Option<Instant> {
        if self.blocked || self.queue.is_empty() || self.in_flight >= per_host_limit {
            return None;
        }
        match self.retry_at {
            Some(at) if at > now => Some(at),
            _ => None,
        }
    }

    /// Whether `pop_ready` would currently yield a job.
    #[must_use]
    pub fn dispatchable(&self, now: Instant, per_host_limit: usize) -> bool {
        !self.blocked
            && self.in_flight < per_host_limit
            && !self.queue.is_empty()
            && self.retry_at.is_none_or(|at| at <= now)
    }

    /// Records one connection-class failure; past the threshold the host
    /// backs off exponentially.
    pub fn record_failure(&mut self, threshold: u32, now: Instant) {
        self.failures += 1;
        if self.failures >= threshold {
            let exponent = (self.failures - threshold).min(16);
            let delay = BACKOFF_BASE
                .saturating_mul(1u32 << exponent)
                .min(BACKOFF_CAP);
            let until = now + delay;
            self.retry_at = Some(self.retry_at.map_or(until, |at| at.max(until)));
            debug!(host = %self.key, failures = self.failures, ?delay, "host backing off");
        }
    }

    /// A successful exchange clears the consecutive-failure counter.
    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Permanently blocks the host and drops its queued work.
    ///
    /// Returns the dropped jobs (callers account for them).
    pub fn mark_final(&mut self) -> Vec<Job> {
        self.blocked = true;
        let mut dropped: Vec<Job> = self.queue.drain(..).collect();
        dropped.extend(self.deferred.drain(..));
        dropped
    }

    /// Settles the robots gate and releases deferred jobs for re-filtering.
    pub fn robots_settled(&mut self, policy: RobotsPolicy) -> Vec<Job> {
        self.gate = RobotsGate::Ready;
        self.robots = Some(policy);
        self.deferred.drain(..).collect()
    }

    /// Pushes a released (formerly deferred) job straight to the FIFO.
    pub fn push_released(&mut self, job: Job) {
        self.queue.push_back(job);
    }

    /// Whether `path` is allowed by the host's robots rules (unknown rules
    /// allow everything).
    #[must_use]
    pub fn robots_allows(&self, path: &str) -> bool {
        self.robots.as_ref().is_none_or(|p| p.allows(path))
    }

    /// Applies a minimum delay before the next dispatch to this host.
    pub fn delay_until(&mut self, at: Instant) {
        self.retry_at = Some(self.retry_at.map_or(at, |cur| cur.max(at)));
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}
