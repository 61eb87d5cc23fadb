//! The main controller: wiring, lifecycle, and shutdown conditions.
//!
//! `App::run` builds the shared pieces (DNS cache, coordinator, worker
//! pool), starts the input driver, then parks on the completion signal and
//! re-checks the three shutdown conditions: drained queue with closed
//! input, byte quota reached, or a termination signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::download::{FetchContext, LocalNamer, RetryPolicy, WorkerPool};
use crate::error::{ExitStatus, StatusRegister};
use crate::input;
use crate::progress::{NullProgress, NullStats, ProgressSink, StatsSink};
use crate::queue::Coordinator;
use crate::resolver::DnsCache;

/// How often the controller re-checks shutdown conditions even without a
/// completion signal.
const CONTROLLER_TICK: Duration = Duration::from_millis(500);

/// One configured run.
pub struct App {
    cfg: Arc<Config>,
    seeds: Vec<String>,
    progress: Arc<dyn ProgressSink>,
    stats: Arc<dyn StatsSink>,
    terminate: Arc<AtomicBool>,
}

impl App {
    #[must_use]
    pub fn new(cfg: Config, seeds: Vec<String>) -> Self {
        Self {
            cfg: Arc::new(cfg),
            seeds,
            progress: Arc::new(NullProgress),
            stats: Arc::new(NullStats),
            terminate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the progress observer.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Replaces the statistics observer.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<dyn StatsSink>) -> Self {
        self.stats = stats;
        self
    }

    /// The flag a signal handler should set to stop the run.
    #[must_use]
    pub fn terminate_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminate)
    }

    /// Runs to completion and reports the exit status.
    #[must_use]
    pub fn run(self) -> ExitStatus {
        let status = Arc::new(StatusRegister::new());

        let dns = match DnsCache::from_config(&self.cfg, Arc::clone(&self.stats)) {
            Ok(dns) => Arc::new(dns),
            Err(e) => {
                warn!(error = %e, "resolver setup failed");
                status.record(ExitStatus::Init);
                return status.get();
            }
        };

        let coord = Arc::new(Coordinator::new(Arc::clone(&self.cfg)));
        let bytes_fetched = Arc::new(AtomicU64::new(0));
        let ctx = Arc::new(FetchContext {
            cfg: Arc::clone(&self.cfg),
            coord: Arc::clone(&coord),
            namer: LocalNamer::from_config(&self.cfg),
            retry: RetryPolicy::new(self.cfg.tries, self.cfg.waitretry),
            status: Arc::clone(&status),
            bytes_fetched: Arc::clone(&bytes_fetched),
            progress: Arc::clone(&self.progress),
            stats: Arc::clone(&self.stats),
            terminate: Arc::clone(&self.terminate),
        });

        let queued = input::enqueue_cli_seeds(&coord, &status, &self.seeds);
        debug!(queued, "command-line seeds queued");
        let input_thread = input::start(&self.cfg, &coord, &status);

        if queued == 0 && self.cfg.input_file.is_none() {
            info!("nothing to do");
            return status.get();
        }

        let pool = WorkerPool::spawn(Arc::clone(&ctx), dns, self.cfg.threads);

        // Controller loop: park on completions, wake to re-check shutdown.
        loop {
            if self.terminate.load(Ordering::SeqCst) {
                debug!("termination requested");
                coord.terminate();
                break;
            }
            if let Some(quota) = self.cfg.quota {
                if bytes_fetched.load(Ordering::SeqCst) >= quota {
                    info!(quota, "download quota reached, stopping");
                    status.record(ExitStatus::Generic);
                    coord.terminate();
                    break;
                }
            }
            let snapshot = coord.wait_completion(CONTROLLER_TICK);
            if snapshot.terminating || snapshot.drained() {
                break;
            }
        }

        pool.join();
        if let Some(handle) = input_thread {
            // The stdin producer may be blocked on a read; it exits with the
            // process. Join only when it already finished.
            if handle.is_finished() {
                let _ = handle.join();
            }
        }

        let total = bytes_fetched.load(Ordering::SeqCst);
        info!(
            bytes = total,
            status = status.get().code(),
            "run finished"
        );
        status.get()
    }
}

/// Installs the process signal handler: the first signal requests an
/// orderly stop, the second aborts immediately.
pub fn install_signal_handler(terminate: &Arc<AtomicBool>) {
    let flag = Arc::clone(terminate);
    let result = ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(ExitStatus::Generic.code() as i32);
        }
    });
    if let Err(e) = result {
        warn!(error = %e, "signal handler not installed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_run_with_no_seeds_exits_cleanly() {
        let app = App::new(
            Config {
                robots: false,
                ..Config::default()
            },
            Vec::new(),
        );
        assert_eq!(app.run(), ExitStatus::Success);
    }

    #[test]
    fn test_run_with_invalid_seed_reports_init_error() {
        let app = App::new(
            Config {
                robots: false,
                ..Config::default()
            },
            vec!["::nope::".to_string()],
        );
        assert_eq!(app.run(), ExitStatus::Init);
    }

    #[test]
    fn test_terminate_flag_is_shared() {
        let app = App::new(Config::default(), Vec::new());
        let flag = app.terminate_flag();
        flag.store(true, Ordering::SeqCst);
        assert!(app.terminate.load(Ordering::SeqCst));
    }
}
