//! The worker pool.
//!
//! N OS threads loop on the coordinator: block for a job, run it through the
//! fetch pipeline, repeat. A worker exits when the coordinator reports the
//! run drained (or terminating); each worker owns its own [`HttpClient`] and
//! with it one reusable connection.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use tracing::{debug, info};

use crate::download::client::HttpClient;
use crate::download::pipeline::{FetchContext, process_job};
use crate::resolver::DnsCache;

/// Handles to the running workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `count` workers over the shared context.
    #[must_use]
    pub fn spawn(ctx: Arc<FetchContext>, dns: Arc<DnsCache>, count: usize) -> Self {
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let handles = (0..count.max(1))
            .map(|worker_id| {
                let ctx = Arc::clone(&ctx);
                let dns = Arc::clone(&dns);
                let jar = Arc::clone(&jar);
                std::thread::Builder::new()
                    .name(format!("fetch-{worker_id}"))
                    .spawn(move || worker_main(worker_id, &ctx, dns, jar))
                    .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}"))
            })
            .collect();
        info!(workers = count.max(1), "worker pool started");
        Self { handles }
    }

    /// Waits for every worker to finish.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::warn!("worker thread panicked");
            }
        }
    }
}

fn worker_main(
    worker_id: usize,
    ctx: &FetchContext,
    dns: Arc<DnsCache>,
    jar: Arc<reqwest::cookie::Jar>,
) {
    let mut client = HttpClient::new(Arc::clone(&ctx.cfg), dns, jar);
    debug!(worker_id, "worker up");
    loop {
        if ctx.terminate.load(Ordering::SeqCst) {
            break;
        }
        let Some(job) = ctx.coord.next_job() else {
            break;
        };
        debug!(worker_id, %job, "picked up");
        process_job(ctx, &mut client, worker_id, job);
    }
    debug!(worker_id, "worker down");
}
