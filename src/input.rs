//! The input driver: seed URLs from the command line, an input file, or a
//! streaming stdin pipe.
//!
//! Every seed goes through the same path: normalize, then hand to the
//! coordinator (which canonicalizes, deduplicates, and queues). Stdin runs
//! on its own producer thread; closing the stream closes the coordinator's
//! input and lets the run drain.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::error::{ExitStatus, StatusRegister};
use crate::parse::{html, sitemap};
use crate::queue::{Coordinator, EnqueueOutcome};

/// Turns a command-line seed into a URL, defaulting the scheme to http.
#[must_use]
pub fn normalize_seed(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let url = Url::parse(&candidate).ok()?;
    match url.scheme() {
        "http" | "https" => Some(url),
        _ => None,
    }
}

/// Queues the positional seeds. Unparseable ones are reported and counted
/// as an initialization error.
pub fn enqueue_cli_seeds(
    coord: &Coordinator,
    status: &StatusRegister,
    seeds: &[String],
) -> usize {
    let mut queued = 0;
    for raw in seeds {
        match normalize_seed(raw) {
            Some(url) => {
                if coord.add_seed(url) == EnqueueOutcome::Queued {
                    queued += 1;
                }
            }
            None => {
                warn!(input = %raw, "not a fetchable URL");
                status.record(ExitStatus::Init);
            }
        }
    }
    queued
}

/// Starts the configured extra input source.
///
/// Returns a producer-thread handle when input streams from stdin; for file
/// input the seeds are queued synchronously. In both cases the driver owns
/// closing the coordinator's input.
pub fn start(
    cfg: &Config,
    coord: &Arc<Coordinator>,
    status: &Arc<StatusRegister>,
) -> Option<JoinHandle<()>> {
    match cfg.input_file.as_deref() {
        None => {
            coord.close_input();
            None
        }
        Some("-") => {
            let coord_clone = Arc::clone(coord);
            let handle = std::thread::Builder::new()
                .name("input".to_string())
                .spawn(move || {
                    let stdin = std::io::stdin();
                    let mut queued = 0usize;
                    for line in stdin.lock().lines() {
                        let Ok(line) = line else { break };
                        if let Some(url) = normalize_seed(&line) {
                            if coord_clone.add_seed(url) == EnqueueOutcome::Queued {
                                queued += 1;
                            }
                        } else if !line.trim().is_empty() {
                            debug!(input = %line, "skipping non-URL input line");
                        }
                    }
                    info!(queued, "stdin input finished");
                    coord_clone.close_input();
                })
                .ok();
            if handle.is_none() {
                coord.close_input();
            }
            handle
        }
        Some(path) => {
            read_input_file(cfg, coord, status, Path::new(path));
            coord.close_input();
            None
        }
    }
}

fn read_input_file(cfg: &Config, coord: &Coordinator, status: &StatusRegister, path: &Path) {
    let body = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read input file");
            status.record(ExitStatus::Init);
            return;
        }
    };

    let queued = if cfg.force_html || has_extension(path, &["html", "htm", "xhtml"]) {
        seeds_from_html(coord, &body)
    } else if has_extension(path, &["xml", "gz"]) {
        seeds_from_sitemap(coord, &body)
    } else {
        seeds_from_lines(coord, &body)
    };
    info!(path = %path.display(), queued, "input file processed");
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// HTML input files are parsed in place; only absolute links survive, since
/// a local file gives relative references nothing to resolve against.
fn seeds_from_html(coord: &Coordinator, body: &[u8]) -> usize {
    let base = match Url::parse("file:///input") {
        Ok(b) => b,
        Err(_) => return 0,
    };
    let mut queued = 0;
    for link in html::extract_links(&String::from_utf8_lossy(body), &base) {
        // Link resolution already dropped anything that is not http(s),
        // which is exactly the absolute-links-only rule we want here.
        if coord.add_seed(link.url) == EnqueueOutcome::Queued {
            queued += 1;
        }
    }
    queued
}

fn seeds_from_sitemap(coord: &Coordinator, body: &[u8]) -> usize {
    let entries = sitemap::parse(body);
    let mut queued = 0;
    for url in entries.pages.into_iter().chain(entries.sitemaps) {
        if coord.add_seed(url) == EnqueueOutcome::Queued {
            queued += 1;
        }
    }
    queued
}

fn seeds_from_lines(coord: &Coordinator, body: &[u8]) -> usize {
    let mut queued = 0;
    for line in String::from_utf8_lossy(body).lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(url) = normalize_seed(line) {
            if coord.add_seed(url) == EnqueueOutcome::Queued {
                queued += 1;
            }
        }
    }
    queued
}
