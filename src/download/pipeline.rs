//! The fetch pipeline: everything that happens to one dequeued job.
//!
//! A worker hands each job to [`process_job`]. The pipeline builds the
//! request (HEAD for spider/chunk probes, GET otherwise), classifies the
//! response, saves bodies under the clobber rules, follows redirects and
//! auth challenges, routes Metalink material to the part scheduler, and
//! feeds discovered links back through the coordinator.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use reqwest::Method;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED, LINK, LOCATION, WWW_AUTHENTICATE};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{Config, HttpsEnforce};
use crate::error::StatusRegister;
use crate::parse::{ExtractedLink, LinkKind, css, html, sitemap};
use crate::progress::{ProgressSink, StatsSink};
use crate::queue::job::{FetchFlags, HostKey, Job, JobKind};
use crate::queue::{Coordinator, canonical_key};

use super::auth::{self, AuthAnswer};
use super::client::HttpClient;
use super::error::FetchError;
use super::filename::LocalNamer;
use super::metalink::{Metalink, is_metalink_content_type};
use super::parts::PartSet;
use super::retry::{RetryDecision, RetryPolicy};
use super::robots::RobotsPolicy;
use super::save::{SavePlan, apply_last_modified, plan_disposition, write_body};

/// Shared context handed to every worker.
pub struct FetchContext {
    pub cfg: Arc<Config>,
    pub coord: Arc<Coordinator>,
    pub namer: LocalNamer,
    pub retry: RetryPolicy,
    pub status: Arc<StatusRegister>,
    pub bytes_fetched: Arc<AtomicU64>,
    pub progress: Arc<dyn ProgressSink>,
    pub stats: Arc<dyn StatsSink>,
    pub terminate: Arc<AtomicBool>,
}

impl FetchContext {
    fn count_bytes(&self, n: u64) {
        self.bytes_fetched.fetch_add(n, Ordering::SeqCst);
    }
}

/// Runs one job to a terminal disposition and reports it back to the
/// coordinator.
pub fn process_job(ctx: &FetchContext, client: &mut HttpClient, worker_id: usize, job: Job) {
    if ctx.terminate.load(Ordering::SeqCst) {
        ctx.coord.complete(&job);
        return;
    }
    match &job.kind {
        JobKind::Part { .. } => process_part(ctx, client, worker_id, job),
        JobKind::Fetch(_) => process_fetch(ctx, client, worker_id, job),
    }
}

// ==================== Plain fetches ====================

fn process_fetch(ctx: &FetchContext, client: &mut HttpClient, worker_id: usize, job: Job) {
    let flags = job.fetch_flags().unwrap_or_default();

    // Decide the local disposition before touching the network; it shapes
    // the request headers and may skip the fetch entirely.
    let plan = if saves_body(&ctx.cfg, flags) {
        let path = job
            .filename
            .clone()
            .unwrap_or_else(|| ctx.namer.path_for(&job.url));
        match plan_disposition(
            &path,
            ctx.cfg.no_clobber,
            ctx.cfg.continue_download,
            ctx.cfg.timestamping,
        ) {
            Ok(plan) => Some(plan),
            Err(e) => {
                fail_job(ctx, job, &e);
                return;
            }
        }
    } else {
        None
    };
    if let Some(SavePlan::Skip { .. }) = plan {
        ctx.coord.complete(&job);
        return;
    }

    match run_exchange(ctx, client, worker_id, &job, flags, plan.as_ref()) {
        Ok(()) => {}
        Err(e) => fail_job(ctx, job, &e),
    }
}

/// Sends the request (handling the https upgrade policy and the one-shot
/// auth retry) and classifies the response.
fn run_exchange(
    ctx: &FetchContext,
    client: &mut HttpClient,
    worker_id: usize,
    job: &Job,
    flags: FetchFlags,
    plan: Option<&SavePlan>,
) -> Result<(), FetchError> {
    let (effective_url, upgraded) = effective_fetch_url(&ctx.cfg, &job.url);

    match exchange_once(ctx, client, worker_id, job, flags, plan, &effective_url) {
        Ok(()) => Ok(()),
        Err(e)
            if upgraded
                && ctx.cfg.https_enforce == HttpsEnforce::Soft
                && e.is_connection_class() =>
        {
            debug!(url = %job.url, "https upgrade failed, falling back to http");
            exchange_once(ctx, client, worker_id, job, flags, plan, &job.url)
        }
        Err(e) => Err(e),
    }
}

fn effective_fetch_url(cfg: &Config, url: &Url) -> (Url, bool) {
    if cfg.https_enforce != HttpsEnforce::None && url.scheme() == "http" {
        let mut upgraded = url.clone();
        if upgraded.set_scheme("https").is_ok() {
            let _ = upgraded.set_port(None);
            return (upgraded, true);
        }
    }
    (url.clone(), false)
}

#[allow(clippy::too_many_lines)]
fn exchange_once(
    ctx: &FetchContext,
    client: &mut HttpClient,
    worker_id: usize,
    job: &Job,
    flags: FetchFlags,
    plan: Option<&SavePlan>,
    url: &Url,
) -> Result<(), FetchError> {
    // HEAD probe: spider mode never fetches bodies; chunk probing asks for
    // the size first and downgrades to a plain GET when ranges are out.
    // Robots fetches always need the body, spider or not.
    if ctx.cfg.spider && !flags.robots {
        return spider_probe(ctx, client, job, url);
    }
    if chunk_probe_applies(&ctx.cfg, flags) {
        if let Some(()) = try_chunk_probe(ctx, client, job, url)? {
            return Ok(());
        }
    }

    let response = send(ctx, client, job, plan, url, Method::GET, None)?;
    let status = response.status().as_u16();
    ctx.stats.response_received(url.as_str(), status);
    debug!(%url, status, "response received");

    match status {
        200 | 203 | 206 => handle_success(ctx, worker_id, job, flags, plan, url, response),
        416 if matches!(plan, Some(SavePlan::Resume { .. })) => {
            // The requested range starts at EOF: the local file is already
            // complete.
            info!(%url, "file already fully retrieved");
            ctx.coord.record_success(&job.host);
            ctx.coord.complete(job);
            Ok(())
        }
        204 => {
            ctx.coord.record_success(&job.host);
            finish_fetch(ctx, job, flags, RobotsPolicy::default());
            Ok(())
        }
        304 => {
            ctx.coord.record_success(&job.host);
            if flags.robots {
                // Never leave the gate hanging on a surprise 304.
                ctx.coord.complete_robots(job, RobotsPolicy::default());
            } else {
                handle_not_modified(ctx, job, plan);
            }
            Ok(())
        }
        301 | 302 | 303 | 307 | 308 => {
            let location = header_str(&response, &LOCATION)
                .ok_or_else(|| FetchError::protocol(url.as_str(), "redirect without Location"))?;
            handle_redirect(ctx, job, flags, url, &location)
        }
        401 => handle_unauthorized(ctx, client, worker_id, job, flags, plan, url, &response),
        404 | 410 => Err(FetchError::RemoteMissing {
            url: url.to_string(),
        }),
        _ => Err(FetchError::HttpStatus {
            url: url.to_string(),
            status,
        }),
    }
}

fn send(
    ctx: &FetchContext,
    client: &mut HttpClient,
    job: &Job,
    plan: Option<&SavePlan>,
    url: &Url,
    method: Method,
    auth: Option<&AuthAnswer>,
) -> Result<reqwest::blocking::Response, FetchError> {
    let mut request = client.request(method, url, job.referer.as_ref())?;
    match plan {
        Some(SavePlan::Resume { offset, .. }) if *offset > 0 => {
            // Ranges address the raw representation.
            request = request
                .header("Range", format!("bytes={offset}-"))
                .header("Accept-Encoding", "identity");
        }
        Some(SavePlan::Conditional {
            if_modified_since, ..
        }) => {
            request = request.header("If-Modified-Since", httpdate::fmt_http_date(*if_modified_since));
        }
        _ => {}
    }
    match auth {
        Some(AuthAnswer::Basic) => {
            let user = ctx.cfg.user.clone().unwrap_or_default();
            request = request.basic_auth(user, ctx.cfg.password.clone());
        }
        Some(AuthAnswer::Header(value)) => {
            request = request.header("Authorization", value.clone());
        }
        None => {}
    }
    request
        .send()
        .map_err(|e| FetchError::from_transport(url.as_str(), e))
}

fn spider_probe(
    ctx: &FetchContext,
    client: &mut HttpClient,
    job: &Job,
    url: &Url,
) -> Result<(), FetchError> {
    let response = send(ctx, client, job, None, url, Method::HEAD, None)?;
    let status = response.status().as_u16();
    ctx.stats.response_received(url.as_str(), status);
    match status {
        200..=299 => {
            info!(%url, status, "remote file exists");
            ctx.coord.record_success(&job.host);
            ctx.coord.complete(job);
            Ok(())
        }
        404 | 410 => Err(FetchError::RemoteMissing {
            url: url.to_string(),
        }),
        _ => Err(FetchError::HttpStatus {
            url: url.to_string(),
            status,
        }),
    }
}

fn chunk_probe_applies(cfg: &Config, flags: FetchFlags) -> bool {
    cfg.chunk_size.is_some()
        && !flags.robots
        && !flags.sitemap
        && !flags.metalink_doc
}

/// HEAD probe for chunking. `Ok(Some(()))` means the job was handed to the
/// part scheduler; `Ok(None)` means fall through to a plain GET.
fn try_chunk_probe(
    ctx: &FetchContext,
    client: &mut HttpClient,
    job: &Job,
    url: &Url,
) -> Result<Option<()>, FetchError> {
    let chunk = ctx.cfg.chunk_size.unwrap_or(u64::MAX);
    let response = match send(ctx, client, job, None, url, Method::HEAD, None) {
        Ok(r) => r,
        // Servers that dislike HEAD still get a plain GET.
        Err(e) if !e.is_connection_class() => return Ok(None),
        Err(e) => return Err(e),
    };
    if !response.status().is_success() {
        return Ok(None);
    }

    let length: Option<u64> = header_str(&response, &CONTENT_LENGTH).and_then(|v| v.parse().ok());
    let ranged = header_str(&response, &reqwest::header::ACCEPT_RANGES)
        .is_some_and(|v| v.to_ascii_lowercase().contains("bytes"));
    let Some(size) = length else { return Ok(None) };
    if size <= chunk || !ranged {
        return Ok(None);
    }

    let path = job
        .filename
        .clone()
        .unwrap_or_else(|| ctx.namer.path_for(url));
    let plan = plan_disposition(&path, ctx.cfg.no_clobber, false, false)?;
    if let SavePlan::Skip { .. } = plan {
        ctx.coord.complete(job);
        return Ok(Some(()));
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let metalink = Metalink::synthetic(url.clone(), size, name);
    let set = Arc::new(PartSet::plan(&metalink, plan.path().to_path_buf(), Some(chunk)));
    set.prepare_dest()?;
    info!(%url, size, pieces = set.piece_count(), "splitting into ranged parts");
    ctx.coord.enqueue_parts(&set);
    ctx.coord.record_success(&job.host);
    ctx.coord.complete(job);
    Ok(Some(()))
}

#[allow(clippy::too_many_arguments)]
fn handle_success(
    ctx: &FetchContext,
    worker_id: usize,
    job: &Job,
    flags: FetchFlags,
    plan: Option<&SavePlan>,
    url: &Url,
    response: reqwest::blocking::Response,
) -> Result<(), FetchError> {
    let status = response.status().as_u16();
    let content_type = header_str(&response, &CONTENT_TYPE).unwrap_or_default();
    let last_modified = header_str(&response, &LAST_MODIFIED);
    let disposition_name = attachment_filename(header_str(&response, &CONTENT_DISPOSITION));
    let metalink_links = rfc6249_links(&response, url);

    // RFC 6249: a described-by link routes the whole job to the Metalink
    // description instead of this body. Control fetches (robots, sitemaps)
    // are never rerouted.
    if ctx.cfg.metalink && !flags.metalink_doc && !flags.robots && !flags.sitemap {
        if let Some(describedby) = metalink_links.describedby {
            debug!(%url, metalink = %describedby, "following describedby link");
            enqueue_metalink_doc(ctx, job, describedby);
            ctx.coord.record_success(&job.host);
            ctx.coord.complete(job);
            return Ok(());
        }
        if let Some(duplicate) = metalink_links.best_duplicate {
            debug!(%url, mirror = %duplicate, "following duplicate link");
            enqueue_duplicate(ctx, job, duplicate);
            ctx.coord.record_success(&job.host);
            ctx.coord.complete(job);
            return Ok(());
        }
    }

    ctx.progress.slot_begin(worker_id, url.as_str(), None);
    let body = response
        .bytes()
        .map_err(|e| FetchError::from_transport(url.as_str(), e))?;
    ctx.progress.bytes_downloaded(worker_id, body.len() as u64);
    ctx.progress.slot_complete(worker_id);
    ctx.count_bytes(body.len() as u64);
    ctx.coord.record_success(&job.host);

    // Robots bodies configure the host; they are never saved.
    if flags.robots {
        let policy = RobotsPolicy::parse(&String::from_utf8_lossy(&body));
        finish_fetch(ctx, job, flags, policy);
        return Ok(());
    }

    // Metalink descriptions spawn part jobs instead of being saved.
    if ctx.cfg.metalink && (flags.metalink_doc || is_metalink_content_type(&content_type)) {
        return start_metalink(ctx, job, &body);
    }

    if flags.sitemap {
        let entries = sitemap::parse(&body);
        enqueue_sitemap_entries(ctx, job, entries);
        ctx.coord.complete(job);
        return Ok(());
    }

    // Save to disk.
    if let Some(plan) = plan {
        let resolved = match (plan, status) {
            // Server honored the range: append the tail.
            (SavePlan::Resume { path, .. }, 206) => Some((path.clone(), true)),
            // Server ignored the range: rewrite from scratch.
            (SavePlan::Resume { path, .. }, _) => Some((path.clone(), false)),
            (other, _) => disposition_path(
                ctx,
                other.path().to_path_buf(),
                disposition_name,
                job.filename.is_some(),
            )?
            .map(|path| (path, false)),
        };
        let Some((path, append)) = resolved else {
            ctx.coord.complete(job);
            return Ok(());
        };
        write_body(&path, &body, append)?;
        if let Some(lm) = &last_modified {
            if !append {
                apply_last_modified(&path, lm);
            }
        }
        info!(%url, path = %path.display(), bytes = body.len(), "saved");
    }

    // Parser dispatch + recursive enqueue.
    let links = extract_links_by_type(&content_type, &body, url);
    enqueue_links(ctx, job, links);

    ctx.coord.complete(job);
    Ok(())
}

/// Final save path for a non-resume write. A `Content-Disposition`
/// attachment name never applies when the local name was forced (redirect
/// targets keep the original URL's name); when it does apply, the clobber
/// rules re-run against the renamed target so disambiguation protects the
/// name actually written. `Ok(None)` means no-clobber skips the write.
fn disposition_path(
    ctx: &FetchContext,
    computed: PathBuf,
    disposition: Option<String>,
    name_forced: bool,
) -> Result<Option<PathBuf>, FetchError> {
    if name_forced {
        return Ok(Some(computed));
    }
    let Some(base) = disposition.as_deref().and_then(safe_base_name) else {
        return Ok(Some(computed));
    };
    let candidate = computed.with_file_name(base);
    if candidate == computed {
        return Ok(Some(computed));
    }
    match plan_disposition(&candidate, ctx.cfg.no_clobber, false, false)? {
        SavePlan::Skip { .. } => Ok(None),
        renamed => Ok(Some(renamed.path().to_path_buf())),
    }
}

/// Final component of an attachment name; empty and dot-only names are
/// rejected to keep writes inside the tree.
fn safe_base_name(name: &str) -> Option<String> {
    std::path::Path::new(name.trim())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|base| !base.is_empty() && base != "." && base != "..")
}

fn handle_not_modified(ctx: &FetchContext, job: &Job, plan: Option<&SavePlan>) {
    let Some(plan) = plan else {
        ctx.coord.complete(job);
        return;
    };
    let path = plan.path();
    info!(path = %path.display(), "not modified, keeping local file");

    // Recursion still needs the links from the cached copy.
    if ctx.cfg.recursive && looks_like_html(path) {
        if let Ok(body) = std::fs::read(path) {
            let links = html::extract_links(&String::from_utf8_lossy(&body), &job.url);
            enqueue_links(ctx, job, links);
        }
    }
    ctx.coord.complete(job);
}

fn looks_like_html(path: &std::path::Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("html" | "htm" | "xhtml")
    )
}

fn handle_redirect(
    ctx: &FetchContext,
    job: &Job,
    flags: FetchFlags,
    url: &Url,
    location: &str,
) -> Result<(), FetchError> {
    let target = url
        .join(location)
        .map_err(|e| FetchError::protocol(url.as_str(), format!("bad Location: {e}")))?;

    if job.redirect_depth + 1 > ctx.cfg.max_redirect {
        return Err(FetchError::TooManyRedirects {
            url: target.to_string(),
            limit: ctx.cfg.max_redirect,
        });
    }
    let mut chain = job.redirect_chain.clone();
    chain.push(canonical_key(&job.url));
    if chain.contains(&canonical_key(&target)) {
        return Err(FetchError::RedirectLoop {
            url: target.to_string(),
        });
    }
    let Some(host) = HostKey::from_url(&target) else {
        return Err(FetchError::InvalidUrl {
            url: target.to_string(),
        });
    };

    // A robots fetch redirected off its own host cannot settle that host's
    // gate; treat the rules as empty and stop following.
    if flags.robots && host != job.host {
        info!(from = %url, to = %target, "robots.txt redirected off-host, assuming empty rules");
        ctx.coord.complete_robots(job, RobotsPolicy::default());
        return Ok(());
    }

    // Keep the original URL's local name unless one was forced earlier.
    let filename = job.filename.clone().or_else(|| {
        saves_body(&ctx.cfg, flags).then(|| ctx.namer.path_for(&job.url))
    });

    info!(from = %url, to = %target, depth = job.redirect_depth + 1, "redirect");
    let redirect_job = Job {
        id: ctx.coord.next_job_id(),
        url: target,
        referer: job.referer.clone(),
        redirect_depth: job.redirect_depth + 1,
        redirect_chain: chain,
        level: job.level,
        host,
        filename,
        kind: JobKind::Fetch(FetchFlags {
            redirect: true,
            ..flags
        }),
        attempt: 0,
        auth_retried: job.auth_retried,
    };
    ctx.coord.record_success(&job.host);
    ctx.coord.enqueue_job(redirect_job);
    ctx.coord.complete(job);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_unauthorized(
    ctx: &FetchContext,
    client: &mut HttpClient,
    worker_id: usize,
    job: &Job,
    flags: FetchFlags,
    plan: Option<&SavePlan>,
    url: &Url,
    response: &reqwest::blocking::Response,
) -> Result<(), FetchError> {
    if job.auth_retried {
        return Err(FetchError::Auth {
            url: url.to_string(),
        });
    }
    let (Some(user), Some(password)) = (&ctx.cfg.user, &ctx.cfg.password) else {
        return Err(FetchError::Auth {
            url: url.to_string(),
        });
    };
    let challenges: Vec<String> = response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect();
    let parsed = auth::parse_challenges(&challenges);
    let answer = auth::answer_challenge(&parsed, "GET", url.path(), user, password)
        .ok_or_else(|| FetchError::Auth {
            url: url.to_string(),
        })?;

    debug!(%url, "retrying with credentials");
    let retried = send(ctx, client, job, plan, url, Method::GET, Some(&answer))?;
    let status = retried.status().as_u16();
    if status == 401 {
        // Two rejections in a row are a permanent auth failure.
        return Err(FetchError::Auth {
            url: url.to_string(),
        });
    }
    let mut authed_job = job.clone();
    authed_job.auth_retried = true;
    match status {
        200 | 203 | 206 => handle_success(ctx, worker_id, &authed_job, flags, plan, url, retried),
        301 | 302 | 303 | 307 | 308 => {
            let location = header_str(&retried, &LOCATION)
                .ok_or_else(|| FetchError::protocol(url.as_str(), "redirect without Location"))?;
            handle_redirect(ctx, &authed_job, flags, url, &location)
        }
        404 | 410 => Err(FetchError::RemoteMissing {
            url: url.to_string(),
        }),
        other => Err(FetchError::HttpStatus {
            url: url.to_string(),
            status: other,
        }),
    }
}

/// Terminal bookkeeping for a fetch that ended well.
fn finish_fetch(ctx: &FetchContext, job: &Job, flags: FetchFlags, policy: RobotsPolicy) {
    if flags.robots {
        // Sitemaps advertised by robots.txt join the crawl.
        if ctx.cfg.recursive {
            for raw in policy.sitemaps() {
                if let Ok(url) = Url::parse(raw) {
                    let outcome = ctx.coord.enqueue_discovered(
                        url,
                        Some(job.url.clone()),
                        job.level,
                        FetchFlags {
                            sitemap: true,
                            ..FetchFlags::default()
                        },
                    );
                    debug!(?outcome, "sitemap from robots.txt");
                }
            }
        }
        ctx.coord.complete_robots(job, policy);
    } else {
        ctx.coord.complete(job);
    }
}

// ==================== Metalink ====================

fn start_metalink(ctx: &FetchContext, job: &Job, body: &[u8]) -> Result<(), FetchError> {
    let text = String::from_utf8_lossy(body);
    let metalink = Metalink::parse(&text)
        .map_err(|e| FetchError::protocol(job.url.as_str(), e.to_string()))?;
    let dest = metalink_dest(&ctx.cfg, &metalink.name);
    let plan = plan_disposition(&dest, ctx.cfg.no_clobber, false, false)?;
    if let SavePlan::Skip { .. } = plan {
        ctx.coord.complete(job);
        return Ok(());
    }
    let set = Arc::new(PartSet::plan(
        &metalink,
        plan.path().to_path_buf(),
        ctx.cfg.chunk_size,
    ));
    set.prepare_dest()?;
    info!(
        url = %job.url,
        dest = %set.dest().display(),
        pieces = set.piece_count(),
        mirrors = set.mirror_count(),
        "metalink download planned"
    );
    ctx.coord.enqueue_parts(&set);
    ctx.coord.complete(job);
    Ok(())
}

/// A metalink `name` is untrusted input: keep only safe components under
/// the prefix directory.
fn metalink_dest(cfg: &Config, name: &str) -> PathBuf {
    let mut dest = cfg.prefix_dir.clone().unwrap_or_default();
    let mut pushed = false;
    for component in name.split('/') {
        let component = component.trim();
        if component.is_empty() || component == "." || component == ".." {
            continue;
        }
        dest.push(component);
        pushed = true;
    }
    if !pushed {
        dest.push("download");
    }
    dest
}

fn enqueue_metalink_doc(ctx: &FetchContext, job: &Job, url: Url) {
    let Some(host) = HostKey::from_url(&url) else {
        return;
    };
    let doc_job = Job {
        id: ctx.coord.next_job_id(),
        url,
        referer: Some(job.url.clone()),
        redirect_depth: 0,
        redirect_chain: Vec::new(),
        level: job.level,
        host,
        filename: None,
        kind: JobKind::Fetch(FetchFlags {
            metalink_doc: true,
            ..FetchFlags::default()
        }),
        attempt: 0,
        auth_retried: false,
    };
    ctx.coord.enqueue_job(doc_job);
}

fn enqueue_duplicate(ctx: &FetchContext, job: &Job, url: Url) {
    let Some(host) = HostKey::from_url(&url) else {
        return;
    };
    // The mirror serves the same file; keep the original URL's local name.
    let filename = job
        .filename
        .clone()
        .or_else(|| Some(ctx.namer.path_for(&job.url)));
    let dup_job = Job {
        id: ctx.coord.next_job_id(),
        url,
        referer: Some(job.url.clone()),
        redirect_depth: 0,
        redirect_chain: Vec::new(),
        level: job.level,
        host,
        filename,
        kind: JobKind::Fetch(FetchFlags::default()),
        attempt: 0,
        auth_retried: false,
    };
    ctx.coord.enqueue_job(dup_job);
}

/// RFC 6249 `Link:` header relations.
struct MetalinkLinks {
    describedby: Option<Url>,
    best_duplicate: Option<Url>,
}

fn rfc6249_links(response: &reqwest::blocking::Response, base: &Url) -> MetalinkLinks {
    let mut describedby = None;
    let mut duplicates: Vec<(u32, Url)> = Vec::new();

    for value in response.headers().get_all(LINK).iter() {
        let Ok(text) = value.to_str() else { continue };
        for entry in text.split(',') {
            let mut segments = entry.split(';');
            let Some(target) = segments.next() else {
                continue;
            };
            let target = target.trim().trim_start_matches('<').trim_end_matches('>');
            let Ok(url) = base.join(target) else { continue };

            let mut rel = String::new();
            let mut link_type = String::new();
            let mut pri = u32::MAX;
            for param in segments {
                let Some((key, val)) = param.split_once('=') else {
                    continue;
                };
                let val = val.trim().trim_matches('"').to_ascii_lowercase();
                match key.trim().to_ascii_lowercase().as_str() {
                    "rel" => rel = val,
                    "type" => link_type = val,
                    "pri" => pri = val.parse().unwrap_or(u32::MAX),
                    _ => {}
                }
            }
            if rel == "describedby" && link_type.contains("metalink") {
                describedby.get_or_insert(url);
            } else if rel == "duplicate" {
                duplicates.push((pri, url));
            }
        }
    }
    duplicates.sort_by_key(|(pri, _)| *pri);
    MetalinkLinks {
        describedby,
        best_duplicate: duplicates.into_iter().map(|(_, url)| url).next(),
    }
}

// ==================== Part fetches ====================

fn process_part(ctx: &FetchContext, client: &mut HttpClient, worker_id: usize, job: Job) {
    let JobKind::Part { set, piece } = job.kind.clone() else {
        return;
    };
    match fetch_part(ctx, client, worker_id, &job, &set, piece) {
        Ok(all_done) => {
            ctx.coord.complete(&job);
            if all_done {
                match set.verify_file() {
                    Ok(()) => info!(dest = %set.dest().display(), "all parts complete"),
                    Err(e) => {
                        warn!(error = %e, "assembled file failed verification");
                        ctx.status.record(e.exit_status());
                    }
                }
            }
        }
        Err(e) => {
            let mirror = set.mirror_for(worker_id, job.attempt);
            if let Some(host) = HostKey::from_url(&mirror.url) {
                if e.is_connection_class() {
                    ctx.coord.record_failure(&host);
                }
            }
            // One attempt per mirror, then give up on the part.
            if (job.attempt as usize) + 1 < set.mirror_count() {
                debug!(piece, error = %e, "part failed, rotating mirror");
                ctx.coord.requeue(job, None);
            } else {
                warn!(piece, error = %e, "part failed on every mirror");
                ctx.status.record(e.exit_status());
                ctx.coord.complete(&job);
            }
        }
    }
}

fn fetch_part(
    ctx: &FetchContext,
    client: &mut HttpClient,
    worker_id: usize,
    job: &Job,
    set: &Arc<PartSet>,
    piece_index: usize,
) -> Result<bool, FetchError> {
    let piece = set
        .piece(piece_index)
        .ok_or_else(|| FetchError::protocol(job.url.as_str(), "unknown piece"))?
        .clone();
    let mirror = set.mirror_for(worker_id, job.attempt).clone();
    let range_end = piece.position + piece.length - 1;

    let request = client
        .request(Method::GET, &mirror.url, None)?
        .header("Range", format!("bytes={}-{range_end}", piece.position))
        // Ranges address the raw representation.
        .header("Accept-Encoding", "identity");
    ctx.progress
        .slot_begin(worker_id, mirror.url.as_str(), Some(piece.length));
    let response = request
        .send()
        .map_err(|e| FetchError::from_transport(mirror.url.as_str(), e))?;

    let status = response.status().as_u16();
    ctx.stats.response_received(mirror.url.as_str(), status);
    if status != 206 {
        return Err(FetchError::HttpStatus {
            url: mirror.url.to_string(),
            status,
        });
    }
    let body = response
        .bytes()
        .map_err(|e| FetchError::from_transport(mirror.url.as_str(), e))?;
    ctx.progress.bytes_downloaded(worker_id, body.len() as u64);
    ctx.progress.slot_complete(worker_id);
    ctx.count_bytes(body.len() as u64);

    if let Some(host) = HostKey::from_url(&mirror.url) {
        ctx.coord.record_success(&host);
    }
    set.commit_piece(piece_index, &body)
}

// ==================== Recursion ====================

/// Applies the configuration-level recursion filters and hands survivors to
/// the coordinator (which applies scope, robots, and the blacklist).
fn enqueue_links(ctx: &FetchContext, job: &Job, links: Vec<ExtractedLink>) {
    if links.is_empty() {
        return;
    }
    let cfg = &ctx.cfg;
    if !cfg.recursive && !cfg.page_requisites {
        return;
    }
    let next_level = job.level + 1;
    let within_level = next_level <= cfg.level;

    for link in links {
        let follow = match link.kind {
            LinkKind::Navigation => cfg.recursive && within_level,
            // Inline requisites may outlive the depth limit when -p is on.
            LinkKind::Inline => {
                (cfg.recursive && (within_level || cfg.page_requisites))
                    || (!cfg.recursive && cfg.page_requisites)
            }
        };
        if !follow {
            continue;
        }
        if cfg.https_only && link.url.scheme() != "https" {
            debug!(url = %link.url, "not following: https-only");
            continue;
        }
        let outcome = ctx.coord.enqueue_discovered(
            link.url.clone(),
            Some(job.url.clone()),
            next_level,
            FetchFlags {
                requisite: link.kind == LinkKind::Inline,
                ..FetchFlags::default()
            },
        );
        debug!(url = %link.url, ?outcome, "discovered link");
    }
}

fn enqueue_sitemap_entries(ctx: &FetchContext, job: &Job, entries: sitemap::SitemapEntries) {
    if !ctx.cfg.recursive {
        return;
    }
    for nested in entries.sitemaps {
        let outcome = ctx.coord.enqueue_discovered(
            nested,
            Some(job.url.clone()),
            job.level,
            FetchFlags {
                sitemap: true,
                ..FetchFlags::default()
            },
        );
        debug!(?outcome, "nested sitemap");
    }
    let next_level = job.level + 1;
    if next_level > ctx.cfg.level {
        return;
    }
    for page in entries.pages {
        if ctx.cfg.https_only && page.scheme() != "https" {
            continue;
        }
        let outcome = ctx.coord.enqueue_discovered(
            page,
            Some(job.url.clone()),
            next_level,
            FetchFlags::default(),
        );
        debug!(?outcome, "sitemap page");
    }
}

fn extract_links_by_type(content_type: &str, body: &[u8], url: &Url) -> Vec<ExtractedLink> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "text/html" | "application/xhtml+xml" => {
            html::extract_links(&String::from_utf8_lossy(body), url)
        }
        "text/css" => css::extract_links(&String::from_utf8_lossy(body), url),
        _ => Vec::new(),
    }
}

// ==================== Failure path ====================

/// Terminal or retryable failure handling for fetch jobs.
fn fail_job(ctx: &FetchContext, job: Job, error: &FetchError) {
    if error.is_connection_class() {
        ctx.coord.record_failure(&job.host);
    }

    // Certificate validation under hard enforcement blocks the host for
    // the rest of the run.
    if matches!(error, FetchError::Tls { .. }) && ctx.cfg.https_enforce == HttpsEnforce::Hard {
        ctx.coord.mark_final(&job.host);
    }

    match ctx.retry.decide(error, job.attempt + 1) {
        RetryDecision::Retry { delay, attempt } => {
            debug!(%job, error = %error, attempt, "will retry");
            ctx.coord.requeue(job, Some(delay));
        }
        RetryDecision::GiveUp => {
            if job.is_robots() {
                // A host without readable robots rules crawls unrestricted;
                // its deferred jobs must not starve.
                debug!(%job, error = %error, "robots fetch failed, assuming empty rules");
                ctx.coord.complete_robots(&job, RobotsPolicy::default());
                return;
            }
            warn!(%job, error = %error, "giving up");
            ctx.status.record(error.exit_status());
            ctx.coord.complete(&job);
        }
    }
}

fn header_str(response: &reqwest::blocking::Response, name: &reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn attachment_filename(disposition: Option<String>) -> Option<String> {
    let disposition = disposition?;
    let lowered = disposition.to_ascii_lowercase();
    let idx = lowered.find("filename=")?;
    let raw = disposition[idx + "filename=".len()..].trim();
    let name = raw
        .trim_start_matches('"')
        .split(['"', ';'])
        .next()?
        .trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn saves_body(cfg: &Config, flags: FetchFlags) -> bool {
    !cfg.spider && !flags.robots && !flags.sitemap && !flags.metalink_doc
}
