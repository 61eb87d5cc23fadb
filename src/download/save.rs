//! Saving fetched bodies under the clobber rules.
//!
//! The disposition is decided *before* the request goes out, because it
//! shapes the request headers: `--no-clobber` skips the fetch entirely,
//! `--continue` asks for a byte range, `-N` sends `If-Modified-Since`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info};

use super::error::FetchError;
use super::filename::unique_path;

/// How an upcoming fetch should treat its local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavePlan {
    /// Write to `path` from scratch (disambiguated when needed).
    Fresh { path: PathBuf },
    /// The file exists and `--no-clobber` is set: do not fetch.
    Skip { path: PathBuf },
    /// `--continue`: request bytes from `offset` and append.
    Resume { path: PathBuf, offset: u64 },
    /// `-N`: fetch conditionally; keep the local file on 304.
    Conditional {
        path: PathBuf,
        if_modified_since: SystemTime,
    },
}

impl SavePlan {
    /// Local path the plan refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Fresh { path }
            | Self::Skip { path }
            | Self::Resume { path, .. }
            | Self::Conditional { path, .. } => path,
        }
    }
}

/// Decides the disposition for `path` given the clobber flags.
///
/// Flag precedence follows the CLI: `--no-clobber`, then `--continue`, then
/// `-N`; with none set an existing file gets a `name.N` sibling.
///
/// # Errors
///
/// [`FetchError::Io`] when the existing file cannot be inspected or no
/// unique sibling name is free.
pub fn plan_disposition(
    path: &Path,
    no_clobber: bool,
    continue_download: bool,
    timestamping: bool,
) -> Result<SavePlan, FetchError> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => Some(m),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(FetchError::io(path, e)),
    };
    let Some(metadata) = metadata else {
        return Ok(SavePlan::Fresh {
            path: path.to_path_buf(),
        });
    };

    if no_clobber {
        info!(path = %path.display(), "file already there; not retrieving");
        return Ok(SavePlan::Skip {
            path: path.to_path_buf(),
        });
    }
    if continue_download {
        return Ok(SavePlan::Resume {
            path: path.to_path_buf(),
            offset: metadata.len(),
        });
    }
    if timestamping {
        // The server compares with second granularity; nudge past our own
        // sub-second mtime truncation.
        let mtime = metadata
            .modified()
            .map_err(|e| FetchError::io(path, e))?
            .checked_add(Duration::from_secs(1))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        return Ok(SavePlan::Conditional {
            path: path.to_path_buf(),
            if_modified_since: mtime,
        });
    }

    Ok(SavePlan::Fresh {
        path: unique_path(path)?,
    })
}

/// Writes `data` to `path`, creating parent directories. `append` continues
/// an existing file instead of truncating.
///
/// # Errors
///
/// [`FetchError::Io`] on any filesystem failure.
pub fn write_body(path: &Path, data: &[u8], append: bool) -> Result<(), FetchError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
        }
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(|e| FetchError::io(path, e))?;
    file.write_all(data).map_err(|e| FetchError::io(path, e))?;
    debug!(path = %path.display(), bytes = data.len(), append, "body written");
    Ok(())
}

/// Applies the server's `Last-Modified` value to the file's mtime.
///
/// Unparseable values are ignored; a file that mirrors the origin's
/// timestamp is what makes `-N` work on the next run.
pub fn apply_last_modified(path: &Path, last_modified: &str) {
    let Ok(stamp) = httpdate::parse_http_date(last_modified) else {
        debug!(path = %path.display(), last_modified, "unparseable Last-Modified");
        return;
    };
    match std::fs::File::options().write(true).open(path) {
        Ok(file) => {
            if let Err(e) = file.set_modified(stamp) {
                debug!(path = %path.display(), error = %e, "failed to set mtime");
            }
        }
        Err(e) => debug!(path = %path.display(), error = %e, "cannot open file for mtime"),
    }
}
