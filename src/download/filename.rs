//! Mapping URLs to local paths.
//!
//! The layout knobs mirror the CLI: directory prefix, host directories
//! (with the port when non-default), protocol directories, `--cut-dirs`,
//! and portable filename sanitation.

use std::path::{Path, PathBuf};

use url::Url;

use crate::config::Config;
use crate::download::error::FetchError;

/// Name used for URLs whose path ends in `/`.
pub const INDEX_NAME: &str = "index.html";
/// Highest `.N` suffix tried before giving up on a unique name.
const MAX_UNIQUE_SUFFIX: u32 = 9999;

/// Computes local paths for downloaded URLs.
#[derive(Debug, Clone)]
pub struct LocalNamer {
    prefix: Option<PathBuf>,
    host_directories: bool,
    protocol_directories: bool,
    cut_dirs: u32,
    restrict: bool,
}

impl LocalNamer {
    #[must_use]
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            prefix: cfg.prefix_dir.clone(),
            host_directories: cfg.host_directories,
            protocol_directories: cfg.protocol_directories,
            cut_dirs: cfg.cut_dirs,
            restrict: cfg.restrict_file_names,
        }
    }

    /// Local path for `url`.
    #[must_use]
    pub fn path_for(&self, url: &Url) -> PathBuf {
        let mut path = self.prefix.clone().unwrap_or_default();

        if self.protocol_directories {
            path.push(url.scheme());
        }
        if self.host_directories {
            let host = url.host_str().unwrap_or("unknown");
            match url.port() {
                Some(port) => path.push(format!("{host}:{port}")),
                None => path.push(host),
            }
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.collect::<Vec<_>>())
            .unwrap_or_default();
        let (dirs, file) = match segments.split_last() {
            Some((last, dirs)) => (dirs, *last),
            None => (&[][..], ""),
        };
        for dir in dirs.iter().skip(self.cut_dirs as usize) {
            if !dir.is_empty() {
                path.push(self.component(dir));
            }
        }

        let mut name = if file.is_empty() {
            INDEX_NAME.to_string()
        } else {
            self.component(file)
        };
        if let Some(query) = url.query() {
            if !query.is_empty() {
                name.push('@');
                name.push_str(&self.component(query));
            }
        }
        path.push(name);
        path
    }

    fn component(&self, raw: &str) -> String {
        if !self.restrict {
            return raw.to_string();
        }
        let mut out = String::with_capacity(raw.len());
        for ch in raw.chars() {
            let mapped = match ch {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_control() => '_',
                c => c,
            };
            out.push(mapped);
        }
        // Dot-only names would escape into the parent directory.
        if out == "." || out == ".." {
            "_".to_string()
        } else {
            out
        }
    }
}

/// First non-existing variant of `path`: the path itself, then `name.1`,
/// `name.2`, and so on.
///
/// # Errors
///
/// [`FetchError::Io`] once every suffix up to the cap is taken.
pub fn unique_path(path: &Path) -> Result<PathBuf, FetchError> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }
    let display = path.as_os_str().to_string_lossy().into_owned();
    for n in 1..=MAX_UNIQUE_SUFFIX {
        let candidate = PathBuf::from(format!("{display}.{n}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(FetchError::io(
        path,
        std::io::Error::other(format!(
            "no free filename after {MAX_UNIQUE_SUFFIX} attempts"
        )),
    ))
}
