//! Metalink description documents (v3 and v4).
//!
//! A [`Metalink`] names one file: its size, whole-file hashes, optional
//! fixed-length pieces with per-piece hashes, and a priority-ordered mirror
//! list. The field extraction is deliberately lenient; a description that
//! yields no usable mirror is rejected, anything else parses.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use url::Url;

/// Digest algorithms this crate can verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Sha256,
    Md5,
}

impl HashAlgo {
    /// Maps a metalink `type` attribute to a supported algorithm.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "sha-256" | "sha256" => Some(Self::Sha256),
            "md5" => Some(Self::Md5),
            _ => None,
        }
    }
}

/// A whole-file digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHash {
    pub algo: HashAlgo,
    /// Lowercase hex digest.
    pub value: String,
}

/// One mirror for the described file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    /// Lower is better; v3 `preference` values are converted.
    pub priority: u32,
    pub url: Url,
    pub location: Option<String>,
}

/// Parsed Metalink description for a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metalink {
    pub name: String,
    pub size: u64,
    pub hashes: Vec<FileHash>,
    pub piece_length: Option<u64>,
    pub piece_algo: Option<HashAlgo>,
    pub piece_hashes: Vec<String>,
    /// Sorted by ascending priority.
    pub mirrors: Vec<Mirror>,
}

/// Errors from Metalink parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetalinkError {
    #[error("metalink describes no usable mirror")]
    NoMirrors,
    #[error("metalink missing file size")]
    NoSize,
}

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap_or_else(|e| unreachable!("static regex: {e}")))
}

static FILE_NAME: OnceLock<Regex> = OnceLock::new();
static SIZE: OnceLock<Regex> = OnceLock::new();
static PIECES_BLOCK: OnceLock<Regex> = OnceLock::new();
static PIECE_HASH: OnceLock<Regex> = OnceLock::new();
static FILE_HASH: OnceLock<Regex> = OnceLock::new();
static URL_TAG: OnceLock<Regex> = OnceLock::new();
static ATTR: OnceLock<Regex> = OnceLock::new();

impl Metalink {
    /// Parses a Metalink XML body.
    ///
    /// # Errors
    ///
    /// Fails when no http(s) mirror or no size can be extracted.
    pub fn parse(body: &str) -> Result<Self, MetalinkError> {
        let name = re(&FILE_NAME, r#"(?is)<file[^>]*\bname\s*=\s*"([^"]+)""#)
            .captures(body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();

        let size: u64 = re(&SIZE, r"(?is)<size[^>]*>\s*(\d+)\s*</size>")
            .captures(body)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .ok_or(MetalinkError::NoSize)?;

        // Pieces first: their <hash> elements must not be mistaken for
        // whole-file hashes.
        let pieces_re = re(
            &PIECES_BLOCK,
            r#"(?is)<pieces([^>]*)>(.*?)</pieces>"#,
        );
        let mut piece_length = None;
        let mut piece_algo = None;
        let mut piece_hashes = Vec::new();
        let mut without_pieces = body.to_string();
        if let Some(caps) = pieces_re.captures(body) {
            let attrs = caps.get(1).map_or("", |m| m.as_str());
            piece_length = attr_value(attrs, "length").and_then(|v| v.parse().ok());
            piece_algo = attr_value(attrs, "type").and_then(|v| HashAlgo::from_label(&v));
            let inner = caps.get(2).map_or("", |m| m.as_str());
            for h in re(&PIECE_HASH, r"(?is)<hash[^>]*>\s*([0-9a-fA-F]+)\s*</hash>").captures_iter(inner)
            {
                if let Some(m) = h.get(1) {
                    piece_hashes.push(m.as_str().to_ascii_lowercase());
                }
            }
            without_pieces = pieces_re.replace_all(body, "").into_owned();
        }

        let mut hashes = Vec::new();
        for caps in re(
            &FILE_HASH,
            r#"(?is)<hash[^>]*\btype\s*=\s*"([^"]+)"[^>]*>\s*([0-9a-fA-F]+)\s*</hash>"#,
        )
        .captures_iter(&without_pieces)
        {
            let (Some(label), Some(value)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            if let Some(algo) = HashAlgo::from_label(label.as_str()) {
                hashes.push(FileHash {
                    algo,
                    value: value.as_str().to_ascii_lowercase(),
                });
            }
        }

        let mut mirrors = Vec::new();
        for caps in re(&URL_TAG, r"(?is)<url([^>]*)>\s*([^<\s]+)\s*</url>").captures_iter(body) {
            let attrs = caps.get(1).map_or("", |m| m.as_str());
            let Some(target) = caps.get(2) else { continue };
            let Ok(url) = Url::parse(target.as_str()) else {
                continue;
            };
            if url.scheme() != "http" && url.scheme() != "https" {
                continue;
            }
            let priority = attr_value(attrs, "priority")
                .and_then(|v| v.parse::<u32>().ok())
                .or_else(|| {
                    // Metalink 3: preference 1..=100, higher is better.
                    attr_value(attrs, "preference")
                        .and_then(|v| v.parse::<u32>().ok())
                        .map(|p| 101_u32.saturating_sub(p.min(100)))
                })
                .unwrap_or(999_999);
            mirrors.push(Mirror {
                priority,
                url,
                location: attr_value(attrs, "location"),
            });
        }
        if mirrors.is_empty() {
            return Err(MetalinkError::NoMirrors);
        }
        mirrors.sort_by_key(|m| m.priority);

        Ok(Self {
            name,
            size,
            hashes,
            piece_length,
            piece_algo,
            piece_hashes,
            mirrors,
        })
    }

    /// Builds a single-mirror description for chunking a plain URL whose
    /// size is known from a HEAD probe.
    #[must_use]
    pub fn synthetic(url: Url, size: u64, name: String) -> Self {
        Self {
            name,
            size,
            hashes: Vec::new(),
            piece_length: None,
            piece_algo: None,
            piece_hashes: Vec::new(),
            mirrors: vec![Mirror {
                priority: 1,
                url,
                location: None,
            }],
        }
    }
}

fn attr_value(attrs: &str, name: &str) -> Option<String> {
    let attr_re = re(&ATTR, r#"(?is)\b([a-z]+)\s*=\s*"([^"]*)""#);
    for caps in attr_re.captures_iter(attrs) {
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if key.as_str().eq_ignore_ascii_case(name) {
            return Some(value.as_str().to_string());
        }
    }
    None
}

/// Whether a Content-Type names a Metalink description.
#[must_use]
pub fn is_metalink_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime == "application/metalink4+xml" || mime == "application/metalink+xml"
}
