//! Multi-part file assembly.
//!
//! A [`PartSet`] is shared by every PART job of one destination file. Pieces
//! are disjoint byte ranges covering `[0, total_size)`; each worker writes
//! its finished piece at the right offset through its own file handle, so no
//! write synchronization beyond the piece bookkeeping is needed.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use md5::Md5;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

use super::error::FetchError;
use super::metalink::{FileHash, HashAlgo, Metalink, Mirror};

/// One byte range of the destination file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub position: u64,
    pub length: u64,
    /// Lowercase hex digest of this piece, when the description carried one.
    pub hash: Option<String>,
}

#[derive(Debug, Default)]
struct Progress {
    done: Vec<bool>,
    completed: usize,
}

/// Shared state of one multi-part download.
#[derive(Debug)]
pub struct PartSet {
    dest: PathBuf,
    total_size: u64,
    pieces: Vec<Piece>,
    mirrors: Vec<Mirror>,
    file_hashes: Vec<FileHash>,
    piece_algo: Option<HashAlgo>,
    progress: Mutex<Progress>,
}

fn lock(progress: &Mutex<Progress>) -> MutexGuard<'_, Progress> {
    progress
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl PartSet {
    /// Plans the pieces for `metalink` and binds them to `dest`.
    ///
    /// Piece boundaries come from the description when present; otherwise
    /// the file is cut into `fallback_chunk`-sized pieces (or one piece when
    /// no chunk size applies).
    #[must_use]
    pub fn plan(metalink: &Metalink, dest: PathBuf, fallback_chunk: Option<u64>) -> Self {
        let piece_length = metalink
            .piece_length
            .or(fallback_chunk)
            .unwrap_or(metalink.size.max(1));
        let pieces = cut_pieces(metalink.size, piece_length, &metalink.piece_hashes);
        let done = vec![false; pieces.len()];
        Self {
            dest,
            total_size: metalink.size,
            pieces,
            mirrors: metalink.mirrors.clone(),
            file_hashes: metalink.hashes.clone(),
            piece_algo: metalink.piece_algo,
            progress: Mutex::new(Progress {
                done,
                completed: 0,
            }),
        }
    }

    #[must_use]
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    #[must_use]
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    #[must_use]
    pub fn piece(&self, index: usize) -> Option<&Piece> {
        self.pieces.get(index)
    }

    #[must_use]
    pub fn mirror_count(&self) -> usize {
        self.mirrors.len()
    }

    /// The highest-priority mirror URL (mirrors are kept sorted).
    ///
    /// # Panics
    ///
    /// Never: a `PartSet` is only built from descriptions with ≥ 1 mirror.
    #[must_use]
    pub fn primary_url(&self) -> Url {
        self.mirrors[0].url.clone()
    }

    /// Mirror for `worker_id`'s attempt number `attempt`: start at
    /// `worker_id % mirrors`, advance by one per retry.
    #[must_use]
    pub fn mirror_for(&self, worker_id: usize, attempt: u32) -> &Mirror {
        let idx = (worker_id + attempt as usize) % self.mirrors.len();
        &self.mirrors[idx]
    }

    /// Indexes of pieces not yet done.
    #[must_use]
    pub fn unfinished_pieces(&self) -> Vec<usize> {
        let progress = lock(&self.progress);
        progress
            .done
            .iter()
            .enumerate()
            .filter_map(|(i, done)| (!done).then_some(i))
            .collect()
    }

    #[must_use]
    pub fn completed_pieces(&self) -> usize {
        lock(&self.progress).completed
    }

    /// Creates the destination (and parents) sized to the full file.
    ///
    /// # Errors
    ///
    /// Propagates filesystem failures as [`FetchError::Io`].
    pub fn prepare_dest(&self) -> Result<(), FetchError> {
        if let Some(parent) = self.dest.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.dest)
            .map_err(|e| FetchError::io(&self.dest, e))?;
        file.set_len(self.total_size)
            .map_err(|e| FetchError::io(&self.dest, e))?;
        debug!(dest = %self.dest.display(), size = self.total_size, "destination prepared");
        Ok(())
    }

    /// Verifies (when a piece hash exists) and writes one finished piece at
    /// its offset, then marks it done.
    ///
    /// Returns `true` when this was the last outstanding piece.
    ///
    /// # Errors
    ///
    /// [`FetchError::Integrity`] on a piece-hash mismatch, [`FetchError::Io`]
    /// on write failure.
    pub fn commit_piece(&self, index: usize, data: &[u8]) -> Result<bool, FetchError> {
        let piece = self.pieces.get(index).ok_or_else(|| {
            FetchError::protocol(self.dest.display().to_string(), "piece index out of range")
        })?;
        if data.len() as u64 != piece.length {
            return Err(FetchError::protocol(
                self.dest.display().to_string(),
                format!(
                    "piece {index} length mismatch: expected {}, got {}",
                    piece.length,
                    data.len()
                ),
            ));
        }
        if let (Some(expected), Some(algo)) = (&piece.hash, self.piece_algo) {
            let actual = digest_hex(algo, data);
            if &actual != expected {
                return Err(FetchError::Integrity {
                    path: self.dest.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        // Each caller uses its own handle; pieces are disjoint, so the
        // writes never overlap.
        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.dest)
            .map_err(|e| FetchError::io(&self.dest, e))?;
        file.seek(SeekFrom::Start(piece.position))
            .map_err(|e| FetchError::io(&self.dest, e))?;
        file.write_all(data)
            .map_err(|e| FetchError::io(&self.dest, e))?;

        let mut progress = lock(&self.progress);
        if !progress.done[index] {
            progress.done[index] = true;
            progress.completed += 1;
        }
        let all_done = progress.completed == self.pieces.len();
        debug!(
            dest = %self.dest.display(),
            piece = index,
            completed = progress.completed,
            total = self.pieces.len(),
            "piece committed"
        );
        Ok(all_done)
    }

    /// Verifies the assembled file against the strongest known whole-file
    /// hash. A set without hashes verifies trivially.
    ///
    /// # Errors
    ///
    /// [`FetchError::Integrity`] on mismatch, [`FetchError::Io`] when the
    /// file cannot be read back.
    pub fn verify_file(&self) -> Result<(), FetchError> {
        // Prefer SHA-256 over MD5 when both are present.
        let strongest = self
            .file_hashes
            .iter()
            .find(|h| h.algo == HashAlgo::Sha256)
            .or_else(|| self.file_hashes.first());
        let Some(expected) = strongest else {
            debug!(dest = %self.dest.display(), "no file hash to verify");
            return Ok(());
        };

        let mut file = File::open(&self.dest).map_err(|e| FetchError::io(&self.dest, e))?;
        let actual = match expected.algo {
            HashAlgo::Sha256 => stream_digest::<Sha256>(&mut file, &self.dest)?,
            HashAlgo::Md5 => stream_digest::<Md5>(&mut file, &self.dest)?,
        };
        if actual == expected.value {
            info!(dest = %self.dest.display(), "checksum verified");
            Ok(())
        } else {
            warn!(dest = %self.dest.display(), expected = %expected.value, actual = %actual, "checksum mismatch");
            Err(FetchError::Integrity {
                path: self.dest.clone(),
                expected: expected.value.clone(),
                actual,
            })
        }
    }
}

fn cut_pieces(total: u64, piece_length: u64, hashes: &[String]) -> Vec<Piece> {
    let piece_length = piece_length.max(1);
    let mut pieces = Vec::new();
    let mut position = 0;
    let mut index = 0;
    while position < total {
        let length = piece_length.min(total - position);
        pieces.push(Piece {
            position,
            length,
            hash: hashes.get(index).cloned(),
        });
        position += length;
        index += 1;
    }
    pieces
}

fn digest_hex(algo: HashAlgo, data: &[u8]) -> String {
    match algo {
        HashAlgo::Sha256 => hex::encode(Sha256::digest(data)),
        HashAlgo::Md5 => hex::encode(Md5::digest(data)),
    }
}

fn stream_digest<D: Digest>(file: &mut File, path: &Path) -> Result<String, FetchError> {
    let mut hasher = D::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| FetchError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
