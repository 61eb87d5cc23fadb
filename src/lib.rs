//! webgrab — a recursive, multi-threaded web downloader.
//!
//! The crate is organized around the download coordinator:
//! - [`resolver`] - blocking DNS with a shared single-flight cache
//! - [`queue`] - job queue, host registry, and URL blacklist
//! - [`download`] - worker pool, fetch pipeline, and part scheduler
//! - [`parse`] - HTML/CSS/sitemap link extraction
//! - [`input`] - seed URLs from arguments, files, and stdin
//! - [`app`] - the main controller tying it all together

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod app;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod input;
pub mod parse;
pub mod progress;
pub mod queue;
pub mod resolver;

pub use app::App;
pub use config::{Config, DnsBackendKind, FamilyPreference, HttpsEnforce, Timeout};
pub use download::{FetchError, Metalink, PartSet, RetryPolicy, WorkerPool};
pub use error::{ExitStatus, StatusRegister};
pub use progress::{NullProgress, NullStats, ProgressSink, StatsSink};
pub use queue::{Coordinator, EnqueueOutcome, Job, Polled};
pub use resolver::{DnsBackend, DnsCache, ResolveError, ResolveOptions};
