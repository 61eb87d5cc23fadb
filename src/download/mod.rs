//! Fetching: worker pool, per-worker HTTP client, the response pipeline,
//! retry policy, robots parsing, Metalink/chunked part scheduling, and the
//! local file policy.

pub mod auth;
pub mod client;
pub mod error;
pub mod filename;
pub mod metalink;
pub mod parts;
pub mod pipeline;
pub mod retry;
pub mod robots;
pub mod save;
pub mod worker;

pub use client::HttpClient;
pub use error::FetchError;
pub use filename::LocalNamer;
pub use metalink::{HashAlgo, Metalink, Mirror};
pub use parts::{PartSet, Piece};
pub use pipeline::FetchContext;
pub use retry::{RetryDecision, RetryPolicy};
pub use robots::RobotsPolicy;
pub use worker::WorkerPool;
