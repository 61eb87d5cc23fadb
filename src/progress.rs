//! Observer interfaces for transfer progress and connection statistics.
//!
//! The coordinator never writes to the terminal itself; anything that wants
//! a progress display or per-connection metrics implements one of these
//! traits. The defaults discard every event.

use std::net::SocketAddr;
use std::time::Duration;

/// Receives per-slot transfer progress events.
pub trait ProgressSink: Send + Sync {
    /// A worker slot started transferring `url`; `total` is the expected
    /// byte count when known.
    fn slot_begin(&self, slot: usize, url: &str, total: Option<u64>) {
        let _ = (slot, url, total);
    }

    /// `bytes` more bytes arrived on `slot`.
    fn bytes_downloaded(&self, slot: usize, bytes: u64) {
        let _ = (slot, bytes);
    }

    /// The transfer on `slot` finished (successfully or not).
    fn slot_complete(&self, slot: usize) {
        let _ = slot;
    }
}

/// Receives connection-lifecycle statistics.
pub trait StatsSink: Send + Sync {
    fn dns_resolved(&self, host: &str, port: u16, addrs: &[SocketAddr], took: Duration) {
        let _ = (host, port, addrs, took);
    }

    fn response_received(&self, url: &str, status: u16) {
        let _ = (url, status);
    }
}

/// Discards all progress events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {}

/// Discards all statistics events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStats;

impl StatsSink for NullStats {}
