//! Process exit-status taxonomy and the shared status register.
//!
//! Every terminal error anywhere in the run reports an [`ExitStatus`]; the
//! [`StatusRegister`] keeps the lowest-numbered non-zero status seen, so the
//! most specific error class wins over "generic".

use std::sync::atomic::{AtomicU8, Ordering};

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ExitStatus {
    /// All requested work succeeded.
    Success = 0,
    /// Unclassified error.
    Generic = 1,
    /// Bad URL, unparseable input file, or invalid configuration.
    Init = 2,
    /// Local file I/O failure.
    Io = 3,
    /// DNS or connection failure.
    Network = 4,
    /// TLS handshake or certificate-validation failure.
    Tls = 5,
    /// Authentication failure.
    Auth = 6,
    /// HTTP protocol error (malformed response, redirect loop, too many redirects).
    Protocol = 7,
    /// The remote resource does not exist (HTTP 404).
    RemoteMissing = 8,
    /// Hash verification of a completed multi-part file failed.
    Integrity = 9,
}

impl ExitStatus {
    /// Numeric process exit code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Success,
            2 => Self::Init,
            3 => Self::Io,
            4 => Self::Network,
            5 => Self::Tls,
            6 => Self::Auth,
            7 => Self::Protocol,
            8 => Self::RemoteMissing,
            9 => Self::Integrity,
            _ => Self::Generic,
        }
    }
}

/// Shared register of the process exit status.
///
/// Workers record every terminal error here; the first non-zero status is
/// kept unless a lower-numbered (more specific classes are numbered 2..=9,
/// generic is 1) status arrives later.
#[derive(Debug, Default)]
pub struct StatusRegister(AtomicU8);

impl StatusRegister {
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    /// Records `status`. A non-zero value replaces the current one only when
    /// the register is still clear or the new value is numerically lower.
    pub fn record(&self, status: ExitStatus) {
        if status == ExitStatus::Success {
            return;
        }
        let new = status.code();
        let mut current = self.0.load(Ordering::SeqCst);
        loop {
            if current != 0 && current <= new {
                return;
            }
            match self
                .0
                .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return,
                Err(seen) => current = seen,
            }
        }
    }

    /// Current status; `Success` when nothing was recorded.
    #[must_use]
    pub fn get(&self) -> ExitStatus {
        ExitStatus::from_code(self.0.load(Ordering::SeqCst))
    }
}
