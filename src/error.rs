use std::io;
use thiserror::Error;

/// Error kinds shared by the protocol and codec layers, and carried
/// by the pipeline's `on_error` callback.
///
/// Device-facing code (frontend, demux, CA, DVR) reports failures as
/// `anyhow::Error` with ioctl context instead; see the `dvb` module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Wire data failed validation; dropped locally and counted.
    #[error("malformed {0}")]
    Malformed(&'static str),

    /// Read/write returned EAGAIN/EINTR; the operation may be retried.
    #[error("transient io: {0:?}")]
    Transient(io::ErrorKind),

    /// The component must tear down and restart its state machine.
    #[error("recoverable: {0}")]
    Recoverable(&'static str),

    /// Misconfiguration or broken invariant; never recovered from.
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Transient(e.kind())
    }
}

impl Error {
    /// True when the caller may simply retry the failed syscall.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transient(io::ErrorKind::WouldBlock) | Error::Transient(io::ErrorKind::Interrupted)
        )
    }
}
