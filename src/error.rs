//! Error types for capture sessions.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::session::State;

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between opening a device node and handing out a frame.
#[derive(Error, Debug)]
pub enum Error {
    /// Device node missing, not a capture device, or held exclusively by someone else.
    #[error("cannot open {}: {source}", path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The driver advertised nothing usable. Recovered locally with the fallback format.
    #[error("format enumeration failed: {0}")]
    Enumeration(String),

    /// The driver refused the negotiated format or frame rate.
    #[error("negotiation failed while {step}: {source}")]
    Negotiation {
        step: &'static str,
        #[source]
        source: io::Error,
    },

    /// Requesting or mapping kernel buffers failed. Nothing stays mapped.
    #[error("buffer allocation failed: {0}")]
    BufferAllocation(String),

    /// A single captured buffer was unusable.
    #[error("bad frame: {0}")]
    FrameRead(String),

    /// Too many consecutive bad frames, the session stopped producing.
    #[error("session unhealthy after {0} consecutive bad frames")]
    HealthDegraded(u32),

    /// A state machine transition that the session lifecycle does not allow.
    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidTransition { from: State, to: State },

    /// Negative or otherwise unusable camera index.
    #[error("invalid device number {0}")]
    InvalidDevice(i32),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
