//! Error taxonomy for the servo bus
//!
//! `BusError` is what callers see; `ProtocolError` is the decode-time subset
//! that the dispatcher retries before giving up. Both are `Clone` so a fatal
//! transport failure can be fanned out to every queued command.

use std::time::Duration;
use thiserror::Error;

/// Decode-time failure detected by a brand codec.
///
/// These are scoped to a single command and eligible for retry: the frame was
/// damaged in transit or the device reported a fault, but the bus itself is
/// still healthy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("checksum mismatch (expected {expected:#06x}, got {got:#06x})")]
    Checksum { expected: u16, got: u16 },

    #[error("malformed response frame: {0}")]
    Malformed(String),

    #[error("response from servo {got} while waiting on servo {expected}")]
    WrongServo { expected: u8, got: u8 },

    #[error("device reported fault code {0:#04x}")]
    DeviceFault(u8),

    #[error("unexpected response payload: {0}")]
    UnexpectedPayload(String),
}

/// Terminal outcome of a command, or a submission-time rejection.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Physical-layer failure. Fatal: the bus is closed and every pending
    /// command resolves with this error.
    #[error("transport failure: {0}")]
    Transport(String),

    /// No attributable response within the window, retries exhausted.
    #[error("no response after {attempts} attempts of {per_attempt:?}")]
    Timeout { attempts: u32, per_attempt: Duration },

    /// Decode failure, retries exhausted.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Argument rejected before any bytes touched the bus.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// Submission after `close()`, or the dispatcher task is gone.
    #[error("bus is closed")]
    Closed,

    /// The submission queue is saturated.
    #[error("command queue is full")]
    QueueFull,

    /// The brand codec does not implement this operation.
    #[error("operation not supported by the {0} codec")]
    NotSupported(&'static str),
}

impl BusError {
    pub(crate) fn transport(err: &std::io::Error) -> Self {
        BusError::Transport(err.to_string())
    }

    /// True for errors that poison the whole bus rather than one command.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BusError::Transport(_) | BusError::Closed)
    }
}
