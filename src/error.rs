//! Error types for the print pipeline.
//!
//! Binarizer and packetizer errors are structural and never retried. Channel
//! errors are split into transient ones (retried inside a session) and fatal
//! ones (abort the job immediately).

use std::time::Duration;

use thiserror::Error;

use crate::protocol::PrinterStatus;
use crate::session::SessionFailure;

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Image or bitmap geometry the printer cannot take.
    #[error("invalid dimensions {width}x{height} (max width {max_width})")]
    InvalidDimensions {
        width: usize,
        height: usize,
        max_width: usize,
    },

    /// A single packed row does not fit in one frame payload.
    #[error("packed row of {row_bytes} bytes exceeds max payload of {max_payload} bytes")]
    PayloadTooLarge { row_bytes: usize, max_payload: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No response from the channel within the bound.
    #[error("no response within {0:?}")]
    ChannelTimeout(Duration),

    #[error("channel closed")]
    ChannelClosed,

    /// The channel refused a write but is still usable.
    #[error("write rejected: {0}")]
    WriteRejected(String),

    /// Malformed or unexpected response from the printer.
    #[error("protocol violation: {reason}")]
    ProtocolViolation {
        reason: String,
        response: Option<Vec<u8>>,
    },

    /// The printer reported a fault during the handshake.
    #[error("printer not ready: {0}")]
    PrinterNotReady(PrinterStatus),

    /// Transient failures persisted past the retry budget.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    #[error(transparent)]
    Bluetooth(#[from] btleplug::Error),

    /// A transport session ended in the `Failed` phase.
    #[error(transparent)]
    Failed(#[from] Box<SessionFailure>),
}

/// Flat classification of [`Error`], convenient for matching in callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidDimensions,
    PayloadTooLarge,
    InvalidConfig,
    ChannelTimeout,
    ChannelClosed,
    WriteRejected,
    ProtocolViolation,
    PrinterNotReady,
    RetriesExhausted,
    Bluetooth,
}

impl Error {
    pub(crate) fn violation(reason: impl Into<String>, response: Option<&[u8]>) -> Self {
        Error::ProtocolViolation {
            reason: reason.into(),
            response: response.map(<[u8]>::to_vec),
        }
    }

    /// Kind of the error; a failed session reports the kind of its cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidDimensions { .. } => ErrorKind::InvalidDimensions,
            Error::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::ChannelTimeout(_) => ErrorKind::ChannelTimeout,
            Error::ChannelClosed => ErrorKind::ChannelClosed,
            Error::WriteRejected(_) => ErrorKind::WriteRejected,
            Error::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
            Error::PrinterNotReady(_) => ErrorKind::PrinterNotReady,
            Error::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Error::Bluetooth(_) => ErrorKind::Bluetooth,
            Error::Failed(failure) => failure.error.kind(),
        }
    }

    /// Whether a session may retry the operation that produced this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::WriteRejected(_) | Error::ChannelTimeout(_))
    }

    /// Last raw bytes received from the printer, if the error carries any.
    pub fn last_response(&self) -> Option<&[u8]> {
        match self {
            Error::ProtocolViolation { response, .. } => response.as_deref(),
            Error::RetriesExhausted { last, .. } => last.last_response(),
            Error::Failed(failure) => failure
                .last_response
                .as_deref()
                .or_else(|| failure.error.last_response()),
            _ => None,
        }
    }
}
