/* Shared HID core error taxonomy: HidError aggregates transport, descriptor, and raw-interface
 * failures for callers that need a single error type. */
use thiserror::Error;

/// Errors surfaced across the HID core boundary (transport abstraction, bus core, raw
/// interface). Transport-specific errors fold into this enum at the points where a caller
/// needs to match on a single taxonomy; see `transport::TransportError` for the narrower
/// enum they originate from. The descriptor parser never errors (spec: malformed
/// descriptors stop emission silently rather than raising an error).
#[derive(Debug, Error)]
#[allow(dead_code)]
pub enum HidError {
    /// The device matcher found no entry; probe returns without attaching.
    #[error("no matching driver for this device")]
    NoMatch,

    /// The operation is not supported on this transport (e.g. `set_idle` on I2C-HID).
    #[error("unsupported on this transport: {0}")]
    Unsupported(&'static str),

    /// Transport-level failure (bus error, timeout, disconnected).
    #[error("transport I/O error: {0}")]
    Io(String),

    /// A response did not match expectations (wrong report ID echoed, wrong length).
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The raw device was already opened by another caller.
    #[error("device already open")]
    Busy,

    /// Caller-provided buffer too small, or device declared a length the protocol disallows.
    #[error("buffer overflow: {0}")]
    Overflow(String),

    /// Caller supplied an illegal combination of arguments.
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl From<crate::transport::TransportError> for HidError {
    fn from(e: crate::transport::TransportError) -> Self {
        use crate::transport::TransportError as T;
        match e {
            T::Unsupported(op) => HidError::Unsupported(op),
            T::Io(msg) => HidError::Io(msg),
            T::Malformed(msg) => HidError::Malformed(msg),
            T::Overflow(msg) => HidError::Overflow(msg),
            T::Timeout => HidError::Io("timed out".to_string()),
        }
    }
}
