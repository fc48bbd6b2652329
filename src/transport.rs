/* Transport abstraction: the capability set the bus core requires from a concrete USB or
 * I2C-HID driver (spec.md §4.3). Expressed as an async_trait, the same idiom the teacher uses
 * for `DeviceDriver` (driver/mod.rs) — the bus core stores a `Box<dyn Transport>` handle and
 * never a concrete type, per the "polymorphism over transports" design note (spec.md §9). */
use thiserror::Error;
use tokio::sync::mpsc;

/// Report type selector used by `get_report`/`set_report` (spec.md §4.3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportType {
    Input,
    Output,
    Feature,
}

impl ReportType {
    /// Value carried in USB `wValue`'s high byte / I2C-HID command-packet type nibble.
    pub fn wire_value(self) -> u8 {
        match self {
            ReportType::Input => 1,
            ReportType::Output => 2,
            ReportType::Feature => 3,
        }
    }
}

/// `SET_PROTOCOL` request payload (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Boot,
    Report,
}

/// Transport-level error taxonomy (spec.md §7); folds into `HidError` at the boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("unsupported on this transport: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("buffer overflow: {0}")]
    Overflow(String),
    #[error("request timed out")]
    Timeout,
}

/// A received input report, as delivered to the bus core's interrupt fan-out. The report ID
/// is `0` when the device has no numbered reports (spec.md §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputReport {
    pub report_id: u8,
    pub bytes: Vec<u8>,
}

/// Per-(kind,report_id) byte-length ceilings the transport can use to size its interrupt
/// buffers, handed to it at `intr_setup` (spec.md §4.3).
#[derive(Debug, Clone, Default)]
pub struct ReportSizes {
    pub max_input: usize,
    pub max_output: usize,
    pub max_feature: usize,
}

/// The capability set a concrete USB or I2C-HID driver exposes to the bus core.
///
/// All fallible operations may fail with a `TransportError`; the two idle/protocol calls
/// default to `Unsupported` since I2C-HID has no equivalent (spec.md §4.3) — a USB transport
/// overrides them.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the report descriptor. Idempotent; callers are expected to cache the result
    /// (the bus core does, in `ReportDescriptor`).
    async fn get_report_descr(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Read the next input report directly (I2C-HID polling mode). Not supported on USB,
    /// where input only arrives via the interrupt pipe.
    async fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let _ = max_len;
        Err(TransportError::Unsupported("read"))
    }

    /// Raw output write; the first byte may be a report ID.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// `GET_REPORT`. Strips any transport-level length/ID framing; the returned bytes are the
    /// report body only, with `id` already validated against what the device echoed back.
    async fn get_report(
        &mut self,
        kind: ReportType,
        id: u8,
        max_len: usize,
    ) -> Result<Vec<u8>, TransportError>;

    /// `SET_REPORT`.
    async fn set_report(&mut self, kind: ReportType, id: u8, bytes: &[u8]) -> Result<(), TransportError>;

    /// `SET_IDLE`. `duration_ms` is rounded to the nearest 4ms tick on USB (spec.md §6);
    /// unsupported on I2C-HID.
    async fn set_idle(&mut self, duration_ms: u32, id: u8) -> Result<(), TransportError> {
        let _ = (duration_ms, id);
        Err(TransportError::Unsupported("set_idle"))
    }

    /// `SET_PROTOCOL`; unsupported on I2C-HID.
    async fn set_protocol(&mut self, protocol: Protocol) -> Result<(), TransportError> {
        let _ = protocol;
        Err(TransportError::Unsupported("set_protocol"))
    }

    /// Register the interrupt sink and report-size ceilings ahead of `intr_start`. The
    /// transport must push every input report it receives to `tx` from `intr_start` until
    /// `intr_stop`, in the order received (spec.md §4.3, §5). A channel sender stands in for
    /// the spec's `(intr_fn, ctx)` callback pair — the idiomatic substitute in safe Rust for
    /// a function-pointer-plus-context-pointer registration.
    fn intr_setup(&mut self, tx: mpsc::UnboundedSender<InputReport>, sizes: ReportSizes);

    /// Start delivering input reports to the registered sink.
    async fn intr_start(&mut self) -> Result<(), TransportError>;

    /// Stop delivering input reports. Guarantees no callback is in flight on return (spec.md
    /// §5) — implementations that hand work to a worker thread must join/drain it here.
    async fn intr_stop(&mut self) -> Result<(), TransportError>;

    /// Synchronously flush any already-received report to the sink from the caller's
    /// context, bypassing normal scheduling. Used only when the host cannot sleep (panic,
    /// debugger); the crate never calls this from a path that can otherwise schedule.
    fn intr_poll(&mut self);
}
