/* Raw character interface: a per-open-file-description view onto a device's report stream,
 * backpressured by a fixed-capacity ring buffer (spec.md §4.7). Grounded on the bus core's
 * own actor-task shape — a shared `Mutex`-guarded buffer plus a `Notify` readiness signal
 * stands in for the kernel's wait-queue-plus-poll-table pair a real `/dev/hidraw` node uses.
 * Open is exclusive per device (spec.md §8 invariant 7), so `RawDevice` owns the pump task
 * that drains the bus core's per-child report receiver into the shared ring for as long as a
 * handle is open, and tears it down again on close. */
use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::bus::{BusHandle, XferMask};
use crate::error::HidError;
use crate::transport::{InputReport, ReportType};

/// Typed stand-in for the raw interface's ioctl surface (spec.md §6). A transport-agnostic
/// core has no real file descriptor to hand `libc::ioctl`, so each request/response pair that
/// a real `/dev/hidraw` node would dispatch through `ioctl(2)` is instead a constructor/variant
/// here; the numeric constants are kept for fidelity with the wire protocol, not because
/// anything calls them as a syscall number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawIoctl {
    /// `HIDIOCGRDESCSIZE` (0x4801): report descriptor size in bytes.
    GetDescSize,
    /// `HIDIOCGRDESC` (0x4802): the report descriptor itself.
    GetDesc,
    /// `HIDIOCGRAWINFO` (0x4803): bus type, vendor ID, product ID.
    GetRawInfo,
    /// `HIDIOCSFEATURE` (0x4806): SET_REPORT(Feature).
    SetFeature,
    /// `HIDIOCGFEATURE` (0x4807): GET_REPORT(Feature) for the given report ID, routed through a
    /// live round-trip to the owning bus core rather than the cached ring.
    GetFeature(u8),
    /// `HIDIOCGINPUT` (0x4808, I2C-HID only): GET_REPORT(Input) for the given report ID, same
    /// live round-trip as `GetFeature`.
    GetInput(u8),
    /// `HIDIOCSOUTPUT` (0x4809): SET_REPORT(Output) via the control channel rather than write().
    SetOutput,
    /// `HIDIOCSFLAG(HIDRAW_IMMEDIATE)`: toggle immediate-mode reads, where `read()` bypasses the
    /// ring and round-trips `GET_REPORT(Input)` synchronously instead.
    SetImmed(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawIoctlResponse {
    DescSize(usize),
    Desc(Vec<u8>),
    /// `vendor`/`product` are signed to match the kernel's `hidraw_devinfo` layout — IDs above
    /// 0x7fff wrap negative, same as the real ioctl.
    RawInfo { bus: u32, vendor: i16, product: i16 },
    Bytes(Vec<u8>),
    Ack,
}

/// Per-open-file-description framing mode: hidraw strips nothing but a zero report ID, uhid-style
/// framing prefixes an event type byte ahead of the report itself and demands exact-size writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    HidRaw,
    Uhid,
}

struct RingState {
    buf: VecDeque<InputReport>,
    capacity: usize,
    /// Count of reports dropped because the ring was full (spec.md §8 invariant 6): the
    /// incoming report is dropped, not the oldest queued one — the reader that fell behind
    /// loses its newest data rather than silently rewriting history it already saw.
    dropped: u64,
    /// Set once the ring fills and `READ` has been unsubscribed at the bus core; cleared again
    /// once a reader fully drains the ring, at which point `READ` is resubscribed.
    flow_stopped: bool,
}

/// The shared, capacity-bounded report ring one physical device's raw node delivers from.
/// Exactly one `RawHandle` drains it at a time, enforced by `RawDevice`'s open exclusivity.
pub struct RawRing {
    state: Mutex<RingState>,
    notify: Notify,
    bus: BusHandle,
    child_index: usize,
}

impl RawRing {
    pub fn new(capacity: usize, bus: BusHandle, child_index: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RingState {
                buf: VecDeque::with_capacity(capacity),
                capacity,
                dropped: 0,
                flow_stopped: false,
            }),
            notify: Notify::new(),
            bus,
            child_index,
        })
    }

    /// Push a newly arrived interrupt report. If the ring is already at capacity the incoming
    /// report is dropped rather than evicting the oldest queued one (spec.md §8 invariant 6).
    /// Once a push fills the ring, `READ` is unsubscribed at the bus core so the transport's
    /// own `intr_stop` applies the real backpressure, not just this buffer.
    pub async fn push(&self, report: InputReport) {
        let mut state = self.state.lock().await;
        if state.buf.len() >= state.capacity {
            state.dropped += 1;
            return;
        }
        state.buf.push_back(report);
        let just_filled = !state.flow_stopped && state.buf.len() >= state.capacity;
        if just_filled {
            state.flow_stopped = true;
        }
        drop(state);
        self.notify.notify_waiters();
        if just_filled {
            let _ = self.bus.set_xfer(self.child_index, XferMask::empty()).await;
        }
    }

    /// Resume delivery once a reader has drained the ring empty, if it had been stopped.
    async fn resume_if_drained(&self) {
        let mut state = self.state.lock().await;
        if state.flow_stopped && state.buf.is_empty() {
            state.flow_stopped = false;
            drop(state);
            let _ = self.bus.set_xfer(self.child_index, XferMask::READ).await;
        }
    }

    pub async fn dropped_count(&self) -> u64 {
        self.state.lock().await.dropped
    }
}

/// One physical device's raw character node. Enforces open exclusivity (spec.md §8 invariant
/// 7: two concurrent opens yield exactly one success and one `Busy`) and owns the pump task
/// that drains the bus core's per-child report receiver into the shared ring for as long as a
/// handle has it open.
pub struct RawDevice {
    ring: Arc<RawRing>,
    bus: BusHandle,
    child_index: usize,
    open: Mutex<bool>,
    reports: Mutex<mpsc::UnboundedReceiver<InputReport>>,
}

impl RawDevice {
    pub fn new(
        bus: BusHandle,
        child_index: usize,
        capacity: usize,
        reports: mpsc::UnboundedReceiver<InputReport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ring: RawRing::new(capacity, bus.clone(), child_index),
            bus,
            child_index,
            open: Mutex::new(false),
            reports: Mutex::new(reports),
        })
    }

    /// Open the device, subscribing to `READ` and spawning the pump task that feeds the ring.
    /// Fails with `Busy` if another handle is already open.
    pub async fn open(self: &Arc<Self>, framing: FramingMode) -> Result<RawHandle, HidError> {
        let mut open = self.open.lock().await;
        if *open {
            return Err(HidError::Busy);
        }
        *open = true;
        drop(open);

        if let Err(e) = self.bus.set_xfer(self.child_index, XferMask::READ).await {
            *self.open.lock().await = false;
            return Err(HidError::Io(e));
        }

        let device = Arc::clone(self);
        let ring = Arc::clone(&self.ring);
        let pump = tokio::spawn(async move {
            let mut reports = device.reports.lock().await;
            while let Some(report) = reports.recv().await {
                ring.push(report).await;
            }
        });

        Ok(RawHandle {
            device: Arc::clone(self),
            ring: Arc::clone(&self.ring),
            framing,
            local: Mutex::new(VecDeque::new()),
            closed: Mutex::new(false),
            immediate: Mutex::new(false),
            pump: Mutex::new(Some(pump)),
        })
    }
}

/// One opened handle onto a device's raw ring (spec.md §4.7). Only one can exist at a time per
/// `RawDevice`; a second `open()` while this one is live gets `Busy`.
pub struct RawHandle {
    device: Arc<RawDevice>,
    ring: Arc<RawRing>,
    framing: FramingMode,
    /// Per-open read cursor: reports already delivered to this handle are removed from its own
    /// view by `read`, not from the shared ring.
    local: Mutex<VecDeque<InputReport>>,
    closed: Mutex<bool>,
    /// HIDRAW_IMMEDIATE: when set, `read` bypasses the ring entirely and round-trips
    /// `GET_REPORT(Input)` synchronously instead of waiting on queued interrupts.
    immediate: Mutex<bool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl RawHandle {
    /// Pull everything currently queued in the shared ring into this handle's own backlog,
    /// then pop one report off the front. Blocks (via `Notify`) until at least one report is
    /// available or the handle is closed. In immediate mode, skips the ring and fetches the
    /// current input report directly from the bus core.
    pub async fn read(&self) -> Result<Vec<u8>, HidError> {
        if *self.closed.lock().await {
            return Err(HidError::Io("handle closed".to_string()));
        }
        if *self.immediate.lock().await {
            let sizes = self.device.bus.sizes().await.map_err(HidError::Io)?;
            let bytes = self
                .device
                .bus
                .get_report(ReportType::Input, 0, sizes.max_input)
                .await
                .map_err(HidError::Io)?;
            return Ok(self.frame(InputReport { report_id: 0, bytes }));
        }
        loop {
            if *self.closed.lock().await {
                return Err(HidError::Io("handle closed".to_string()));
            }
            {
                let mut local = self.local.lock().await;
                if let Some(report) = local.pop_front() {
                    return Ok(self.frame(report));
                }
            }
            self.drain_ring().await;
            self.ring.resume_if_drained().await;
            {
                let local = self.local.lock().await;
                if !local.is_empty() {
                    continue;
                }
            }
            self.ring.notify.notified().await;
        }
    }

    async fn drain_ring(&self) {
        let mut ring_state = self.ring.state.lock().await;
        if ring_state.buf.is_empty() {
            return;
        }
        let mut local = self.local.lock().await;
        local.extend(ring_state.buf.drain(..));
    }

    fn frame(&self, report: InputReport) -> Vec<u8> {
        let mut out = Vec::with_capacity(report.bytes.len() + 2);
        if self.framing == FramingMode::Uhid {
            out.push(0x02); // UHID_INPUT2 event type
        }
        if report.report_id != 0 {
            out.push(report.report_id);
        }
        out.extend_from_slice(&report.bytes);
        out
    }

    /// Write an output report through the owning bus core. uhid framing carries an explicit
    /// size that must equal the declared output report size exactly (`resid == osize`); no
    /// report-ID byte is ever part of a uhid payload. hidraw framing expects a leading report-ID
    /// byte, but a leading `0` means the device has no numbered reports and carries no data, so
    /// it is stripped before the write; a nonzero ID is passed through untouched, matching how
    /// the transport's own `write` already treats a leading byte as an optional report ID.
    /// Declared sizes above the transport's maximum fail with `Overflow` (`ENOBUFS`).
    pub async fn write(&self, bytes: &[u8]) -> Result<(), HidError> {
        if *self.closed.lock().await {
            return Err(HidError::Io("handle closed".to_string()));
        }
        let sizes = self.device.bus.sizes().await.map_err(HidError::Io)?;

        let payload: Vec<u8> = match self.framing {
            FramingMode::Uhid => {
                if bytes.len() != sizes.max_output {
                    return Err(HidError::Invalid(format!(
                        "uhid output size {} does not match declared size {}",
                        bytes.len(),
                        sizes.max_output
                    )));
                }
                bytes.to_vec()
            }
            FramingMode::HidRaw => match bytes.split_first() {
                Some((0, rest)) => rest.to_vec(),
                _ => bytes.to_vec(),
            },
        };

        if payload.len() > sizes.max_output {
            return Err(HidError::Overflow(format!(
                "write of {} bytes exceeds max output report size {}",
                payload.len(),
                sizes.max_output
            )));
        }

        self.device.bus.write(payload).await.map_err(HidError::Io)
    }

    /// Dispatch a typed ioctl request. Descriptor bytes and cached device identity are still
    /// supplied by the caller, since the bus core owns them; `GetFeature`/`GetInput` are the
    /// two requests that need a live round-trip rather than cached facts, so they go through
    /// `BusHandle::get_report` against the bus core this handle's device is attached to.
    pub async fn ioctl(
        &self,
        request: RawIoctl,
        descriptor: &[u8],
        bus: u32,
        vendor: i16,
        product: i16,
    ) -> Result<RawIoctlResponse, HidError> {
        match request {
            RawIoctl::GetDescSize => Ok(RawIoctlResponse::DescSize(descriptor.len())),
            RawIoctl::GetDesc => Ok(RawIoctlResponse::Desc(descriptor.to_vec())),
            RawIoctl::GetRawInfo => Ok(RawIoctlResponse::RawInfo { bus, vendor, product }),
            RawIoctl::SetFeature | RawIoctl::SetOutput => Ok(RawIoctlResponse::Ack),
            RawIoctl::SetImmed(on) => {
                *self.immediate.lock().await = on;
                Ok(RawIoctlResponse::Ack)
            }
            RawIoctl::GetFeature(id) => {
                let sizes = self.device.bus.sizes().await.map_err(HidError::Io)?;
                let bytes = self
                    .device
                    .bus
                    .get_report(ReportType::Feature, id, sizes.max_feature)
                    .await
                    .map_err(HidError::Io)?;
                Ok(RawIoctlResponse::Bytes(bytes))
            }
            RawIoctl::GetInput(id) => {
                let sizes = self.device.bus.sizes().await.map_err(HidError::Io)?;
                let bytes = self
                    .device
                    .bus
                    .get_report(ReportType::Input, id, sizes.max_input)
                    .await
                    .map_err(HidError::Io)?;
                Ok(RawIoctlResponse::Bytes(bytes))
            }
        }
    }

    /// Close the handle: wakes any in-flight `read` so it returns an error rather than hanging
    /// forever (spec.md §8 invariant 7 / the FIOASYNC-vs-close race in §9 — async delivery
    /// must stop before the handle is considered closed, and close must not return while a
    /// notification is still being delivered), tears down the pump task, unsubscribes `READ`,
    /// and releases open exclusivity so a subsequent `open()` succeeds.
    pub async fn close(&self) {
        *self.closed.lock().await = true;
        self.ring.notify.notify_waiters();
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        let _ = self.device.bus.set_xfer(self.device.child_index, XferMask::empty()).await;
        *self.device.open.lock().await = false;
    }
}

impl Drop for RawHandle {
    /// Best-effort fallback for a caller that drops the handle without calling `close()`
    /// (early return, panic unwind): releases open exclusivity and stops the pump task
    /// synchronously via `try_lock`, since `Drop` cannot `.await` the full teardown `close()`
    /// does. Without this, a forgotten `close()` would wedge the device `Busy` forever.
    fn drop(&mut self) {
        if let Ok(mut pump) = self.pump.try_lock()
            && let Some(pump) = pump.take()
        {
            pump.abort();
        }
        if let Ok(mut open) = self.device.open.try_lock() {
            *open = false;
        }
    }
}
