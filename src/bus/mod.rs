/* Bus core: attaches a transport, parses its descriptor, and fans interrupt reports out to one
 * Child per top-level collection (spec.md §4.4, §5). Modeled directly on
 * `actor::DeviceActor` — one `tokio::spawn`ed task owns the transport and the child list, and
 * every caller talks to it through an mpsc-backed handle so all hardware I/O stays serialized
 * on a single task. */
pub mod child;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::descriptor::{ItemKind, ReportDescriptor};
use crate::device::DeviceInfo;
use crate::matcher;
use crate::transport::{InputReport, ReportSizes, ReportType, Transport};

pub use child::XferMask;

/// Commands a `BusHandle` can send to the running bus core task.
enum BusMessage {
    SetXfer {
        child_index: usize,
        mask: XferMask,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Write {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<(), String>>,
    },
    GetReport {
        kind: ReportType,
        id: u8,
        max_len: usize,
        reply: oneshot::Sender<Result<Vec<u8>, String>>,
    },
    GetSizes {
        reply: oneshot::Sender<ReportSizes>,
    },
    Shutdown,
}

/// Handle used by callers (the mapper, the raw interface) to talk to a running bus core.
#[derive(Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<BusMessage>,
}

impl BusHandle {
    /// Subscribe or unsubscribe child `child_index` to the transfer types in `mask`. Triggers
    /// `intr_start`/`intr_stop` on the underlying transport when the union of all children's
    /// `READ` subscriptions changes (spec.md §5).
    pub async fn set_xfer(&self, child_index: usize, mask: XferMask) -> Result<(), String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BusMessage::SetXfer { child_index, mask, reply: reply_tx })
            .await
            .map_err(|_| "bus core is no longer running".to_string())?;
        reply_rx.await.map_err(|_| "bus core dropped the reply channel".to_string())?
    }

    /// Submit a raw output write through the owning transport (spec.md §4.3 `write`).
    pub async fn write(&self, bytes: Vec<u8>) -> Result<(), String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BusMessage::Write { bytes, reply: reply_tx })
            .await
            .map_err(|_| "bus core is no longer running".to_string())?;
        reply_rx.await.map_err(|_| "bus core dropped the reply channel".to_string())?
    }

    /// `GET_REPORT` through the owning transport (spec.md §4.3 `get_report`), used for
    /// immediate-mode reads and ioctl `GetFeature`/`GetInput`.
    pub async fn get_report(&self, kind: ReportType, id: u8, max_len: usize) -> Result<Vec<u8>, String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BusMessage::GetReport { kind, id, max_len, reply: reply_tx })
            .await
            .map_err(|_| "bus core is no longer running".to_string())?;
        reply_rx.await.map_err(|_| "bus core dropped the reply channel".to_string())?
    }

    /// The per-(kind) byte-length ceilings computed at attach time.
    pub async fn sizes(&self) -> Result<ReportSizes, String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BusMessage::GetSizes { reply: reply_tx })
            .await
            .map_err(|_| "bus core is no longer running".to_string())?;
        reply_rx.await.map_err(|_| "bus core dropped the reply channel".to_string())
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(BusMessage::Shutdown).await;
    }
}

/// A Child plus the queue its matched interrupt reports arrive on.
pub struct ChildHandle {
    pub tlc_index: u32,
    pub usage: u32,
    pub driver: Option<&'static str>,
    pub reports: mpsc::UnboundedReceiver<InputReport>,
}

struct BusCore {
    transport: Box<dyn Transport>,
    descriptor: ReportDescriptor,
    children: Vec<child::Child>,
    intr_rx: mpsc::UnboundedReceiver<InputReport>,
    intr_running: bool,
    rx: mpsc::Receiver<BusMessage>,
    sizes: ReportSizes,
}

impl BusCore {
    fn xfer_union(&self) -> XferMask {
        self.children.iter().fold(XferMask::empty(), |acc, c| acc | c.xfer)
    }

    async fn run(mut self) {
        debug!("bus core started, {} children", self.children.len());
        loop {
            tokio::select! {
                Some(report) = self.intr_rx.recv() => {
                    self.dispatch(report);
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(BusMessage::SetXfer { child_index, mask, reply }) => {
                            let result = self.set_xfer(child_index, mask).await;
                            let _ = reply.send(result);
                        }
                        Some(BusMessage::Write { bytes, reply }) => {
                            let result = self.transport.write(&bytes).await.map_err(|e| e.to_string());
                            let _ = reply.send(result);
                        }
                        Some(BusMessage::GetReport { kind, id, max_len, reply }) => {
                            let result = self.transport.get_report(kind, id, max_len).await.map_err(|e| e.to_string());
                            let _ = reply.send(result);
                        }
                        Some(BusMessage::GetSizes { reply }) => {
                            let _ = reply.send(self.sizes.clone());
                        }
                        Some(BusMessage::Shutdown) | None => {
                            info!("bus core shutting down");
                            break;
                        }
                    }
                }
            }
        }
        let _ = self.transport.intr_stop().await;
    }

    fn dispatch(&mut self, report: InputReport) {
        for child in &self.children {
            if child.owns_report(&self.descriptor, report.report_id)
                && !child.deliver(report.clone()) {
                    warn!("child {} dropped its report receiver", child.tlc_index);
                }
        }
    }

    async fn set_xfer(&mut self, child_index: usize, mask: XferMask) -> Result<(), String> {
        let child = self
            .children
            .get_mut(child_index)
            .ok_or_else(|| format!("no such child: {child_index}"))?;
        child.xfer = mask;
        child.open = !mask.is_empty();

        let wants_read = self.xfer_union().contains(XferMask::READ);
        if wants_read && !self.intr_running {
            self.transport
                .intr_start()
                .await
                .map_err(|e| format!("intr_start: {e}"))?;
            self.intr_running = true;
        } else if !wants_read && self.intr_running {
            self.transport
                .intr_stop()
                .await
                .map_err(|e| format!("intr_stop: {e}"))?;
            self.intr_running = false;
        }
        Ok(())
    }
}

/// Linear scan for an already-created child bound to `usage` (spec.md §4.4): lets a later TLC
/// decline binding to a usage some earlier child already claimed, e.g. a proprietary touchpad
/// driver stepping aside for a HID-standard touchpad TLC.
pub fn find_child(children: &[ChildHandle], usage: u32) -> Option<&ChildHandle> {
    children.iter().find(|c| c.usage == usage)
}

/// Attach a transport: fetch and parse its report descriptor, create one `Child` per
/// top-level collection, wire the transport's interrupt sink to the internal fan-out, and
/// spawn the bus core task (spec.md §4.4's attach sequence).
pub async fn attach(mut transport: Box<dyn Transport>, info: Arc<DeviceInfo>) -> Result<(BusHandle, Vec<ChildHandle>)> {
    let descr_bytes = transport
        .get_report_descr()
        .await
        .context("fetching report descriptor")?;
    let descriptor = ReportDescriptor::new(descr_bytes);

    let tlc_count = descriptor.tlc_count();
    let mut children = Vec::with_capacity(tlc_count as usize);
    let mut handles: Vec<ChildHandle> = Vec::with_capacity(tlc_count as usize);
    for tlc_index in 0..tlc_count {
        let usage = descriptor.tlc_usage(tlc_index).unwrap_or(0);
        let driver = if find_child(&handles, usage).is_some() {
            None
        } else {
            matcher::find_driver(&info, Some(usage))
        };
        let (child, reports) = child::Child::new(tlc_index, usage, driver);
        handles.push(ChildHandle { tlc_index, usage, driver, reports });
        children.push(child);
    }

    // `size_of_report` keys on report ID, not TLC index; a TLC's report ID need not equal its
    // index (e.g. a single TLC declaring report ID 1), so the ceiling must be taken over every
    // report ID actually present in the descriptor, not over 0..tlc_count.
    let mut report_ids: Vec<u8> = descriptor.items().iter().map(|it| it.report_id).collect();
    report_ids.sort_unstable();
    report_ids.dedup();
    if report_ids.is_empty() {
        report_ids.push(0);
    }

    let sizes = ReportSizes {
        max_input: report_ids
            .iter()
            .map(|&id| descriptor.size_of_report(ItemKind::Input, id))
            .max()
            .unwrap_or(0),
        max_output: report_ids
            .iter()
            .map(|&id| descriptor.size_of_report(ItemKind::Output, id))
            .max()
            .unwrap_or(0),
        max_feature: report_ids
            .iter()
            .map(|&id| descriptor.size_of_report(ItemKind::Feature, id))
            .max()
            .unwrap_or(0),
    };

    let (intr_tx, intr_rx) = mpsc::unbounded_channel();
    transport.intr_setup(intr_tx, sizes.clone());

    let (tx, rx) = mpsc::channel(16);
    let core = BusCore {
        transport,
        descriptor,
        children,
        intr_rx,
        intr_running: false,
        rx,
        sizes,
    };

    info!("bus attached: {} ({} top-level collections)", info, tlc_count);
    tokio::spawn(core.run());

    Ok((BusHandle { tx }, handles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BusType;
    use crate::mock::MockTransport;

    const BOOT_KEYBOARD: &[u8] = &[
        0x05, 0x01, 0x09, 0x06, 0xA1, 0x01, 0x85, 0x01, 0x05, 0x07, 0x19, 0xE0, 0x29, 0xE7, 0x15,
        0x00, 0x25, 0x01, 0x75, 0x01, 0x95, 0x08, 0x81, 0x02, 0x95, 0x06, 0x75, 0x08, 0x15, 0x00,
        0x25, 0x65, 0x05, 0x07, 0x19, 0x00, 0x29, 0x65, 0x81, 0x00, 0xC0,
    ];

    #[tokio::test]
    async fn attach_creates_one_child_per_top_level_collection() {
        let transport = Box::new(MockTransport::new(BOOT_KEYBOARD));
        let info = Arc::new(DeviceInfo::new(BusType::Usb, 0x1234, 0x5678, 0, "Test Keyboard"));
        let (_handle, children) = attach(transport, info).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].usage, 0x0001_0006);
    }

    #[tokio::test]
    async fn subscribing_to_read_starts_delivering_interrupts() {
        let mut transport = MockTransport::new(BOOT_KEYBOARD);
        transport.queue_interrupt(1, [0x02, 0, 0, 0, 0, 0, 0]);
        let info = Arc::new(DeviceInfo::new(BusType::Usb, 0x1234, 0x5678, 0, "Test Keyboard"));
        let (handle, mut children) = attach(Box::new(transport), info).await.unwrap();

        handle.set_xfer(0, XferMask::READ).await.unwrap();
        let report = children[0].reports.recv().await.unwrap();
        assert_eq!(report.report_id, 1);
        assert_eq!(report.bytes[0], 0x02);
    }

    // Two application collections, report ID 1 (keyboard TLC, usage 0x0001_0006) and report
    // ID 2 (mouse TLC, usage 0x0001_0002), each a single input byte.
    const TWO_TLC_DESCRIPTOR: &[u8] = &[
        0x05, 0x01, 0x09, 0x06, 0xA1, 0x01, 0x85, 0x01, 0x05, 0x09, 0x09, 0x01, 0x15, 0x00, 0x25,
        0x01, 0x75, 0x01, 0x95, 0x08, 0x81, 0x02, 0xC0, 0x05, 0x01, 0x09, 0x02, 0xA1, 0x01, 0x85,
        0x02, 0x05, 0x09, 0x09, 0x01, 0x15, 0x00, 0x25, 0x01, 0x75, 0x01, 0x95, 0x08, 0x81, 0x02,
        0xC0,
    ];

    #[tokio::test]
    async fn scenario_s4_two_tlc_fanout_isolates_delivery() {
        let mut transport = MockTransport::new(TWO_TLC_DESCRIPTOR);
        transport.queue_interrupt(2, [0xFF]);
        let info = Arc::new(DeviceInfo::new(BusType::Usb, 0x1234, 0x5678, 0, "Test combo device"));
        let (handle, mut children) = attach(Box::new(transport), info).await.unwrap();
        assert_eq!(children.len(), 2);

        // Subscribe the mouse child first so it's already subscribed by the time the
        // pre-queued report id=2 is flushed to the interrupt pipe.
        handle.set_xfer(1, XferMask::READ).await.unwrap();
        handle.set_xfer(0, XferMask::READ).await.unwrap();

        // report ID 2 belongs to the mouse TLC only; the keyboard child never sees it.
        let report = children[1].reports.recv().await.unwrap();
        assert_eq!(report.report_id, 2);
        assert!(children[0].reports.try_recv().is_err());
    }

    #[tokio::test]
    async fn report_id_only_reaches_its_own_tlc() {
        let mut transport = MockTransport::new(TWO_TLC_DESCRIPTOR);
        transport.queue_interrupt(1, [0x01]);
        let info = Arc::new(DeviceInfo::new(BusType::Usb, 0x1234, 0x5678, 0, "Test combo device"));
        let (handle, mut children) = attach(Box::new(transport), info).await.unwrap();

        handle.set_xfer(0, XferMask::READ).await.unwrap();
        handle.set_xfer(1, XferMask::READ).await.unwrap();

        let mouse = &mut children[1];
        assert!(mouse.reports.try_recv().is_err());

        let keyboard = &mut children[0];
        let report = keyboard.reports.recv().await.unwrap();
        assert_eq!(report.report_id, 1);
    }

    #[test]
    fn find_child_locates_already_claimed_usage() {
        // Build handles directly rather than through attach(), since find_child only needs
        // the usage field.
        let (_core_child_a, reports_a) = child::Child::new(0, 0x0001_0006, Some("generic-keyboard"));
        let handle_a = ChildHandle { tlc_index: 0, usage: 0x0001_0006, driver: Some("generic-keyboard"), reports: reports_a };
        let handles = vec![handle_a];

        assert!(find_child(&handles, 0x0001_0006).is_some());
        assert!(find_child(&handles, 0x0001_0002).is_none());
    }

    #[tokio::test]
    async fn later_tlc_declines_usage_already_claimed_by_an_earlier_child() {
        // A descriptor with two TLCs that share the exact same usage: the second must decline
        // (driver: None) rather than independently re-matching against the device table.
        const DUP_USAGE_DESCRIPTOR: &[u8] = &[
            0x05, 0x01, 0x09, 0x06, 0xA1, 0x01, 0x85, 0x01, 0x05, 0x09, 0x09, 0x01, 0x15, 0x00,
            0x25, 0x01, 0x75, 0x01, 0x95, 0x08, 0x81, 0x02, 0xC0, 0x05, 0x01, 0x09, 0x06, 0xA1,
            0x01, 0x85, 0x02, 0x05, 0x09, 0x09, 0x01, 0x15, 0x00, 0x25, 0x01, 0x75, 0x01, 0x95,
            0x08, 0x81, 0x02, 0xC0,
        ];
        let transport = Box::new(MockTransport::new(DUP_USAGE_DESCRIPTOR));
        let info = Arc::new(DeviceInfo::new(BusType::Usb, 0x1234, 0x5678, 0, "Test dup-usage device"));
        let (_handle, children) = attach(transport, info).await.unwrap();

        assert_eq!(children.len(), 2);
        assert_eq!(children[0].usage, 0x0001_0006);
        assert!(children[0].driver.is_some());
        assert_eq!(children[1].usage, 0x0001_0006);
        assert!(children[1].driver.is_none());
    }
}
