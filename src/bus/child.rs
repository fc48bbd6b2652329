/* Child: a bus core's per-top-level-collection handle (spec.md §4.4, §5). One physical device
 * fans out into one Child per TLC in its report descriptor — a keyboard TLC, a consumer-control
 * TLC, a vendor-defined TLC, each independently openable and independently subscribed to
 * transfer types. */
use tokio::sync::mpsc;

use crate::descriptor::ReportDescriptor;
use crate::transport::InputReport;

bitflags::bitflags! {
    /// Transfer types a child can subscribe to; the bus core's running interrupt pipe is the
    /// union of every child's `READ` bit (spec.md §5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct XferMask: u8 {
        const READ        = 1 << 0;
        const WRITE       = 1 << 1;
        const GET_REPORT  = 1 << 2;
        const SET_REPORT  = 1 << 3;
    }
}

/// One top-level collection's handle into the bus core.
pub struct Child {
    pub tlc_index: u32,
    pub usage: u32,
    pub driver: Option<&'static str>,
    pub xfer: XferMask,
    pub open: bool,
    tx: mpsc::UnboundedSender<InputReport>,
}

impl Child {
    pub fn new(tlc_index: u32, usage: u32, driver: Option<&'static str>) -> (Self, mpsc::UnboundedReceiver<InputReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tlc_index,
                usage,
                driver,
                xfer: XferMask::empty(),
                open: false,
                tx,
            },
            rx,
        )
    }

    /// Whether `report_id` belongs to this child's TLC, per the parsed descriptor (spec.md
    /// §4.4: a report ID may span only one TLC, or be unnumbered and shared by a single-TLC
    /// device).
    pub fn owns_report(&self, descriptor: &ReportDescriptor, report_id: u8) -> bool {
        descriptor
            .iterate_tlc(self.tlc_index)
            .any(|it| it.report_id == report_id)
    }

    /// Deliver `report` to this child's consumer if it is subscribed to `READ` and open.
    /// Returns `false` if the channel's receiver has been dropped.
    pub fn deliver(&self, report: InputReport) -> bool {
        if !self.open || !self.xfer.contains(XferMask::READ) {
            return true;
        }
        self.tx.send(report).is_ok()
    }
}
