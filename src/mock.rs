/* MockTransport: an in-memory, scriptable Transport for unit tests and the demo binary.
 * Grounded on the teacher's "no real hardware in CI" approach (the `dev-hooks` feature and
 * `test_device.rs` in ratbagd-rs inject synthetic devices instead of driving a real one); here
 * the equivalent is a first-class mock transport used directly by tests rather than a
 * feature-gated hook. */
use std::collections::{HashMap, VecDeque};

use tokio::sync::mpsc;

use crate::transport::{InputReport, ReportSizes, ReportType, Transport, TransportError};

/// An in-memory `Transport` whose responses are scripted ahead of time and whose interrupt
/// feed is driven by `queue_interrupt`.
pub struct MockTransport {
    descriptor: Vec<u8>,
    feature_reports: HashMap<u8, Vec<u8>>,
    input_reports: HashMap<u8, Vec<u8>>,
    pub sent: Vec<(ReportType, u8, Vec<u8>)>,
    pub writes: Vec<Vec<u8>>,
    tx: Option<mpsc::UnboundedSender<InputReport>>,
    pending: VecDeque<InputReport>,
    running: bool,
}

impl MockTransport {
    pub fn new(descriptor: impl Into<Vec<u8>>) -> Self {
        Self {
            descriptor: descriptor.into(),
            feature_reports: HashMap::new(),
            input_reports: HashMap::new(),
            sent: Vec::new(),
            writes: Vec::new(),
            tx: None,
            pending: VecDeque::new(),
            running: false,
        }
    }

    /// Script the response `get_report(Feature, id, _)` will return.
    pub fn with_feature_report(mut self, id: u8, bytes: impl Into<Vec<u8>>) -> Self {
        self.feature_reports.insert(id, bytes.into());
        self
    }

    /// Script the response `get_report(Input, id, _)` will return (I2C-HID polling mode).
    pub fn with_input_report(mut self, id: u8, bytes: impl Into<Vec<u8>>) -> Self {
        self.input_reports.insert(id, bytes.into());
        self
    }

    /// Simulate an incoming interrupt report. Delivered immediately if `intr_start` has been
    /// called; otherwise buffered for the next `intr_start`/`intr_poll`.
    pub fn queue_interrupt(&mut self, report_id: u8, bytes: impl Into<Vec<u8>>) {
        let report = InputReport { report_id, bytes: bytes.into() };
        if self.running
            && let Some(tx) = &self.tx {
                let _ = tx.send(report);
                return;
            }
        self.pending.push_back(report);
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn get_report_descr(&mut self) -> Result<Vec<u8>, TransportError> {
        Ok(self.descriptor.clone())
    }

    async fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        match self.pending.pop_front() {
            Some(report) => {
                let mut bytes = Vec::with_capacity(1 + report.bytes.len());
                if report.report_id != 0 {
                    bytes.push(report.report_id);
                }
                bytes.extend_from_slice(&report.bytes);
                bytes.truncate(max_len);
                Ok(bytes)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.writes.push(bytes.to_vec());
        Ok(())
    }

    async fn get_report(
        &mut self,
        kind: ReportType,
        id: u8,
        max_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let table = match kind {
            ReportType::Feature => &self.feature_reports,
            ReportType::Input => &self.input_reports,
            ReportType::Output => {
                return Err(TransportError::Unsupported("get_report(Output)"));
            }
        };
        let bytes = table
            .get(&id)
            .ok_or_else(|| TransportError::Malformed(format!("no scripted report for id {id}")))?;
        if bytes.len() > max_len {
            return Err(TransportError::Overflow(format!(
                "scripted report ({} bytes) exceeds max_len {max_len}",
                bytes.len()
            )));
        }
        Ok(bytes.clone())
    }

    async fn set_report(&mut self, kind: ReportType, id: u8, bytes: &[u8]) -> Result<(), TransportError> {
        self.sent.push((kind, id, bytes.to_vec()));
        Ok(())
    }

    fn intr_setup(&mut self, tx: mpsc::UnboundedSender<InputReport>, _sizes: ReportSizes) {
        self.tx = Some(tx);
    }

    async fn intr_start(&mut self) -> Result<(), TransportError> {
        self.running = true;
        if let Some(tx) = &self.tx {
            while let Some(report) = self.pending.pop_front() {
                let _ = tx.send(report);
            }
        }
        Ok(())
    }

    async fn intr_stop(&mut self) -> Result<(), TransportError> {
        self.running = false;
        Ok(())
    }

    fn intr_poll(&mut self) {
        if let Some(tx) = &self.tx {
            while let Some(report) = self.pending.pop_front() {
                let _ = tx.send(report);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_report_strips_to_scripted_body_and_validates_length() {
        let mut t = MockTransport::new(Vec::new()).with_feature_report(2, [0xAA, 0xBB, 0xCC]);
        let got = t.get_report(ReportType::Feature, 2, 5).await.unwrap();
        assert_eq!(got, vec![0xAA, 0xBB, 0xCC]);
    }

    #[tokio::test]
    async fn queue_interrupt_buffers_until_intr_start() {
        let mut t = MockTransport::new(Vec::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        t.intr_setup(tx, ReportSizes::default());
        t.queue_interrupt(1, [0x01]);
        assert!(rx.try_recv().is_err());
        t.intr_start().await.unwrap();
        let report = rx.try_recv().unwrap();
        assert_eq!(report.report_id, 1);
    }
}
