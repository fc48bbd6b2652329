/* hidcore-demo: exercises the bus core end to end against a MockTransport, without any real
 * hardware. Mirrors the teacher's `main.rs` entrypoint shape (tracing init, then the actual
 * work) but drives a scripted device instead of a udev-discovered one. */
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hidcore::bus;
use hidcore::device::{BusType, DeviceInfo};
use hidcore::mock::MockTransport;
use tracing::info;
use tracing_subscriber::EnvFilter;

const BOOT_KEYBOARD_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, 0x09, 0x06, 0xA1, 0x01, 0x85, 0x01, 0x05, 0x07, 0x19, 0xE0, 0x29, 0xE7, 0x15, 0x00,
    0x25, 0x01, 0x75, 0x01, 0x95, 0x08, 0x81, 0x02, 0x95, 0x06, 0x75, 0x08, 0x15, 0x00, 0x25, 0x65,
    0x05, 0x07, 0x19, 0x00, 0x29, 0x65, 0x81, 0x00, 0xC0,
];

#[derive(Parser)]
#[command(name = "hidcore-demo", about = "Exercise the hidcore bus core against a mock device")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Attach a mock boot-keyboard device and print its top-level collections.
    Enumerate,
    /// Attach a mock boot-keyboard device, subscribe to input, and print one scripted
    /// interrupt report as it flows through the bus core.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let info = Arc::new(DeviceInfo::new(BusType::Usb, 0x1234, 0x5678, 0x0100, "Demo Boot Keyboard"));

    match cli.command {
        Command::Enumerate => {
            let transport = Box::new(MockTransport::new(BOOT_KEYBOARD_DESCRIPTOR));
            let (_handle, children) = bus::attach(transport, info).await?;
            for child in &children {
                info!(
                    "TLC {}: usage {:#010x}, driver {:?}",
                    child.tlc_index, child.usage, child.driver
                );
            }
        }
        Command::Watch => {
            let mut transport = MockTransport::new(BOOT_KEYBOARD_DESCRIPTOR);
            transport.queue_interrupt(1, [0x02, 0, 0x04, 0, 0, 0, 0, 0]); // Shift+A
            let (handle, mut children) = bus::attach(Box::new(transport), info).await?;

            handle.set_xfer(0, bus::XferMask::READ).await.map_err(anyhow::Error::msg)?;
            if let Some(child) = children.first_mut()
                && let Some(report) = child.reports.recv().await {
                    info!("received report id {}: {:02x?}", report.report_id, report.bytes);
                }
        }
    }

    Ok(())
}
