/* Physical-device identity: the immutable facts the bus core learns once at attach time
 * (spec.md §3). Grounded on device_database::BusType's bus-code decoding, generalized from a
 * `.device`-file match key into a field of the device record itself. */
use std::fmt;

use crate::transport::ReportSizes;

/// Bus a device is attached over. Carries the numeric HID bus code (`BUS_USB` etc. from
/// `linux/input.h`) so a matcher entry can compare against it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusType {
    Usb,
    I2c,
    Bluetooth,
    Other(u16),
}

impl BusType {
    pub fn from_u16(bustype: u16) -> Self {
        match bustype {
            0x03 => BusType::Usb,
            0x18 => BusType::I2c,
            0x05 => BusType::Bluetooth,
            other => BusType::Other(other),
        }
    }
}

impl fmt::Display for BusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusType::Usb => f.write_str("usb"),
            BusType::I2c => f.write_str("i2c"),
            BusType::Bluetooth => f.write_str("bluetooth"),
            BusType::Other(code) => write!(f, "{code:04x}"),
        }
    }
}

bitflags::bitflags! {
    /// Capability bits a transport reports at attach time (spec.md §3, §6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceCaps: u8 {
        /// Device supports `SET_PROTOCOL`/boot protocol switching (USB only).
        const BOOT_PROTOCOL = 1 << 0;
        /// Device supports `SET_IDLE`.
        const SET_IDLE      = 1 << 1;
        /// Device is wireless (radio dropout is a normal, not exceptional, I/O condition).
        const WIRELESS      = 1 << 2;
    }
}

/// Immutable identity of one physical HID device, fixed for the lifetime of the attach
/// (spec.md §3: "bus_id, vendor_id, product_id, version, human-readable name, serial,
/// boot-protocol capability bits, transport-reported maximum read/write/get-report/set-report
/// sizes").
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub bus: BusType,
    pub vendor_id: u16,
    pub product_id: u16,
    pub version: u16,
    pub name: String,
    pub serial: Option<String>,
    pub caps: DeviceCaps,
    pub sizes: ReportSizes,
}

impl DeviceInfo {
    pub fn new(
        bus: BusType,
        vendor_id: u16,
        product_id: u16,
        version: u16,
        name: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            vendor_id,
            product_id,
            version,
            name: name.into(),
            serial: None,
            caps: DeviceCaps::empty(),
            sizes: ReportSizes::default(),
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_caps(mut self, caps: DeviceCaps) -> Self {
        self.caps = caps;
        self
    }

    pub fn with_sizes(mut self, sizes: ReportSizes) -> Self {
        self.sizes = sizes;
        self
    }

    /// `vendor_id:product_id` in the conventional lowercase hex form used in log lines and
    /// matcher diagnostics.
    pub fn id_string(&self) -> String {
        format!("{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.bus, self.id_string(), self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bustype_decodes_known_linux_input_codes() {
        assert_eq!(BusType::from_u16(0x03), BusType::Usb);
        assert_eq!(BusType::from_u16(0x18), BusType::I2c);
        assert_eq!(BusType::from_u16(0x05), BusType::Bluetooth);
        assert_eq!(BusType::from_u16(0x01), BusType::Other(0x01));
    }

    #[test]
    fn id_string_is_lowercase_hex() {
        let d = DeviceInfo::new(BusType::Usb, 0x046d, 0xc52b, 0x0111, "Logitech Receiver");
        assert_eq!(d.id_string(), "046d:c52b");
    }
}
