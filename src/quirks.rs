/* Quirk registry: per-device behavioral overrides (spec.md §4.5). Grounded on
 * device_database::DriverConfig.quirks, which keys the same idea off free-form strings parsed
 * out of `[Driver/xxx]` sections ("DOUBLE_DPI", "RAW_BRIGHTNESS", ...); here the table is
 * static and the flags are a closed, typed set instead of arbitrary strings. */
use crate::device::{BusType, DeviceInfo};

bitflags::bitflags! {
    /// Behavioral overrides applied to a device after matching (spec.md §4.5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QuirkFlags: u16 {
        /// Device must be ignored entirely; no children are attached.
        const IGNORE        = 1 << 0;
        /// Output/feature reports must never be written to this device.
        const NOWRITE       = 1 << 1;
        /// Force boot protocol even if the device claims report protocol support.
        const BOOTPROTO     = 1 << 2;
        /// Microsoft wheel-tilt report has its Z axis sign reversed.
        const MS_REVZ       = 1 << 3;
        /// Device identifies as a generic HID gamepad but is really an Xbox 360 pad.
        const IS_XBOX360GP  = 1 << 4;
        /// Apply fixed-rate sampling instead of trusting the device's own report rate.
        const HID_SAMPLING  = 1 << 5;
    }
}

/// One static table entry: an inclusive vendor/product/version range mapped to quirk flags.
#[derive(Debug, Clone, Copy)]
pub struct QuirkEntry {
    pub bus: Option<BusType>,
    pub vendor_id: u16,
    pub product_id: u16,
    pub version_lo: u16,
    pub version_hi: u16,
    pub flags: QuirkFlags,
}

impl QuirkEntry {
    fn matches(&self, info: &DeviceInfo) -> bool {
        if let Some(bus) = self.bus
            && !bus_eq(bus, info.bus) {
                return false;
            }
        info.vendor_id == self.vendor_id
            && info.product_id == self.product_id
            && info.version >= self.version_lo
            && info.version <= self.version_hi
    }
}

const fn bus_eq(a: BusType, b: BusType) -> bool {
    matches!(
        (a, b),
        (BusType::Usb, BusType::Usb) | (BusType::I2c, BusType::I2c) | (BusType::Bluetooth, BusType::Bluetooth)
    )
}

/// Static quirk table for known devices. Entries are scanned in order; all matching entries'
/// flags are unioned (unlike device matching, which takes the first hit).
pub static QUIRK_TABLE: &[QuirkEntry] = &[
    QuirkEntry {
        bus: Some(BusType::Usb),
        vendor_id: 0x045e,
        product_id: 0x0040,
        version_lo: 0,
        version_hi: u16::MAX,
        flags: QuirkFlags::MS_REVZ,
    },
    QuirkEntry {
        bus: Some(BusType::Usb),
        vendor_id: 0x045e,
        product_id: 0x028e,
        version_lo: 0,
        version_hi: u16::MAX,
        flags: QuirkFlags::IS_XBOX360GP,
    },
    QuirkEntry {
        bus: Some(BusType::I2c),
        vendor_id: 0x04f3,
        product_id: 0x0103,
        version_lo: 0,
        version_hi: u16::MAX,
        flags: QuirkFlags::HID_SAMPLING,
    },
];

/// A device's resolved quirk set: the static table's match, unioned with any flags applied at
/// runtime (e.g. by a probe that detects a misbehaving device dynamically).
#[derive(Debug, Clone, Default)]
pub struct QuirkSet {
    flags: QuirkFlags,
}

impl QuirkSet {
    /// Resolve the static table against `info`, unioning every matching entry's flags.
    pub fn for_device(info: &DeviceInfo) -> Self {
        let flags = QUIRK_TABLE
            .iter()
            .filter(|e| e.matches(info))
            .fold(QuirkFlags::empty(), |acc, e| acc | e.flags);
        Self { flags }
    }

    pub fn test(&self, flag: QuirkFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Apply an additional flag learned at runtime (not from the static table).
    pub fn set(&mut self, flag: QuirkFlags) {
        self.flags |= flag;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xbox360() -> DeviceInfo {
        DeviceInfo::new(BusType::Usb, 0x045e, 0x028e, 0x0114, "Xbox 360 Controller")
    }

    #[test]
    fn table_lookup_matches_vendor_product_and_version_range() {
        let q = QuirkSet::for_device(&xbox360());
        assert!(q.test(QuirkFlags::IS_XBOX360GP));
        assert!(!q.test(QuirkFlags::MS_REVZ));
    }

    #[test]
    fn unrelated_device_gets_no_quirks() {
        let d = DeviceInfo::new(BusType::Usb, 0x1234, 0x5678, 0, "Unknown");
        let q = QuirkSet::for_device(&d);
        assert_eq!(q.flags, QuirkFlags::empty());
    }

    #[test]
    fn runtime_flag_can_be_added_after_static_resolution() {
        let mut q = QuirkSet::for_device(&xbox360());
        q.set(QuirkFlags::NOWRITE);
        assert!(q.test(QuirkFlags::NOWRITE));
        assert!(q.test(QuirkFlags::IS_XBOX360GP));
    }
}
