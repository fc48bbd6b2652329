/* Device matching: resolves a newly attached device to driver info (spec.md §4.4). Grounded
 * on device_database's `(BusType, vid, pid) -> DeviceEntry` keying, generalized from a HashMap
 * exact-match (one key per `.device` file line) into an ordered table supporting usage filters
 * and inclusive version ranges, matching spec.md's "first match wins" rule. */
use crate::device::{BusType, DeviceInfo};

/// One row of the match table. `usage` restricts the match to top-level collections whose
/// usage equals `usage` when `Some`; `None` matches any usage (a whole-device entry).
#[derive(Debug, Clone, Copy)]
pub struct MatchEntry {
    pub bus: Option<BusType>,
    pub usage: Option<u32>,
    pub vendor_id: u16,
    pub product_id: u16,
    pub version_lo: u16,
    pub version_hi: u16,
    pub driver: &'static str,
}

impl MatchEntry {
    fn device_matches(&self, info: &DeviceInfo) -> bool {
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

fn bus_eq(a: BusType, b: BusType) -> bool {
    matches!(
        (a, b),
        (BusType::Usb, BusType::Usb) | (BusType::I2c, BusType::I2c) | (BusType::Bluetooth, BusType::Bluetooth)
    )
}

/// Static device-match table. Scanned in order; the first row whose device fields (and, if
/// present, usage) match wins (spec.md §4.4 invariant: "first match wins, not best match").
pub static MATCH_TABLE: &[MatchEntry] = &[
    MatchEntry {
        bus: Some(BusType::Usb),
        usage: Some(0x0001_0006), // Generic Desktop / Keyboard
        vendor_id: 0x0000,
        product_id: 0x0000,
        version_lo: 0,
        version_hi: 0,
        driver: "generic-keyboard",
    },
];

/// Linear-scan the match table for `info` and, if a TLC usage is known, `tlc_usage`. Returns
/// the driver name of the first matching row.
pub fn find_driver(info: &DeviceInfo, tlc_usage: Option<u32>) -> Option<&'static str> {
    MATCH_TABLE
        .iter()
        .find(|e| {
            if e.vendor_id == 0 && e.product_id == 0 {
                // A wildcard vendor/product entry only matches on usage.
                return e.usage.is_some() && e.usage == tlc_usage;
            }
            e.device_matches(info) && (e.usage.is_none() || e.usage == tlc_usage)
        })
        .map(|e| e.driver)
}
