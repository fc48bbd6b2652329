/* ReportDescriptor: the parsed, immutable view over a descriptor byte slice (spec.md §3, §4.1). */
use super::item::{AbsInfo, HidItem, ItemFlags, ItemKind, Location};
use super::parser;

/// A HID report descriptor: the raw bytes plus its parsed item stream.
///
/// Owns the byte slice (spec.md §3 says the transport owns it and loans it by reference to
/// the parser and children; here the `ReportDescriptor` itself plays that loaning role, since
/// it is the thing children and the bus core hold a reference to).
#[derive(Debug, Clone)]
pub struct ReportDescriptor {
    bytes: Vec<u8>,
    items: Vec<HidItem>,
}

/// Result of `locate`: a single field's position, flags, and (if absolute) resolution info.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocateResult {
    pub location: Location,
    pub flags: ItemFlags,
    pub report_id: u8,
    pub absinfo: Option<AbsInfo>,
}

impl ReportDescriptor {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let items = parser::parse(&bytes);
        Self { bytes, items }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn items(&self) -> &[HidItem] {
        &self.items
    }

    /// Number of depth-1 Collection items (top-level collections).
    pub fn tlc_count(&self) -> u32 {
        self.items
            .iter()
            .filter(|it| it.kind == ItemKind::Collection && it.collection_level == 1)
            .count() as u32
    }

    /// Usage of the `tlc_index`-th top-level collection, if it exists.
    pub fn tlc_usage(&self, tlc_index: u32) -> Option<u32> {
        self.items
            .iter()
            .filter(|it| it.kind == ItemKind::Collection && it.collection_level == 1)
            .nth(tlc_index as usize)
            .map(|it| it.usage)
    }

    /// Lazily (in the sense of "no extra allocation beyond a filter") iterate only the items
    /// whose enclosing top-level collection is `tlc_index`.
    pub fn iterate_tlc(&self, tlc_index: u32) -> impl Iterator<Item = &HidItem> {
        self.items
            .iter()
            .filter(move |it| it.collection_level >= 1 && it.tlc_index == tlc_index)
    }

    /// Minimal number of bytes (rounded up) to hold all fields of `(kind, report_id)`, plus
    /// one for the report-ID byte if the device uses numbered reports for this kind at all
    /// (spec.md §4.1, invariant 1 in §8).
    pub fn size_of_report(&self, kind: ItemKind, report_id: u8) -> usize {
        let mut max_bit: u32 = 0;
        let mut any_numbered = false;
        for it in self
            .items
            .iter()
            .filter(|it| it.kind == kind)
        {
            if it.report_id != 0 {
                any_numbered = true;
            }
            if it.report_id == report_id {
                let end = it.location.bit_pos + it.location.total_bits();
                max_bit = max_bit.max(end);
            }
        }
        let bytes = max_bit.div_ceil(8) as usize;
        if any_numbered {
            bytes + 1
        } else {
            bytes
        }
    }

    /// Walk items inside `tlc_index` and return the `occurrence`-th (0-based) non-constant
    /// field whose usage matches `usage` (spec.md §4.1).
    pub fn locate(
        &self,
        usage: u32,
        kind: ItemKind,
        tlc_index: u32,
        occurrence: usize,
    ) -> Option<LocateResult> {
        self.iterate_tlc(tlc_index)
            .filter(|it| it.kind == kind && !it.is_constant() && item_matches_usage(it, usage))
            .nth(occurrence)
            .map(|it| LocateResult {
                location: it.location,
                flags: it.flags,
                report_id: it.report_id,
                absinfo: it.abs_info(),
            })
    }
}

fn item_matches_usage(it: &HidItem, usage: u32) -> bool {
    if it.is_variable() {
        it.usage == usage
    } else {
        it.usage_minimum <= usage && usage <= it.usage_maximum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_REPORTS: &[u8] = &[
        0x05, 0x01, // Usage Page (Generic Desktop)
        0x09, 0x02, // Usage (Mouse)
        0xA1, 0x01, // Collection (Application)
        0x85, 0x01, //   Report ID (1)
        0x05, 0x09, //   Usage Page (Button)
        0x19, 0x01, //   Usage Minimum (1)
        0x29, 0x08, //   Usage Maximum (8)
        0x15, 0x00, //   Logical Minimum (0)
        0x25, 0x01, //   Logical Maximum (1)
        0x75, 0x01, //   Report Size (1)
        0x95, 0x08, //   Report Count (8)
        0x81, 0x02, //   Input (Data, Variable, Absolute)  -- 8 buttons
        0x85, 0x02, //   Report ID (2)
        0x05, 0x01, //   Usage Page (Generic Desktop)
        0x09, 0x30, //   Usage (X)
        0x16, 0x00, 0x00, //   Logical Minimum (0)
        0x27, 0xFF, 0xFF, 0x00, 0x00, //   Logical Maximum (65535, 4-byte to avoid sign extension)
        0x75, 0x10, //   Report Size (16)
        0x95, 0x01, //   Report Count (1)
        0x81, 0x02, //   Input (Data, Variable, Absolute)  -- X axis
        0xC0, // End Collection
    ];

    #[test]
    fn size_of_report_for_numbered_reports_includes_id_byte() {
        let rd = ReportDescriptor::new(TWO_REPORTS);
        assert_eq!(rd.size_of_report(ItemKind::Input, 1), 1 + 1); // 8 bits + ID byte
        assert_eq!(rd.size_of_report(ItemKind::Input, 2), 2 + 1); // 16 bits + ID byte
    }

    #[test]
    fn locate_finds_variable_field_by_usage() {
        let rd = ReportDescriptor::new(TWO_REPORTS);
        let loc = rd
            .locate(0x0001_0030, ItemKind::Input, 0, 0)
            .expect("X axis field");
        assert_eq!(loc.report_id, 2);
        assert_eq!(loc.location.bit_size, 16);
    }

    #[test]
    fn tlc_enumeration_counts_depth_one_collections() {
        let rd = ReportDescriptor::new(TWO_REPORTS);
        assert_eq!(rd.tlc_count(), 1);
        assert_eq!(rd.tlc_usage(0), Some(0x0001_0002));
    }
}
