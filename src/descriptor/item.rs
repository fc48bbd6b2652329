/* HidItem and its constituent types: the parser's emission unit. */
use std::fmt;

/// What kind of HID item a `HidItem` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Input,
    Output,
    Feature,
    Collection,
    EndCollection,
}

/// Bit position, width, and repeat count of a field within a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    /// Offset in bits from the start of the report body (after the report-ID byte, if any).
    pub bit_pos: u32,
    /// Width in bits of a single element.
    pub bit_size: u32,
    /// Number of consecutive elements at `bit_size` starting at `bit_pos`.
    pub count: u32,
}

impl Location {
    /// Total bits spanned by this field (`bit_size * count`).
    pub fn total_bits(&self) -> u32 {
        self.bit_size.saturating_mul(self.count)
    }

    /// Location of the `index`-th element of a multi-count field.
    pub fn element(&self, index: u32) -> Location {
        Location {
            bit_pos: self.bit_pos + index * self.bit_size,
            bit_size: self.bit_size,
            count: 1,
        }
    }
}

bitflags::bitflags! {
    /// Main-item data flags (HID 1.11 §6.2.2.5), the bits that follow a Collection's
    /// Input/Output/Feature tag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ItemFlags: u16 {
        const CONST     = 1 << 0;
        const VARIABLE  = 1 << 1;
        const RELATIVE  = 1 << 2;
        const WRAP      = 1 << 3;
        const NONLINEAR = 1 << 4;
        const NOPREF    = 1 << 5;
        const NULLSTATE = 1 << 6;
        const VOLATILE  = 1 << 7;
        const BUFFERED  = 1 << 8;
    }
}

impl ItemFlags {
    /// Decode the raw 32-bit Input/Output/Feature item payload into flag bits.
    /// Bit 8 (buffered bytes) only applies to Output/Feature per HID 1.11, but we decode it
    /// unconditionally; callers that care about Input semantics simply never see it set.
    pub fn from_raw(raw: u32) -> Self {
        let mut f = ItemFlags::empty();
        if raw & (1 << 0) != 0 {
            f |= ItemFlags::CONST;
        }
        if raw & (1 << 1) != 0 {
            f |= ItemFlags::VARIABLE;
        }
        if raw & (1 << 2) != 0 {
            f |= ItemFlags::RELATIVE;
        }
        if raw & (1 << 3) != 0 {
            f |= ItemFlags::WRAP;
        }
        if raw & (1 << 4) != 0 {
            f |= ItemFlags::NONLINEAR;
        }
        if raw & (1 << 5) != 0 {
            f |= ItemFlags::NOPREF;
        }
        if raw & (1 << 6) != 0 {
            f |= ItemFlags::NULLSTATE;
        }
        if raw & (1 << 7) != 0 {
            f |= ItemFlags::VOLATILE;
        }
        if raw & (1 << 8) != 0 {
            f |= ItemFlags::BUFFERED;
        }
        f
    }
}

/// Resolution metadata for an absolute field, derived from logical/physical min/max and unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsInfo {
    pub logical_min: i32,
    pub logical_max: i32,
    pub physical_min: i32,
    pub physical_max: i32,
    /// Units per physical unit, or 0 when no physical range/unit is declared (§4.2).
    pub resolution: f64,
}

/// One item emitted by the descriptor parser (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct HidItem {
    pub kind: ItemKind,
    /// Collection nesting depth at the point this item was emitted (0 = outside any
    /// collection, 1 = directly inside a top-level collection).
    pub collection_level: u32,
    /// Zero-based index of the enclosing top-level collection. Meaningless for items at
    /// `collection_level == 0`.
    pub tlc_index: u32,
    /// High 16 bits = usage page, low 16 bits = usage ID.
    pub usage: u32,
    pub usage_minimum: u32,
    pub usage_maximum: u32,
    pub location: Location,
    pub logical_min: i32,
    pub logical_max: i32,
    pub physical_min: i32,
    pub physical_max: i32,
    pub unit: u32,
    pub unit_exponent: i32,
    /// 0 if the report is unnumbered.
    pub report_id: u8,
    pub flags: ItemFlags,
    /// Only meaningful when `kind == Collection`: the raw HID collection type byte
    /// (0x00 Physical, 0x01 Application, 0x02 Logical, ...).
    pub collection_type: u8,
}

impl HidItem {
    pub fn is_variable(&self) -> bool {
        self.flags.contains(ItemFlags::VARIABLE)
    }

    pub fn is_constant(&self) -> bool {
        self.flags.contains(ItemFlags::CONST)
    }

    pub fn is_signed(&self) -> bool {
        self.logical_min < 0 || self.logical_max < 0
    }

    pub fn abs_info(&self) -> Option<AbsInfo> {
        if self.flags.contains(ItemFlags::RELATIVE) {
            return None;
        }
        Some(AbsInfo {
            logical_min: self.logical_min,
            logical_max: self.logical_max,
            physical_min: self.physical_min,
            physical_max: self.physical_max,
            resolution: crate::codec::resolution(
                self.logical_min,
                self.logical_max,
                self.physical_min,
                self.physical_max,
                self.unit_exponent,
            ),
        })
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemKind::Input => "Input",
            ItemKind::Output => "Output",
            ItemKind::Feature => "Feature",
            ItemKind::Collection => "Collection",
            ItemKind::EndCollection => "EndCollection",
        };
        f.write_str(s)
    }
}
