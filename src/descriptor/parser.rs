/* HID item-stream parser: converts a raw report-descriptor byte slice into a flat Vec<HidItem>.
 * Grounded on the global/local state-stack shape used by HID descriptor parsers in the example
 * pack (see e.g. the WebHID-style parser in other_examples), adapted to emit a flat item stream
 * annotated with collection depth and top-level-collection index per spec.md §3/§4.1. */
use super::item::{HidItem, ItemFlags, ItemKind, Location};

#[derive(Clone, Default)]
struct GlobalState {
    usage_page: u32,
    logical_min: i32,
    logical_max: i32,
    physical_min: i32,
    physical_max: i32,
    unit: u32,
    unit_exponent: i32,
    report_size: u32,
    report_id: u8,
    report_count: u32,
}

#[derive(Default)]
struct LocalState {
    usages: Vec<u32>,
    usage_min: Option<u32>,
    usage_max: Option<u32>,
}

impl LocalState {
    fn clear(&mut self) {
        self.usages.clear();
        self.usage_min = None;
        self.usage_max = None;
    }

    /// Resolve the (usage_minimum, usage_maximum) pair used by Array fields: an explicit
    /// Usage Minimum/Maximum pair takes priority, otherwise fall back to the span of any
    /// individually-listed usages.
    fn range(&self) -> (u32, u32) {
        if let (Some(min), Some(max)) = (self.usage_min, self.usage_max) {
            return (min, max);
        }
        let min = self.usages.iter().copied().min().unwrap_or(0);
        let max = self.usages.iter().copied().max().unwrap_or(0);
        (min, max)
    }

    /// The nth usage for a Variable field, or the last declared usage once the list is
    /// exhausted (HID 1.11 §6.2.2.8). Falls back to expanding a Usage Minimum/Maximum range
    /// when no explicit usage list was declared (the common case for contiguous fields like
    /// keyboard modifiers).
    fn nth_or_last(&self, n: usize) -> u32 {
        if let Some(u) = self.usages.get(n).or_else(|| self.usages.last()).copied() {
            return u;
        }
        if let (Some(min), Some(max)) = (self.usage_min, self.usage_max) {
            return (min + n as u32).min(max);
        }
        0
    }
}

/// Accumulated bit position per (kind, report_id), tracked independently because Input,
/// Output and Feature reports occupy separate byte streams even when they share a report ID.
#[derive(Default)]
struct BitCursor {
    entries: Vec<(ItemKind, u8, u32)>,
}

impl BitCursor {
    fn advance(&mut self, kind: ItemKind, report_id: u8, bits: u32) -> u32 {
        if let Some(e) = self
            .entries
            .iter_mut()
            .find(|(k, id, _)| *k == kind && *id == report_id)
        {
            let pos = e.2;
            e.2 += bits;
            pos
        } else {
            self.entries.push((kind, report_id, bits));
            0
        }
    }
}

/// Parse a HID report descriptor into its flat item stream.
///
/// Never panics and never returns an error: a truncated item, a mismatched Push/Pop, or an
/// unbalanced Collection/EndCollection stops emission at the last consistent point (spec.md
/// §4.1 "Error handling"). Long items (prefix `0xFE`) are skipped per HID 1.11 §6.2.3.
pub fn parse(desc: &[u8]) -> Vec<HidItem> {
    let mut items = Vec::new();
    let mut globals = GlobalState::default();
    let mut global_stack: Vec<GlobalState> = Vec::new();
    let mut locals = LocalState::default();
    let mut bits = BitCursor::default();

    // collection_level of the item currently being built; tlc_stack[0] is the index of the
    // top-level collection enclosing the current nesting (meaningless at level 0).
    let mut level: u32 = 0;
    let mut tlc_stack: Vec<u32> = Vec::new();
    let mut next_tlc_index: u32 = 0;

    let mut i = 0usize;
    while i < desc.len() {
        let prefix = desc[i];

        // Long item: 2-byte header (0xFE, data-len, tag), then data-len more bytes. Skipped.
        if prefix == 0xFE {
            if i + 2 > desc.len() {
                break;
            }
            let data_len = desc[i + 1] as usize;
            let end = i + 3 + data_len;
            if end > desc.len() {
                break;
            }
            i = end;
            continue;
        }

        let size = match prefix & 0x03 {
            0 => 0,
            1 => 1,
            2 => 2,
            _ => 4,
        };
        if i + 1 + size > desc.len() {
            break;
        }
        let data = &desc[i + 1..i + 1 + size];
        i += 1 + size;

        let item_type = (prefix >> 2) & 0x03;
        let tag = (prefix >> 4) & 0x0F;
        let raw = decode_u(data);

        match item_type {
            // Main items.
            0 => match tag {
                0x8 | 0x9 | 0xB => {
                    let kind = match tag {
                        0x8 => ItemKind::Input,
                        0x9 => ItemKind::Output,
                        _ => ItemKind::Feature,
                    };
                    let flags = ItemFlags::from_raw(raw);
                    let tlc_index = tlc_stack.last().copied().unwrap_or(0);

                    if globals.logical_min > globals.logical_max {
                        // Invariant violated: stop rather than emit a nonsensical range.
                        break;
                    }

                    if flags.contains(ItemFlags::VARIABLE) {
                        for n in 0..globals.report_count as usize {
                            let bit_pos = bits.advance(kind, globals.report_id, globals.report_size);
                            items.push(HidItem {
                                kind,
                                collection_level: level,
                                tlc_index,
                                usage: (globals.usage_page << 16) | locals.nth_or_last(n),
                                usage_minimum: 0,
                                usage_maximum: 0,
                                location: Location {
                                    bit_pos,
                                    bit_size: globals.report_size,
                                    count: 1,
                                },
                                logical_min: globals.logical_min,
                                logical_max: globals.logical_max,
                                physical_min: globals.physical_min,
                                physical_max: globals.physical_max,
                                unit: globals.unit,
                                unit_exponent: globals.unit_exponent,
                                report_id: globals.report_id,
                                flags,
                                collection_type: 0,
                            });
                        }
                    } else {
                        let bit_pos = bits.advance(
                            kind,
                            globals.report_id,
                            globals.report_size * globals.report_count,
                        );
                        let (umin, umax) = locals.range();
                        items.push(HidItem {
                            kind,
                            collection_level: level,
                            tlc_index,
                            usage: 0,
                            usage_minimum: (globals.usage_page << 16) | umin,
                            usage_maximum: (globals.usage_page << 16) | umax,
                            location: Location {
                                bit_pos,
                                bit_size: globals.report_size,
                                count: globals.report_count,
                            },
                            logical_min: globals.logical_min,
                            logical_max: globals.logical_max,
                            physical_min: globals.physical_min,
                            physical_max: globals.physical_max,
                            unit: globals.unit,
                            unit_exponent: globals.unit_exponent,
                            report_id: globals.report_id,
                            flags,
                            collection_type: 0,
                        });
                    }
                    locals.clear();
                }
                0xA => {
                    // Collection
                    if data.len() != 1 {
                        break;
                    }
                    let tlc_index = if level == 0 {
                        let idx = next_tlc_index;
                        next_tlc_index += 1;
                        idx
                    } else {
                        tlc_stack.last().copied().unwrap_or(0)
                    };
                    items.push(HidItem {
                        kind: ItemKind::Collection,
                        collection_level: level + 1,
                        tlc_index,
                        usage: (globals.usage_page << 16) | locals.nth_or_last(0),
                        usage_minimum: 0,
                        usage_maximum: 0,
                        location: Location::default(),
                        logical_min: globals.logical_min,
                        logical_max: globals.logical_max,
                        physical_min: globals.physical_min,
                        physical_max: globals.physical_max,
                        unit: globals.unit,
                        unit_exponent: globals.unit_exponent,
                        report_id: globals.report_id,
                        flags: ItemFlags::empty(),
                        collection_type: data[0],
                    });
                    level += 1;
                    tlc_stack.push(tlc_index);
                    locals.clear();
                }
                0xC => {
                    // End Collection
                    if level == 0 {
                        break; // Mismatched EndCollection: stop silently.
                    }
                    let tlc_index = tlc_stack.pop().unwrap();
                    items.push(HidItem {
                        kind: ItemKind::EndCollection,
                        collection_level: level,
                        tlc_index,
                        usage: 0,
                        usage_minimum: 0,
                        usage_maximum: 0,
                        location: Location::default(),
                        logical_min: globals.logical_min,
                        logical_max: globals.logical_max,
                        physical_min: globals.physical_min,
                        physical_max: globals.physical_max,
                        unit: globals.unit,
                        unit_exponent: globals.unit_exponent,
                        report_id: globals.report_id,
                        flags: ItemFlags::empty(),
                        collection_type: 0,
                    });
                    level -= 1;
                    locals.clear();
                }
                _ => locals.clear(),
            },
            // Global items.
            1 => match tag {
                0x0 => globals.usage_page = raw,
                0x1 => globals.logical_min = sign_extend(raw, size),
                0x2 => globals.logical_max = sign_extend(raw, size),
                0x3 => globals.physical_min = sign_extend(raw, size),
                0x4 => globals.physical_max = sign_extend(raw, size),
                0x5 => globals.unit = raw,
                0x6 => globals.unit_exponent = sign_extend(raw, size),
                0x7 => globals.report_size = raw,
                0x8 => {
                    let Ok(id) = u8::try_from(raw) else {
                        break;
                    };
                    globals.report_id = id;
                }
                0x9 => globals.report_count = raw,
                0xA => global_stack.push(globals.clone()),
                0xB => match global_stack.pop() {
                    Some(g) => globals = g,
                    None => break, // Pop underflow: stop silently.
                },
                _ => {}
            },
            // Local items.
            2 => match tag {
                0x0 => locals.usages.push(raw),
                0x1 => locals.usage_min = Some(raw),
                0x2 => locals.usage_max = Some(raw),
                _ => {}
            },
            _ => {}
        }
    }

    items
}

fn decode_u(data: &[u8]) -> u32 {
    match data.len() {
        0 => 0,
        1 => data[0] as u32,
        2 => u16::from_le_bytes([data[0], data[1]]) as u32,
        4 => u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        _ => 0,
    }
}

fn sign_extend(raw: u32, size: usize) -> i32 {
    match size {
        0 => 0,
        1 => raw as u8 as i8 as i32,
        2 => raw as u16 as i16 as i32,
        _ => raw as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 63-byte HID boot-keyboard descriptor (scenario S1).
    const BOOT_KEYBOARD: &[u8] = &[
        0x05, 0x01, // Usage Page (Generic Desktop)
        0x09, 0x06, // Usage (Keyboard)
        0xA1, 0x01, // Collection (Application)
        0x05, 0x07, //   Usage Page (Keyboard)
        0x19, 0xE0, //   Usage Minimum (224)
        0x29, 0xE7, //   Usage Maximum (231)
        0x15, 0x00, //   Logical Minimum (0)
        0x25, 0x01, //   Logical Maximum (1)
        0x75, 0x01, //   Report Size (1)
        0x95, 0x08, //   Report Count (8)
        0x81, 0x02, //   Input (Data, Variable, Absolute)  -- modifier byte
        0x95, 0x01, //   Report Count (1)
        0x75, 0x08, //   Report Size (8)
        0x81, 0x01, //   Input (Constant)                  -- reserved byte
        0x95, 0x05, //   Report Count (5)
        0x75, 0x01, //   Report Size (1)
        0x05, 0x08, //   Usage Page (LEDs)
        0x19, 0x01, //   Usage Minimum (1)
        0x29, 0x05, //   Usage Maximum (5)
        0x91, 0x02, //   Output (Data, Variable, Absolute)  -- LEDs
        0x95, 0x01, //   Report Count (1)
        0x75, 0x03, //   Report Size (3)
        0x91, 0x01, //   Output (Constant)                  -- LED padding
        0x95, 0x06, //   Report Count (6)
        0x75, 0x08, //   Report Size (8)
        0x15, 0x00, //   Logical Minimum (0)
        0x25, 0x65, //   Logical Maximum (101)
        0x05, 0x07, //   Usage Page (Keyboard)
        0x19, 0x00, //   Usage Minimum (0)
        0x29, 0x65, //   Usage Maximum (101)
        0x81, 0x00, //   Input (Data, Array)                -- key array
        0xC0, // End Collection
    ];

    #[test]
    fn boot_keyboard_yields_one_tlc_with_keyboard_usage() {
        let items = parse(BOOT_KEYBOARD);
        let tlcs: Vec<_> = items
            .iter()
            .filter(|it| it.kind == ItemKind::Collection && it.collection_level == 1)
            .collect();
        assert_eq!(tlcs.len(), 1);
        assert_eq!(tlcs[0].usage, 0x0001_0006);
    }

    #[test]
    fn variable_field_expands_to_one_item_per_bit() {
        let items = parse(BOOT_KEYBOARD);
        let modifiers: Vec<_> = items
            .iter()
            .filter(|it| {
                it.kind == ItemKind::Input && it.flags.contains(ItemFlags::VARIABLE) && it.location.bit_size == 1
            })
            .collect();
        assert_eq!(modifiers.len(), 8);
        for (n, it) in modifiers.iter().enumerate() {
            assert_eq!(it.location.bit_pos, n as u32);
            assert_eq!(it.usage, 0x0007_00E0 + n as u32);
        }
    }

    #[test]
    fn array_field_carries_usage_range_and_full_count() {
        let items = parse(BOOT_KEYBOARD);
        let array = items
            .iter()
            .find(|it| it.kind == ItemKind::Input && !it.flags.contains(ItemFlags::VARIABLE) && !it.is_constant())
            .unwrap();
        assert_eq!(array.usage_minimum, 0x0007_0000);
        assert_eq!(array.usage_maximum, 0x0007_0065);
        assert_eq!(array.location.count, 6);
        assert_eq!(array.location.bit_size, 8);
    }

    #[test]
    fn unclosed_collection_stops_emission_without_panicking() {
        let mut broken = BOOT_KEYBOARD.to_vec();
        broken.pop(); // drop the EndCollection byte
        let items = parse(&broken);
        // Still emits everything up to the point the stream ran out.
        assert!(items.iter().any(|it| it.kind == ItemKind::Input));
        assert!(!items.iter().any(|it| it.kind == ItemKind::EndCollection));
    }

    #[test]
    fn mismatched_pop_stops_silently() {
        let bad = [0xB4]; // Pop (Global), zero-length, with nothing pushed.
        let items = parse(&bad);
        assert!(items.is_empty());
    }

    #[test]
    fn long_item_is_skipped() {
        // Long item: 0xFE, data-len=2, tag byte, 2 data bytes, then a normal Usage Page item.
        let desc = [0xFE, 0x02, 0x00, 0xAA, 0xBB, 0x05, 0x01];
        let items = parse(&desc);
        assert!(items.is_empty()); // Usage Page alone emits no Main item.
    }
}
