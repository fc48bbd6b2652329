/* Generic usage mapper ("hmap"): declarative usage-to-event translation for a TLC (spec.md
 * §4.6). A map is a table of `MapItem`s; `attach` binds each entry against the parsed
 * descriptor once, `run` decodes an incoming report against the bound entries and invokes the
 * map's callback for each event. The `CbCtx` tagged union is the design note's own vocabulary
 * (spec.md §9): one enum threads attach/run/detach/completion through a single entry point
 * instead of four separate trait methods, mirroring how the descriptor parser itself folds
 * several item kinds through one `parse` loop. */
use crate::codec;
use crate::descriptor::{HidItem, ItemKind, ReportDescriptor};

/// Relative-vs-absolute policy for a mapped axis; `FromItem` defers to the field's own
/// `RELATIVE` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelAbsPolicy {
    FromItem,
    ForceRelative,
    ForceAbsolute,
}

/// Context passed to a per-entry `Callback` handler at each phase (spec.md §4.6). Distinct
/// from `CbCtx`: a callback entry has no fixed `event_code` of its own, so it gets the raw
/// field value (or the bound item, at attach/detach) and decides what to emit by calling back
/// into the `MapCallback` it's handed.
pub enum CallbackCtx<'a> {
    Attach { item: &'a HidItem },
    Run { value: i32 },
    Detach,
}

/// One row of a usage map.
#[derive(Clone)]
pub enum MapItem {
    /// A single variable field, mapped to one output event.
    Variable {
        usage: u32,
        event_code: u32,
        policy: RelAbsPolicy,
        /// If true, `attach` fails the whole map when this usage isn't found in the TLC.
        required: bool,
    },
    /// A variable field that additionally drops values outside `[logical_min, logical_max]`
    /// instead of reporting them (spec.md §4.6).
    VariableNullState {
        usage: u32,
        event_code: u32,
        policy: RelAbsPolicy,
        required: bool,
    },
    /// An array field's usage range, mapped to a contiguous run of event codes starting at
    /// `event_code_base` (`usage - usage_range.start + event_code_base`).
    ArrayRange { usage_range: (u32, u32), event_code_base: u32 },
    /// An explicit usage-to-event-code table for array fields with non-contiguous usages.
    ArrayList { pairs: &'static [(u32, u32)] },
    /// An ad-hoc per-usage(-range) handler invoked at attach/run/detach, for semantics a fixed
    /// event code can't express (e.g. synthesizing a D-pad into a hat-switch axis).
    Callback { usage_range: (u32, u32), handler: fn(&mut dyn MapCallback, CallbackCtx<'_>) },
}

/// A `MapItem` resolved against the descriptor: the bit location(s) it was bound to, plus any
/// run-phase state (last reported value, currently held array keys) needed to implement the
/// dedup/release rules in spec.md §4.6.
enum BoundItem {
    Variable {
        event_code: u32,
        policy: RelAbsPolicy,
        item: HidItem,
        null_state: bool,
        last_value: Option<i32>,
    },
    /// `held[i]` is the event code currently pressed for array slot `i`, if any — one slot per
    /// element so multi-slot rollover arrays (e.g. a 6-key boot-keyboard array) release and
    /// press independently per slot.
    Array {
        item: HidItem,
        usage_to_code: Vec<(u32, u32)>,
        held: Vec<Option<u32>>,
    },
    Callback {
        item: HidItem,
        handler: fn(&mut dyn MapCallback, CallbackCtx<'_>),
    },
}

impl BoundItem {
    /// The report ID the bound field was parsed out of (spec.md §4.6's per-report-ID filter:
    /// "for each parsed item whose report_id equals the incoming report's ID").
    fn report_id(&self) -> u8 {
        match self {
            BoundItem::Variable { item, .. } => item.report_id,
            BoundItem::Array { item, .. } => item.report_id,
            BoundItem::Callback { item, .. } => item.report_id,
        }
    }
}

/// Context passed to a map's callback at each phase (spec.md §9 design note).
pub enum CbCtx<'a> {
    /// The field this entry bound to, seen once per entry during `attach`.
    Attach { usage: u32, item: &'a HidItem },
    /// A decoded value during `run`, for `event_code`.
    Run { event_code: u32, value: i32 },
    /// The TLC is being detached; release any held state.
    Detach,
    /// All fields in this report have been processed; a good place to flush/sync an event batch.
    Complete,
}

/// A callback invoked by `Mapper::run` for every phase transition. `as_any_mut` lets a
/// `Callback`-kind entry's handler recover its concrete type and mutate state `on` alone
/// can't reach (spec.md §4.6: the handler "decides what to emit" itself).
pub trait MapCallback {
    fn on(&mut self, ctx: CbCtx<'_>);

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

fn find_variable(
    descriptor: &ReportDescriptor,
    tlc_index: u32,
    usage: u32,
) -> Option<HidItem> {
    descriptor
        .iterate_tlc(tlc_index)
        .find(|it| it.kind == ItemKind::Input && it.is_variable() && it.usage == usage)
        .cloned()
}

fn find_array_range(
    descriptor: &ReportDescriptor,
    tlc_index: u32,
    usage_min: u32,
) -> Option<HidItem> {
    descriptor
        .iterate_tlc(tlc_index)
        .find(|it| it.kind == ItemKind::Input && !it.is_variable() && it.usage_minimum == usage_min)
        .cloned()
}

fn find_callback_target(
    descriptor: &ReportDescriptor,
    tlc_index: u32,
    usage_range: (u32, u32),
) -> Option<HidItem> {
    descriptor
        .iterate_tlc(tlc_index)
        .find(|it| {
            if it.kind != ItemKind::Input || it.is_constant() {
                return false;
            }
            if it.is_variable() {
                it.usage >= usage_range.0 && it.usage <= usage_range.1
            } else {
                it.usage_minimum <= usage_range.1 && it.usage_maximum >= usage_range.0
            }
        })
        .cloned()
}

/// A usage map bound to one TLC's descriptor items.
pub struct Mapper {
    bound: Vec<BoundItem>,
}

impl Mapper {
    /// Bind `table` against `descriptor`'s `tlc_index`. Fails if a `required: true` entry
    /// finds no matching field (spec.md §4.6: "probe fails if a required usage is unbound").
    pub fn attach(
        table: &[MapItem],
        descriptor: &ReportDescriptor,
        tlc_index: u32,
        cb: &mut dyn MapCallback,
    ) -> Result<Mapper, String> {
        let mut bound = Vec::new();
        for entry in table {
            match *entry {
                MapItem::Variable { usage, event_code, policy, required } => {
                    match find_variable(descriptor, tlc_index, usage) {
                        Some(item) => {
                            cb.on(CbCtx::Attach { usage, item: &item });
                            bound.push(BoundItem::Variable {
                                event_code,
                                policy,
                                item,
                                null_state: false,
                                last_value: None,
                            });
                        }
                        None if required => {
                            return Err(format!("required usage {usage:#x} not found in TLC {tlc_index}"));
                        }
                        None => {}
                    }
                }
                MapItem::VariableNullState { usage, event_code, policy, required } => {
                    match find_variable(descriptor, tlc_index, usage) {
                        Some(item) => {
                            cb.on(CbCtx::Attach { usage, item: &item });
                            bound.push(BoundItem::Variable {
                                event_code,
                                policy,
                                item,
                                null_state: true,
                                last_value: None,
                            });
                        }
                        None if required => {
                            return Err(format!("required usage {usage:#x} not found in TLC {tlc_index}"));
                        }
                        None => {}
                    }
                }
                MapItem::ArrayRange { usage_range, event_code_base } => {
                    if let Some(item) = find_array_range(descriptor, tlc_index, usage_range.0) {
                        let usage_to_code = (usage_range.0..=usage_range.1)
                            .map(|u| (u, event_code_base + (u - usage_range.0)))
                            .collect();
                        let count = item.location.count.max(1) as usize;
                        cb.on(CbCtx::Attach { usage: usage_range.0, item: &item });
                        bound.push(BoundItem::Array { item, usage_to_code, held: vec![None; count] });
                    }
                }
                MapItem::ArrayList { pairs } => {
                    if let Some(item) = descriptor
                        .iterate_tlc(tlc_index)
                        .find(|it| it.kind == ItemKind::Input && !it.is_variable())
                        .cloned()
                    {
                        let count = item.location.count.max(1) as usize;
                        cb.on(CbCtx::Attach { usage: item.usage_minimum, item: &item });
                        bound.push(BoundItem::Array { item, usage_to_code: pairs.to_vec(), held: vec![None; count] });
                    }
                }
                MapItem::Callback { usage_range, handler } => {
                    if let Some(item) = find_callback_target(descriptor, tlc_index, usage_range) {
                        cb.on(CbCtx::Attach { usage: usage_range.0, item: &item });
                        handler(cb, CallbackCtx::Attach { item: &item });
                        bound.push(BoundItem::Callback { item, handler });
                    }
                }
            }
        }
        Ok(Mapper { bound })
    }

    /// Decode `report` against every bound entry whose `report_id` matches the incoming
    /// report's, and deliver events through `cb`, followed by one `Complete` callback
    /// (spec.md §4.6). A single TLC may contain several report IDs (spec.md §4.4); filtering
    /// by report ID down to the fields that actually belong to this report is the mapper's
    /// job, not the bus core's — it only demuxes by TLC. Takes `&mut self` because Variable
    /// dedup and ArrayRange/ArrayList release-then-press both need state that survives across
    /// calls.
    pub fn run(&mut self, report_id: u8, report: &[u8], cb: &mut dyn MapCallback) {
        for entry in &mut self.bound {
            if entry.report_id() != report_id {
                continue;
            }
            match entry {
                BoundItem::Variable { event_code, policy, item, null_state, last_value } => {
                    let relative = match policy {
                        RelAbsPolicy::FromItem => item.flags.contains(crate::descriptor::ItemFlags::RELATIVE),
                        RelAbsPolicy::ForceRelative => true,
                        RelAbsPolicy::ForceAbsolute => false,
                    };
                    let value = if item.is_signed() || relative {
                        codec::get_signed(report, &item.location) as i32
                    } else {
                        codec::get_unsigned(report, &item.location) as i32
                    };
                    if *null_state && (value < item.logical_min || value > item.logical_max) {
                        continue;
                    }
                    if !relative && *last_value == Some(value) {
                        continue;
                    }
                    *last_value = Some(value);
                    cb.on(CbCtx::Run { event_code: *event_code, value });
                }
                BoundItem::Array { item, usage_to_code, held } => {
                    for i in 0..item.location.count {
                        let raw: i64 = if item.is_signed() {
                            codec::get_signed_at(report, &item.location, i)
                        } else {
                            codec::get_unsigned_at(report, &item.location, i) as i64
                        };
                        let in_range =
                            raw >= item.logical_min as i64 && raw <= item.logical_max as i64;
                        let new_code = if in_range {
                            let usage = (item.usage_minimum as i64 + (raw - item.logical_min as i64)) as u32;
                            // Usage id 0 is reserved ("no event indicated") on nearly every HID
                            // usage page; treat it as an idle slot rather than a real key.
                            if usage & 0xFFFF == 0 {
                                None
                            } else {
                                usage_to_code.iter().find(|(u, _)| *u == usage).map(|(_, code)| *code)
                            }
                        } else {
                            None
                        };
                        let slot = &mut held[i as usize];
                        if *slot != new_code {
                            if let Some(old_code) = slot.take() {
                                cb.on(CbCtx::Run { event_code: old_code, value: 0 });
                            }
                            if let Some(new) = new_code {
                                cb.on(CbCtx::Run { event_code: new, value: 1 });
                            }
                            *slot = new_code;
                        }
                    }
                }
                BoundItem::Callback { item, handler } => {
                    let value = if item.is_signed() {
                        codec::get_signed(report, &item.location) as i32
                    } else {
                        codec::get_unsigned(report, &item.location) as i32
                    };
                    handler(cb, CallbackCtx::Run { value });
                }
            }
        }
        cb.on(CbCtx::Complete);
    }

    pub fn detach(&self, cb: &mut dyn MapCallback) {
        for entry in &self.bound {
            if let BoundItem::Callback { handler, .. } = entry {
                handler(cb, CallbackCtx::Detach);
            }
        }
        cb.on(CbCtx::Detach);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOT_KEYBOARD: &[u8] = &[
        0x05, 0x01, 0x09, 0x06, 0xA1, 0x01, 0x85, 0x01, 0x05, 0x07, 0x19, 0xE0, 0x29, 0xE7, 0x15,
        0x00, 0x25, 0x01, 0x75, 0x01, 0x95, 0x08, 0x81, 0x02, 0x95, 0x06, 0x75, 0x08, 0x15, 0x00,
        0x25, 0x65, 0x05, 0x07, 0x19, 0x00, 0x29, 0x65, 0x81, 0x00, 0xC0,
    ];

    #[derive(Default)]
    struct Recorder {
        events: Vec<(u32, i32)>,
        completes: u32,
    }

    impl MapCallback for Recorder {
        fn on(&mut self, ctx: CbCtx<'_>) {
            match ctx {
                CbCtx::Run { event_code, value } => self.events.push((event_code, value)),
                CbCtx::Complete => self.completes += 1,
                _ => {}
            }
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[test]
    fn variable_field_maps_left_ctrl_modifier_bit() {
        let rd = ReportDescriptor::new(BOOT_KEYBOARD);
        let table = [MapItem::Variable {
            usage: 0x0007_00E0, // Left Control
            event_code: 29,
            policy: RelAbsPolicy::ForceAbsolute,
            required: true,
        }];
        let mut rec = Recorder::default();
        let mut mapper = Mapper::attach(&table, &rd, 0, &mut rec).unwrap();

        let report = [0x01u8, 0, 0, 0, 0, 0, 0, 0]; // Left Ctrl bit set
        mapper.run(1, &report, &mut rec);
        assert_eq!(rec.events, vec![(29, 1)]);
        assert_eq!(rec.completes, 1);
    }

    #[test]
    fn missing_required_usage_fails_attach() {
        let rd = ReportDescriptor::new(BOOT_KEYBOARD);
        let table = [MapItem::Variable {
            usage: 0x0009_0001, // not present in this descriptor
            event_code: 1,
            policy: RelAbsPolicy::FromItem,
            required: true,
        }];
        let mut rec = Recorder::default();
        assert!(Mapper::attach(&table, &rd, 0, &mut rec).is_err());
    }

    #[test]
    fn array_range_maps_keycode_byte_to_event_code() {
        let rd = ReportDescriptor::new(BOOT_KEYBOARD);
        let table = [MapItem::ArrayRange { usage_range: (0x0007_0000, 0x0007_0065), event_code_base: 0 }];
        let mut rec = Recorder::default();
        let mut mapper = Mapper::attach(&table, &rd, 0, &mut rec).unwrap();

        let report = [0u8, 0, 0x04, 0, 0, 0, 0, 0]; // key 'a' = usage 0x04
        mapper.run(1, &report, &mut rec);
        assert_eq!(rec.events, vec![(4, 1)]);
    }

    #[test]
    fn array_range_with_nonzero_usage_minimum_applies_spec_formula() {
        // spec.md §8 S3: usage_min=0xE0, logical_min=0, value 2 -> usage 0x0007_00E2, not the
        // bit-masked 0x0007_0002 a naive `(usage_minimum & 0xFFFF_0000) | raw` formula yields.
        const DESCR: &[u8] = &[
            0x05, 0x07, 0x09, 0x06, 0xA1, 0x01, 0x15, 0x00, 0x25, 0x07, 0x75, 0x03, 0x95, 0x01,
            0x19, 0xE0, 0x29, 0xE7, 0x81, 0x00, 0xC0,
        ];
        let rd = ReportDescriptor::new(DESCR);
        let table = [MapItem::ArrayRange { usage_range: (0x0007_00E0, 0x0007_00E7), event_code_base: 100 }];
        let mut rec = Recorder::default();
        let mut mapper = Mapper::attach(&table, &rd, 0, &mut rec).unwrap();

        mapper.run(0, &[0x02u8], &mut rec); // raw value 2 -> usage 0x0007_00E2 -> code 102
        assert_eq!(rec.events, vec![(102, 1)]);
    }

    #[test]
    fn array_range_releases_previous_key_before_pressing_new_one() {
        let rd = ReportDescriptor::new(BOOT_KEYBOARD);
        let table = [MapItem::ArrayRange { usage_range: (0x0007_0000, 0x0007_0065), event_code_base: 0 }];
        let mut rec = Recorder::default();
        let mut mapper = Mapper::attach(&table, &rd, 0, &mut rec).unwrap();

        let report_a = [0u8, 0, 0x04, 0, 0, 0, 0, 0]; // key 'a'
        mapper.run(1, &report_a, &mut rec);
        let report_b = [0u8, 0, 0x05, 0, 0, 0, 0, 0]; // key 'b', same slot
        mapper.run(1, &report_b, &mut rec);

        assert_eq!(rec.events, vec![(4, 1), (4, 0), (5, 1)]);
    }

    #[test]
    fn absolute_variable_skips_unchanged_value_on_subsequent_runs() {
        let rd = ReportDescriptor::new(BOOT_KEYBOARD);
        let table = [MapItem::Variable {
            usage: 0x0007_00E0,
            event_code: 29,
            policy: RelAbsPolicy::ForceAbsolute,
            required: true,
        }];
        let mut rec = Recorder::default();
        let mut mapper = Mapper::attach(&table, &rd, 0, &mut rec).unwrap();

        let report = [0x01u8, 0, 0, 0, 0, 0, 0, 0];
        mapper.run(1, &report, &mut rec);
        mapper.run(1, &report, &mut rec);
        assert_eq!(rec.events, vec![(29, 1)]);
        assert_eq!(rec.completes, 2);
    }

    #[test]
    fn variable_null_state_drops_out_of_range_values() {
        // Usage Page(Button), Usage 1, logical range [1,3], 8-bit field. Usage(1) is reissued
        // inside the collection: a Usage item binds to the *next* Main item, so the first one
        // is consumed by Collection itself and the Input needs its own.
        const DESCR: &[u8] = &[
            0x05, 0x09, 0x09, 0x01, 0xA1, 0x01, 0x09, 0x01, 0x15, 0x01, 0x25, 0x03, 0x75, 0x08,
            0x95, 0x01, 0x81, 0x02, 0xC0,
        ];
        let rd = ReportDescriptor::new(DESCR);
        let table = [MapItem::VariableNullState {
            usage: 0x0009_0001,
            event_code: 77,
            policy: RelAbsPolicy::ForceAbsolute,
            required: true,
        }];
        let mut rec = Recorder::default();
        let mut mapper = Mapper::attach(&table, &rd, 0, &mut rec).unwrap();

        mapper.run(0, &[2u8], &mut rec);
        mapper.run(0, &[0u8], &mut rec); // out of range, dropped
        mapper.run(0, &[3u8], &mut rec);

        assert_eq!(rec.events, vec![(77, 2), (77, 3)]);
    }

    #[test]
    fn run_only_decodes_bound_items_whose_report_id_matches_the_incoming_report() {
        // spec.md §8 S2, folded into a single TLC: report ID 1 carries an 8-bit button
        // variable field, report ID 2 carries an 8-bit absolute X axis. spec.md §4.4 notes a
        // single TLC can own several report IDs, and that filtering a report down to the
        // fields that actually belong to it is the mapper's job, not the bus core's.
        const DESCR: &[u8] = &[
            0x05, 0x01, 0x09, 0x05, 0xA1, 0x01, // Usage Page(Desktop), Usage(Gamepad), Collection
            0x85, 0x01, // Report ID (1)
            0x05, 0x09, 0x19, 0x01, 0x29, 0x08, // Usage Page(Button), Usage Min/Max 1..8
            0x15, 0x00, 0x25, 0x01, 0x75, 0x01, 0x95, 0x08, 0x81, 0x02, // 8x1-bit Input(Var)
            0x85, 0x02, // Report ID (2)
            0x05, 0x01, 0x09, 0x30, // Usage Page(Desktop), Usage(X)
            0x15, 0x00, 0x26, 0xFF, 0x00, 0x75, 0x08, 0x95, 0x01, 0x81,
            0x02, // Logical Max(255) as a 2-byte item (0xFF alone sign-extends negative), 8-bit Input(Var,Abs)
            0xC0,
        ];
        let rd = ReportDescriptor::new(DESCR);
        let table = [
            MapItem::Variable {
                usage: 0x0009_0001,
                event_code: 1, // BTN_1
                policy: RelAbsPolicy::ForceAbsolute,
                required: true,
            },
            MapItem::Variable {
                usage: 0x0009_0003,
                event_code: 3, // BTN_3
                policy: RelAbsPolicy::ForceAbsolute,
                required: true,
            },
            MapItem::Variable {
                usage: 0x0001_0030,
                event_code: 100, // ABS_X
                policy: RelAbsPolicy::ForceAbsolute,
                required: true,
            },
        ];
        let mut rec = Recorder::default();
        let mut mapper = Mapper::attach(&table, &rd, 0, &mut rec).unwrap();

        // Report ID 1, bits 0 and 2 set (BTN_1 and BTN_3 down): must not touch ABS_X's slot,
        // whose bit position collides with buttons 1-8 in a report ID 2 body of its own.
        mapper.run(1, &[0x05], &mut rec);
        assert_eq!(rec.events, vec![(1, 1), (3, 1)]);

        rec.events.clear();
        mapper.run(2, &[0x34], &mut rec);
        assert_eq!(rec.events, vec![(100, 0x34)]);
    }

    #[test]
    fn callback_entry_runs_handler_at_attach_run_and_detach() {
        struct Probe {
            attached: bool,
            runs: Vec<i32>,
            detached: bool,
        }
        impl MapCallback for Probe {
            fn on(&mut self, _ctx: CbCtx<'_>) {}
            fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
                self
            }
        }

        fn handler(cb: &mut dyn MapCallback, ctx: CallbackCtx<'_>) {
            let probe = cb.as_any_mut().downcast_mut::<Probe>().unwrap();
            match ctx {
                CallbackCtx::Attach { .. } => probe.attached = true,
                CallbackCtx::Run { value } => probe.runs.push(value),
                CallbackCtx::Detach => probe.detached = true,
            }
        }

        let rd = ReportDescriptor::new(BOOT_KEYBOARD);
        let table = [MapItem::Callback { usage_range: (0x0007_00E0, 0x0007_00E0), handler }];
        let mut probe = Probe { attached: false, runs: Vec::new(), detached: false };
        let mut mapper = Mapper::attach(&table, &rd, 0, &mut probe).unwrap();
        assert!(probe.attached);

        let report = [0x01u8, 0, 0, 0, 0, 0, 0, 0];
        mapper.run(1, &report, &mut probe);
        assert_eq!(probe.runs, vec![1]);

        mapper.detach(&mut probe);
        assert!(probe.detached);
    }
}
