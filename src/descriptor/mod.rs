/* Descriptor parsing: HID item stream, report model, and the ReportDescriptor query surface
 * (spec.md §4.1). */
pub mod item;
pub mod parser;
pub mod report;

pub use item::{AbsInfo, HidItem, ItemFlags, ItemKind, Location};
pub use report::{LocateResult, ReportDescriptor};
