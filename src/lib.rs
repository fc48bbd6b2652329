/* hidcore: a transport-agnostic HID report-descriptor parser, bus core, and raw interface.
 *
 * Modules mirror the data flow from wire bytes to application events: `descriptor` turns a
 * report descriptor into a queryable item list, `codec` reads/writes fields against that list,
 * `transport` is the capability a concrete USB/I2C-HID driver implements, `bus` fans a
 * transport's interrupt reports out to one `Child` per top-level collection, `mapper` turns a
 * TLC's fields into application events via a declarative usage table, and `raw` exposes the
 * same report stream as a backpressured byte interface for callers that want it unprocessed. */
pub mod bus;
pub mod codec;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod mapper;
pub mod matcher;
pub mod quirks;
pub mod raw;
pub mod transport;

#[cfg(any(test, feature = "mock-transport"))]
/// Only compiled when the `mock-transport` feature is enabled (or under test).
pub mod mock;

pub use device::{BusType, DeviceCaps, DeviceInfo};
pub use error::HidError;
