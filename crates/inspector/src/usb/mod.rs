//! USB inspection engine
//!
//! - Descriptor classification and boot-protocol HID decoding
//! - Topology walk with single-shot endpoint reads
//! - Hotplug session tracking and the watch loop that drives it
//! - The libusb backend behind [`common::UsbBackend`]
//!
//! Everything except [`RusbBackend`] is generic over the backend, so the
//! engine runs unchanged against `common::test_utils::FakeBus`.

pub mod backend;
pub mod bulk;
pub mod classify;
pub mod filter;
pub mod hid;
pub mod lease;
pub mod session;
pub mod walker;
pub mod watch;

pub use backend::{RusbBackend, map_rusb_error};
pub use bulk::{DEFAULT_READ_TIMEOUT, MAX_PACKET_SIZE, PacketSizePolicy, ReadOptions, read_endpoint};
pub use classify::{ClassEntry, classify};
pub use filter::{DeviceFilter, FilterError, parse_hex_id};
pub use lease::{HandleCell, HandleLease};
pub use session::{HotplugSession, SessionCounters, SessionHandle, SessionSink, TrackingMode};
pub use walker::{TopologyWalker, WalkOptions};
pub use watch::{FirstDevice, WatchLoop, WatchOptions, WatchSummary, Watcher, run_watch};
