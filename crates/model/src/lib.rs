//! Data model for usb-inspect
//!
//! This crate defines the types shared by the USB access layer, the
//! inspection engine and its callers: descriptor views, read outcomes,
//! enumeration reports and hotplug session events. Every type is plain
//! data and serializable with serde, so reports can be rendered as text
//! or emitted as JSON.
//!
//! # Example
//!
//! ```
//! use model::{DeviceAddress, DeviceReport, ReadOutcome};
//!
//! let mut report = DeviceReport::new(DeviceAddress::new(1, 4));
//! assert!(report.identity().is_none());
//!
//! let outcome = ReadOutcome::ok(vec![0x00, 0x01]);
//! assert_eq!(outcome.data(), Some(&[0x00, 0x01][..]));
//! # report.opened = true;
//! ```

pub mod events;
pub mod labels;
pub mod report;
pub mod types;

pub use events::{HotplugEventKind, SessionEvent, SessionState, TransitionOutcome};
pub use labels::{ClassLabel, HidReport, KeyModifier, MouseButton, ProtocolLabel};
pub use report::{
    ConfigurationReport, DeviceError, DeviceReport, DeviceStage, EndpointReport, InterfaceReport,
};
pub use types::{
    ConfigurationInfo, DeviceAddress, DeviceDescriptorInfo, DeviceIdentity, Direction,
    EndpointInfo, InterfaceGroup, InterfaceInfo, ReadOutcome, TransferKind, UsbError,
    endpoint_direction,
};
