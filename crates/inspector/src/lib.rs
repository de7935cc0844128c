//! usb-inspect
//!
//! Enumerates USB devices, classifies their interfaces, reads endpoints and
//! tracks devices across hotplug events.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{FakeBus, create_mock_keyboard};
//! use inspector::usb::{TopologyWalker, WalkOptions};
//! use model::ClassLabel;
//! use std::sync::Arc;
//!
//! let bus = Arc::new(FakeBus::with_devices(vec![create_mock_keyboard(1, 4)]));
//! let reports = TopologyWalker::new(bus, WalkOptions::default()).walk().unwrap();
//!
//! let interface = &reports[0].configurations[0].interfaces[0];
//! assert_eq!(interface.class_label, ClassLabel::HumanInterfaceDevice);
//! ```

pub mod config;
pub mod usb;
