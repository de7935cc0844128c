//! Common utilities for usb-inspect
//!
//! This crate provides the pieces shared by the inspection engine and its
//! callers: the USB access layer abstraction, error handling, logging setup,
//! cancellation, and the channel bridge that carries hotplug session events
//! from the watch thread to async code.

pub mod backend;
pub mod cancel;
pub mod channel;
pub mod error;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use backend::{HotplugFilter, HotplugSink, UsbBackend};
pub use cancel::CancelToken;
pub use channel::{DEFAULT_EVENT_BUFFER, EventPublisher, EventStream, create_event_channel};
pub use error::{Error, Result};
pub use logging::setup_logging;
