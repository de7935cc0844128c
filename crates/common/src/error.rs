//! Common error types
//!
//! Only failures that abort a whole operation live here. Failures isolated
//! to one device or one endpoint are recorded in the report instead.

use model::UsbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Context creation or hotplug registration failed
    #[error("USB initialization failed: {0}")]
    Initialization(String),

    /// The device list could not be retrieved
    #[error("Device enumeration failed: {0}")]
    Enumeration(UsbError),

    #[error("USB error: {0}")]
    Usb(#[from] UsbError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Whether this error aborts the process with a non-zero status
    pub fn is_initialization(&self) -> bool {
        matches!(self, Error::Initialization(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
