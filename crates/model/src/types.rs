//! USB descriptor and transfer type definitions
//!
//! Plain data views of the descriptors handed out by the USB access layer.
//! Raw codes are kept exactly as the device reported them; anything derived
//! from them (direction, endpoint number, classification) is computed on demand.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Location of a device on the host
///
/// The bus number plus the address the bus assigned at enumeration time.
/// Addresses are reused after a device leaves, so this is only stable for
/// the lifetime of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceAddress {
    /// Bus number
    pub bus: u8,
    /// Device address on the bus
    pub address: u8,
}

impl DeviceAddress {
    pub fn new(bus: u8, address: u8) -> Self {
        Self { bus, address }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus {:03} address {:03}", self.bus, self.address)
    }
}

/// Identity of a device whose descriptor has been read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub address: DeviceAddress,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} ({})",
            self.vendor_id, self.product_id, self.address
        )
    }
}

/// Device descriptor fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptorInfo {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// bcdUSB, the USB specification release in binary-coded decimal
    pub usb_version: u16,
    /// USB device class
    pub class: u8,
    /// USB device subclass
    pub subclass: u8,
    /// USB device protocol
    pub protocol: u8,
    /// Number of configurations
    pub num_configurations: u8,
}

impl DeviceDescriptorInfo {
    /// Identity of the device at `address`
    pub fn identity(&self, address: DeviceAddress) -> DeviceIdentity {
        DeviceIdentity {
            address,
            vendor_id: self.vendor_id,
            product_id: self.product_id,
        }
    }

    /// USB release as it is usually written, e.g. `0x0210` is "2.10"
    pub fn usb_version_string(&self) -> String {
        format!("{:x}.{:02x}", self.usb_version >> 8, self.usb_version & 0xff)
    }
}

/// Endpoint direction, from bit 7 of the endpoint address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// Endpoint transfer type, from bits 0-1 of bmAttributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Endpoint descriptor fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// bEndpointAddress (direction bit plus endpoint number)
    pub address: u8,
    /// wMaxPacketSize as reported by the device
    pub max_packet_size: u16,
    pub transfer_type: TransferKind,
}

impl EndpointInfo {
    pub fn direction(&self) -> Direction {
        endpoint_direction(self.address)
    }
}

/// Direction encoded in an endpoint address
pub fn endpoint_direction(address: u8) -> Direction {
    if address & 0x80 != 0 {
        Direction::In
    } else {
        Direction::Out
    }
}

/// One alternate setting of an interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    /// bInterfaceNumber
    pub number: u8,
    /// bAlternateSetting
    pub alt_setting: u8,
    /// bInterfaceClass
    pub class: u8,
    /// bInterfaceSubClass
    pub subclass: u8,
    /// bInterfaceProtocol
    pub protocol: u8,
    /// Endpoints in descriptor order
    pub endpoints: Vec<EndpointInfo>,
}

/// All alternate settings of one interface, in descriptor order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceGroup {
    pub number: u8,
    pub alt_settings: Vec<InterfaceInfo>,
}

impl InterfaceGroup {
    /// Alternate setting 0, the only one this tool walks
    pub fn primary(&self) -> Option<&InterfaceInfo> {
        self.alt_settings.first()
    }
}

/// Configuration descriptor, already extracted from the raw descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationInfo {
    /// Index the descriptor was fetched with
    pub index: u8,
    /// bConfigurationValue
    pub value: u8,
    pub interfaces: Vec<InterfaceGroup>,
}

/// USB error types
///
/// Mirrors the libusb error set. Display strings follow libusb's own
/// `libusb_strerror` text so reports read like the library's diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum UsbError {
    #[error("Input/Output Error")]
    Io,
    #[error("Invalid parameter")]
    InvalidParam,
    #[error("Access denied (insufficient permissions)")]
    Access,
    #[error("No such device (it may have been disconnected)")]
    NoDevice,
    #[error("Entity not found")]
    NotFound,
    #[error("Resource busy")]
    Busy,
    #[error("Operation timed out")]
    Timeout,
    #[error("Overflow")]
    Overflow,
    #[error("Pipe error")]
    Pipe,
    #[error("System call interrupted (perhaps due to signal)")]
    Interrupted,
    #[error("Insufficient memory")]
    NoMem,
    #[error("Operation not supported or unimplemented on this platform")]
    NotSupported,
    #[error("{message}")]
    Other { message: String },
}

/// Outcome of one bulk read attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadOutcome {
    /// Transfer completed, possibly short
    Ok {
        bytes_transferred: u32,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// No data arrived before the timeout
    Timeout,
    /// Transfer failed
    Error { reason: String },
}

impl ReadOutcome {
    /// Successful read of exactly `data`
    pub fn ok(data: Vec<u8>) -> Self {
        ReadOutcome::Ok {
            bytes_transferred: data.len() as u32,
            data,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        ReadOutcome::Error {
            reason: reason.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ReadOutcome::Ok { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ReadOutcome::Timeout)
    }

    /// Data received, if the read succeeded
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            ReadOutcome::Ok { data, .. } => Some(data),
            _ => None,
        }
    }
}

impl fmt::Display for ReadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadOutcome::Ok {
                bytes_transferred,
                data,
            } => {
                write!(f, "read {} bytes", bytes_transferred)?;
                if !data.is_empty() {
                    write!(f, ":")?;
                    for byte in data {
                        write!(f, " {:02X}", byte)?;
                    }
                }
                Ok(())
            }
            ReadOutcome::Timeout => write!(f, "timed out"),
            ReadOutcome::Error { reason } => write!(f, "error: {}", reason),
        }
    }
}
