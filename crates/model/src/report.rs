//! Enumeration report
//!
//! One [`DeviceReport`] per device visited by a topology walk. Failures that
//! only affect one device or one endpoint are recorded here instead of
//! aborting the walk.

use crate::labels::{ClassLabel, HidReport, ProtocolLabel};
use crate::types::{
    DeviceAddress, DeviceDescriptorInfo, DeviceIdentity, Direction, ReadOutcome, TransferKind,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Step of a device walk that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStage {
    /// Reading the device descriptor
    Descriptor,
    /// Opening a device handle
    Open,
    /// Fetching a configuration descriptor
    Configuration { index: u8 },
    /// Claiming an interface before reading its endpoints
    Claim { interface: u8 },
}

impl fmt::Display for DeviceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStage::Descriptor => write!(f, "device descriptor"),
            DeviceStage::Open => write!(f, "open"),
            DeviceStage::Configuration { index } => write!(f, "configuration {}", index),
            DeviceStage::Claim { interface } => write!(f, "claim interface {}", interface),
        }
    }
}

/// Failure isolated to one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceError {
    pub stage: DeviceStage,
    /// Diagnostic string from the USB access layer
    pub reason: String,
}

impl DeviceError {
    pub fn new(stage: DeviceStage, reason: impl fmt::Display) -> Self {
        Self {
            stage,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointReport {
    pub address: u8,
    pub direction: Direction,
    pub transfer_type: TransferKind,
    pub max_packet_size: u16,
    /// None when no read was attempted (no handle, or reads disabled)
    pub read: Option<ReadOutcome>,
    /// Decoded input report for HID keyboards and mice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded: Option<HidReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceReport {
    pub number: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub class_label: ClassLabel,
    pub protocol_label: ProtocolLabel,
    pub endpoints: Vec<EndpointReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationReport {
    pub index: u8,
    pub value: u8,
    pub interfaces: Vec<InterfaceReport>,
}

/// Everything learned about one device during a walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub address: DeviceAddress,
    /// None when the descriptor could not be read
    pub descriptor: Option<DeviceDescriptorInfo>,
    /// Whether a handle was opened for this device
    pub opened: bool,
    pub configurations: Vec<ConfigurationReport>,
    pub errors: Vec<DeviceError>,
}

impl DeviceReport {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            descriptor: None,
            opened: false,
            configurations: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.descriptor.map(|d| d.identity(self.address))
    }

    /// All endpoints across every configuration and interface
    pub fn endpoints(&self) -> impl Iterator<Item = &EndpointReport> {
        self.configurations
            .iter()
            .flat_map(|c| c.interfaces.iter())
            .flat_map(|i| i.endpoints.iter())
    }

    /// Read outcomes recorded for this device
    pub fn read_outcomes(&self) -> impl Iterator<Item = &ReadOutcome> {
        self.endpoints().filter_map(|e| e.read.as_ref())
    }

    pub fn has_error(&self, stage: DeviceStage) -> bool {
        self.errors.iter().any(|e| e.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(address: u8, read: Option<ReadOutcome>) -> EndpointReport {
        EndpointReport {
            address,
            direction: crate::types::endpoint_direction(address),
            transfer_type: TransferKind::Bulk,
            max_packet_size: 64,
            read,
            decoded: None,
        }
    }

    #[test]
    fn test_read_outcomes_skips_unread_endpoints() {
        let mut report = DeviceReport::new(DeviceAddress::new(1, 4));
        report.configurations.push(ConfigurationReport {
            index: 0,
            value: 1,
            interfaces: vec![InterfaceReport {
                number: 0,
                class: 8,
                subclass: 6,
                protocol: 0x50,
                class_label: ClassLabel::DontCare,
                protocol_label: ProtocolLabel::DontCare,
                endpoints: vec![endpoint(0x81, Some(ReadOutcome::Timeout)), endpoint(0x02, None)],
            }],
        });

        assert_eq!(report.endpoints().count(), 2);
        assert_eq!(report.read_outcomes().count(), 1);
        assert!(report.identity().is_none());
    }

    #[test]
    fn test_device_error_display() {
        let err = DeviceError {
            stage: DeviceStage::Configuration { index: 1 },
            reason: "Pipe error".to_string(),
        };
        assert_eq!(err.to_string(), "configuration 1 failed: Pipe error");
    }
}
