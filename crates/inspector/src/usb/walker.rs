//! Topology walker
//!
//! Enumerates every device on the bus and walks
//! device -> configurations -> interfaces (alternate setting 0) -> endpoints,
//! classifying interfaces and optionally reading each endpoint once.
//!
//! Failures below the device list are recorded in the device's report and
//! never abort the walk.

use super::bulk::{ReadOptions, read_endpoint};
use super::classify::classify;
use super::filter::DeviceFilter;
use super::hid;
use super::lease::HandleCell;
use common::{Error, Result, UsbBackend};
use model::{
    ConfigurationInfo, ConfigurationReport, DeviceError, DeviceReport, DeviceStage,
    EndpointReport, InterfaceGroup, InterfaceInfo, InterfaceReport,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Walk behaviour
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Read each endpoint once
    pub read_endpoints: bool,
    /// Claim each interface before reading it
    pub claim_interfaces: bool,
    pub read: ReadOptions,
    /// Devices to include; empty includes every device
    pub filters: Vec<DeviceFilter>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            read_endpoints: true,
            claim_interfaces: false,
            read: ReadOptions::default(),
            filters: Vec::new(),
        }
    }
}

pub struct TopologyWalker<B: UsbBackend> {
    backend: Arc<B>,
    options: WalkOptions,
}

impl<B: UsbBackend> TopologyWalker<B> {
    pub fn new(backend: Arc<B>, options: WalkOptions) -> Self {
        Self { backend, options }
    }

    /// Walk every device on the bus
    ///
    /// Only a failure to list devices is an error; everything else ends up
    /// in the per-device reports.
    pub fn walk(&self) -> Result<Vec<DeviceReport>> {
        let devices = self.backend.list_devices().map_err(Error::Enumeration)?;
        info!("Found {} USB devices", devices.len());

        let reports = devices
            .iter()
            .filter_map(|device| self.walk_device(device))
            .collect();
        Ok(reports)
    }

    /// Walk one device, or `None` if the device filters exclude it
    pub fn walk_device(&self, device: &B::Device) -> Option<DeviceReport> {
        let address = self.backend.device_address(device);
        let mut report = DeviceReport::new(address);

        let descriptor = match self.backend.device_descriptor(device) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Failed to read device descriptor for {}: {}", address, e);
                report.errors.push(DeviceError::new(DeviceStage::Descriptor, e));
                return Some(report);
            }
        };

        if !DeviceFilter::allows(
            &self.options.filters,
            descriptor.vendor_id,
            descriptor.product_id,
        ) {
            debug!(
                "Skipping {:04x}:{:04x} at {} (filtered)",
                descriptor.vendor_id, descriptor.product_id, address
            );
            return None;
        }
        report.descriptor = Some(descriptor);
        debug!(
            "Walking {:04x}:{:04x} at {}",
            descriptor.vendor_id, descriptor.product_id, address
        );

        // Closed when dropped, on every path out of this function
        let mut handle = match self.backend.open(device) {
            Ok(handle) => {
                report.opened = true;
                Some(HandleCell::new(
                    Arc::clone(&self.backend),
                    device.clone(),
                    handle,
                ))
            }
            Err(e) => {
                warn!("Failed to open {}: {}", address, e);
                report.errors.push(DeviceError::new(DeviceStage::Open, e));
                None
            }
        };

        for index in 0..descriptor.num_configurations {
            match self.backend.config_descriptor(device, index) {
                Ok(config) => {
                    let configuration =
                        self.walk_configuration(&config, &mut handle, &mut report.errors);
                    report.configurations.push(configuration);
                }
                Err(e) => {
                    warn!("Failed to read configuration {} of {}: {}", index, address, e);
                    report
                        .errors
                        .push(DeviceError::new(DeviceStage::Configuration { index }, e));
                }
            }
        }

        drop(handle);
        Some(report)
    }

    fn walk_configuration(
        &self,
        config: &ConfigurationInfo,
        handle: &mut Option<HandleCell<B>>,
        errors: &mut Vec<DeviceError>,
    ) -> ConfigurationReport {
        let interfaces = config
            .interfaces
            .iter()
            .filter_map(|group| self.walk_interface(group, handle, errors))
            .collect();

        ConfigurationReport {
            index: config.index,
            value: config.value,
            interfaces,
        }
    }

    fn walk_interface(
        &self,
        group: &InterfaceGroup,
        handle: &mut Option<HandleCell<B>>,
        errors: &mut Vec<DeviceError>,
    ) -> Option<InterfaceReport> {
        let Some(info) = group.primary() else {
            warn!("Interface {} has no alternate settings, skipping", group.number);
            return None;
        };

        let mut claimed = false;
        if self.options.claim_interfaces
            && let Some(cell) = handle.as_mut()
        {
            match self.backend.claim_interface(cell.handle_mut(), info.number) {
                Ok(()) => claimed = true,
                Err(e) => {
                    warn!("Failed to claim interface {}: {}", info.number, e);
                    errors.push(DeviceError::new(
                        DeviceStage::Claim {
                            interface: info.number,
                        },
                        e,
                    ));
                }
            }
        }

        let report = self.describe_interface(info, handle.as_ref().map(|cell| cell.handle()));

        if claimed
            && let Some(cell) = handle.as_mut()
            && let Err(e) = self.backend.release_interface(cell.handle_mut(), info.number)
        {
            warn!("Failed to release interface {}: {}", info.number, e);
        }

        Some(report)
    }

    /// Describe every interface of a configuration, reading endpoints through
    /// `handle` when given. Interfaces are not claimed.
    pub fn describe_configuration(
        &self,
        config: &ConfigurationInfo,
        handle: Option<&B::Handle>,
    ) -> ConfigurationReport {
        let interfaces = config
            .interfaces
            .iter()
            .filter_map(|group| group.primary())
            .map(|info| self.describe_interface(info, handle))
            .collect();

        ConfigurationReport {
            index: config.index,
            value: config.value,
            interfaces,
        }
    }

    fn describe_interface(
        &self,
        info: &InterfaceInfo,
        handle: Option<&B::Handle>,
    ) -> InterfaceReport {
        let (class_label, protocol_label) = classify(info.class, info.protocol);
        debug!(
            "Interface {}: class {:#04x} ({}), protocol {:#04x} ({})",
            info.number, info.class, class_label, info.protocol, protocol_label
        );

        let endpoints = info
            .endpoints
            .iter()
            .map(|endpoint| {
                let read = match handle {
                    Some(handle) if self.options.read_endpoints => Some(read_endpoint(
                        self.backend.as_ref(),
                        handle,
                        endpoint.address,
                        endpoint.max_packet_size,
                        &self.options.read,
                    )),
                    _ => None,
                };
                let decoded = read
                    .as_ref()
                    .and_then(|r| r.data())
                    .and_then(|data| hid::decode(class_label, protocol_label, data));

                EndpointReport {
                    address: endpoint.address,
                    direction: endpoint.direction(),
                    transfer_type: endpoint.transfer_type,
                    max_packet_size: endpoint.max_packet_size,
                    read,
                    decoded,
                }
            })
            .collect();

        InterfaceReport {
            number: info.number,
            class: info.class,
            subclass: info.subclass,
            protocol: info.protocol,
            class_label,
            protocol_label,
            endpoints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{FakeBus, create_mock_keyboard, create_mock_mass_storage};
    use model::{DeviceAddress, HidReport, KeyModifier, ReadOutcome};

    #[test]
    fn test_walk_reads_and_decodes() {
        let bus = Arc::new(FakeBus::with_devices(vec![
            create_mock_keyboard(1, 4).with_read(0x81, Ok(vec![0x02, 0, 0x04, 0, 0, 0, 0, 0])),
        ]));
        let walker = TopologyWalker::new(bus.clone(), WalkOptions::default());

        let reports = walker.walk().unwrap();
        assert_eq!(reports.len(), 1);
        let endpoint = reports[0].endpoints().next().unwrap();
        assert!(endpoint.read.as_ref().unwrap().is_ok());
        assert_eq!(
            endpoint.decoded,
            Some(HidReport::Keyboard {
                modifiers: vec![KeyModifier::LeftShift],
                keys: vec![0x04],
            })
        );
        assert_eq!(bus.stats().open_handles, 0);
    }

    #[test]
    fn test_walk_without_reads() {
        let bus = Arc::new(FakeBus::with_devices(vec![create_mock_mass_storage(1, 2)]));
        let options = WalkOptions {
            read_endpoints: false,
            ..Default::default()
        };
        let reports = TopologyWalker::new(bus.clone(), options).walk().unwrap();

        assert!(reports[0].opened);
        assert_eq!(reports[0].read_outcomes().count(), 0);
        assert!(bus.read_calls().is_empty());
    }

    #[test]
    fn test_describe_configuration_with_external_handle() {
        let bus = Arc::new(FakeBus::with_devices(vec![create_mock_mass_storage(1, 2)]));
        let address = DeviceAddress::new(1, 2);
        let walker = TopologyWalker::new(bus.clone(), WalkOptions::default());
        let config = bus.config_descriptor(&address, 0).unwrap();
        let handle = bus.open(&address).unwrap();

        let report = walker.describe_configuration(&config, Some(&handle));
        let reads: Vec<_> = report.interfaces[0]
            .endpoints
            .iter()
            .map(|e| e.read.clone())
            .collect();
        assert_eq!(reads[0], Some(ReadOutcome::Timeout));
        assert!(matches!(reads[1], Some(ReadOutcome::Error { .. })));
        bus.close(handle);
    }
}
