//! libusb access through `rusb`

use common::{Error, HotplugFilter, HotplugSink, Result, UsbBackend};
use model::{
    ConfigurationInfo, DeviceAddress, DeviceDescriptorInfo, EndpointInfo, HotplugEventKind,
    InterfaceGroup, InterfaceInfo, TransferKind, UsbError,
};
use rusb::{Context, Device, DeviceHandle, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::time::Duration;
use tracing::{debug, warn};

/// Map rusb errors to the USB error set
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::Interrupted => UsbError::Interrupted,
        rusb::Error::NoMem => UsbError::NoMem,
        rusb::Error::NotSupported => UsbError::NotSupported,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}

pub fn map_transfer_type(transfer_type: rusb::TransferType) -> TransferKind {
    match transfer_type {
        rusb::TransferType::Control => TransferKind::Control,
        rusb::TransferType::Isochronous => TransferKind::Isochronous,
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Interrupt => TransferKind::Interrupt,
    }
}

/// Re-encode a version as the descriptor's BCD value
pub fn version_to_bcd(version: rusb::Version) -> u16 {
    let major = version.major() as u16;
    ((major / 10) << 12)
        | ((major % 10) << 8)
        | ((version.minor() as u16 & 0x0f) << 4)
        | (version.sub_minor() as u16 & 0x0f)
}

/// Production backend: one libusb context
pub struct RusbBackend {
    context: Context,
}

impl RusbBackend {
    pub fn new() -> Result<Self> {
        let context = Context::new().map_err(|e| Error::Initialization(e.to_string()))?;
        debug!("libusb context initialized");
        Ok(Self { context })
    }
}

impl UsbBackend for RusbBackend {
    type Device = Device<Context>;
    type Handle = DeviceHandle<Context>;
    type Registration = Registration<Context>;

    fn list_devices(&self) -> std::result::Result<Vec<Self::Device>, UsbError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        Ok(devices.iter().collect())
    }

    fn device_address(&self, device: &Self::Device) -> DeviceAddress {
        DeviceAddress::new(device.bus_number(), device.address())
    }

    fn device_descriptor(
        &self,
        device: &Self::Device,
    ) -> std::result::Result<DeviceDescriptorInfo, UsbError> {
        let desc = device.device_descriptor().map_err(map_rusb_error)?;
        Ok(DeviceDescriptorInfo {
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            usb_version: version_to_bcd(desc.usb_version()),
            class: desc.class_code(),
            subclass: desc.sub_class_code(),
            protocol: desc.protocol_code(),
            num_configurations: desc.num_configurations(),
        })
    }

    fn open(&self, device: &Self::Device) -> std::result::Result<Self::Handle, UsbError> {
        device.open().map_err(map_rusb_error)
    }

    fn close(&self, handle: Self::Handle) {
        // libusb_close runs when the handle drops
        drop(handle);
    }

    fn config_descriptor(
        &self,
        device: &Self::Device,
        index: u8,
    ) -> std::result::Result<ConfigurationInfo, UsbError> {
        let config = device.config_descriptor(index).map_err(map_rusb_error)?;
        let interfaces = config
            .interfaces()
            .map(|interface| InterfaceGroup {
                number: interface.number(),
                alt_settings: interface
                    .descriptors()
                    .map(|desc| InterfaceInfo {
                        number: desc.interface_number(),
                        alt_setting: desc.setting_number(),
                        class: desc.class_code(),
                        subclass: desc.sub_class_code(),
                        protocol: desc.protocol_code(),
                        endpoints: desc
                            .endpoint_descriptors()
                            .map(|ep| EndpointInfo {
                                address: ep.address(),
                                max_packet_size: ep.max_packet_size(),
                                transfer_type: map_transfer_type(ep.transfer_type()),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();

        Ok(ConfigurationInfo {
            index,
            value: config.number(),
            interfaces,
        })
    }

    fn claim_interface(
        &self,
        handle: &mut Self::Handle,
        interface: u8,
    ) -> std::result::Result<(), UsbError> {
        match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", interface);
                if let Err(e) = handle.detach_kernel_driver(interface) {
                    warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        interface, e
                    );
                }
            }
            Ok(false) => {}
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
            }
        }

        handle.claim_interface(interface).map_err(map_rusb_error)?;
        debug!("Claimed interface {}", interface);
        Ok(())
    }

    fn release_interface(
        &self,
        handle: &mut Self::Handle,
        interface: u8,
    ) -> std::result::Result<(), UsbError> {
        handle.release_interface(interface).map_err(map_rusb_error)?;
        if let Err(e) = handle.attach_kernel_driver(interface) {
            debug!(
                "Could not reattach kernel driver to interface {} (may not have been detached): {}",
                interface, e
            );
        }
        Ok(())
    }

    fn read_bulk(
        &self,
        handle: &Self::Handle,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, UsbError> {
        handle
            .read_bulk(endpoint, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn register_hotplug(
        &self,
        filter: &HotplugFilter,
        sink: Box<dyn HotplugSink<Self::Device>>,
    ) -> std::result::Result<Self::Registration, UsbError> {
        if !rusb::has_hotplug() {
            return Err(UsbError::NotSupported);
        }

        let mut builder = HotplugBuilder::new();
        builder.enumerate(filter.enumerate);
        if let Some(vendor_id) = filter.vendor_id {
            builder.vendor_id(vendor_id);
        }
        if let Some(product_id) = filter.product_id {
            builder.product_id(product_id);
        }
        if let Some(class) = filter.class {
            builder.class(class);
        }

        builder
            .register::<Context, &Context>(&self.context, Box::new(RusbHotplug { sink }))
            .map_err(map_rusb_error)
    }

    fn deregister_hotplug(&self, registration: Self::Registration) {
        // Dropping the registration deregisters the callback
        drop(registration);
    }

    fn handle_events(&self, timeout: Duration) -> std::result::Result<(), UsbError> {
        self.context
            .handle_events(Some(timeout))
            .map_err(map_rusb_error)
    }
}

/// Adapter from rusb's callback trait to a hotplug sink
struct RusbHotplug {
    sink: Box<dyn HotplugSink<Device<Context>>>,
}

impl Hotplug<Context> for RusbHotplug {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.sink.on_event(device, HotplugEventKind::Arrived);
    }

    fn device_left(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.sink.on_event(device, HotplugEventKind::Left);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), UsbError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), UsbError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), UsbError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::Interrupted), UsbError::Interrupted);
        assert!(matches!(
            map_rusb_error(rusb::Error::BadDescriptor),
            UsbError::Other { .. }
        ));
    }

    #[test]
    fn test_timeout_message_matches_library() {
        assert_eq!(
            map_rusb_error(rusb::Error::Timeout).to_string(),
            rusb::Error::Timeout.to_string()
        );
    }

    #[test]
    fn test_version_to_bcd() {
        assert_eq!(version_to_bcd(rusb::Version(2, 0, 0)), 0x0200);
        assert_eq!(version_to_bcd(rusb::Version(1, 1, 0)), 0x0110);
        assert_eq!(version_to_bcd(rusb::Version(3, 2, 0)), 0x0320);
        assert_eq!(version_to_bcd(rusb::Version::from_bcd(0x0210)), 0x0210);
    }

    #[test]
    fn test_transfer_type_mapping() {
        assert_eq!(map_transfer_type(rusb::TransferType::Bulk), TransferKind::Bulk);
        assert_eq!(
            map_transfer_type(rusb::TransferType::Interrupt),
            TransferKind::Interrupt
        );
    }

    #[test]
    fn test_backend_creation() {
        // May fail without USB access
        match RusbBackend::new() {
            Ok(backend) => {
                assert!(backend.list_devices().is_ok());
            }
            Err(e) => {
                assert!(e.is_initialization());
                eprintln!("USB context creation failed (expected without USB): {}", e);
            }
        }
    }
}
