//! USB access layer abstraction
//!
//! Everything the inspector needs from the host controller goes through
//! [`UsbBackend`]: device discovery, descriptors, handle open/close, bulk
//! transfers and hotplug delivery. The production implementation wraps
//! libusb through `rusb`; tests drive the engine with
//! [`crate::test_utils::FakeBus`].

use model::{ConfigurationInfo, DeviceAddress, DeviceDescriptorInfo, HotplugEventKind, UsbError};
use std::time::Duration;

/// Capability interface over a USB bus context
///
/// One backend value is one bus context: created once, shared by reference
/// (usually an `Arc`), torn down when dropped.
pub trait UsbBackend: Send + Sync + 'static {
    /// A device visible on the bus. Cheap to clone.
    type Device: Clone + Send + Sync + 'static;
    /// An open session to a device
    type Handle: Send + Sync + 'static;
    /// Token returned by hotplug registration
    type Registration;

    /// List every device currently visible on the bus
    fn list_devices(&self) -> Result<Vec<Self::Device>, UsbError>;

    /// Bus number and address of a device. Always available.
    fn device_address(&self, device: &Self::Device) -> DeviceAddress;

    fn device_descriptor(&self, device: &Self::Device) -> Result<DeviceDescriptorInfo, UsbError>;

    /// Open a handle to a device
    fn open(&self, device: &Self::Device) -> Result<Self::Handle, UsbError>;

    /// Close a handle previously returned by [`UsbBackend::open`]
    fn close(&self, handle: Self::Handle);

    /// Fetch the configuration descriptor at `index`
    ///
    /// The raw descriptor is released before this returns; only the
    /// extracted view outlives the call.
    fn config_descriptor(
        &self,
        device: &Self::Device,
        index: u8,
    ) -> Result<ConfigurationInfo, UsbError>;

    fn claim_interface(&self, handle: &mut Self::Handle, interface: u8) -> Result<(), UsbError>;

    fn release_interface(&self, handle: &mut Self::Handle, interface: u8)
    -> Result<(), UsbError>;

    /// One bulk IN transfer into `buf`, returning the number of bytes received
    fn read_bulk(
        &self,
        handle: &Self::Handle,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Register a hotplug callback
    ///
    /// The sink is invoked synchronously from inside [`UsbBackend::handle_events`].
    fn register_hotplug(
        &self,
        filter: &HotplugFilter,
        sink: Box<dyn HotplugSink<Self::Device>>,
    ) -> Result<Self::Registration, UsbError>;

    fn deregister_hotplug(&self, registration: Self::Registration);

    /// Block until pending events are dispatched or `timeout` elapses
    fn handle_events(&self, timeout: Duration) -> Result<(), UsbError>;
}

/// Receiver of hotplug notifications
pub trait HotplugSink<D>: Send {
    fn on_event(&mut self, device: D, kind: HotplugEventKind);
}

/// Match criteria for hotplug registration. `None` matches any value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotplugFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub class: Option<u8>,
    /// Deliver synthetic arrivals for devices already connected
    pub enumerate: bool,
}

impl HotplugFilter {
    /// Match every device
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, descriptor: &DeviceDescriptorInfo) -> bool {
        self.vendor_id.is_none_or(|v| v == descriptor.vendor_id)
            && self.product_id.is_none_or(|p| p == descriptor.product_id)
            && self.class.is_none_or(|c| c == descriptor.class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(vendor_id: u16, product_id: u16, class: u8) -> DeviceDescriptorInfo {
        DeviceDescriptorInfo {
            vendor_id,
            product_id,
            usb_version: 0x0200,
            class,
            subclass: 0,
            protocol: 0,
            num_configurations: 1,
        }
    }

    #[test]
    fn test_filter_any_matches_everything() {
        let filter = HotplugFilter::any();
        assert!(filter.matches(&descriptor(0x1234, 0x5678, 0)));
        assert!(filter.matches(&descriptor(0xffff, 0x0000, 9)));
    }

    #[test]
    fn test_filter_vendor_and_class() {
        let filter = HotplugFilter {
            vendor_id: Some(0x046d),
            class: Some(3),
            ..Default::default()
        };
        assert!(filter.matches(&descriptor(0x046d, 0xc31c, 3)));
        assert!(!filter.matches(&descriptor(0x046d, 0xc31c, 0)));
        assert!(!filter.matches(&descriptor(0x1234, 0xc31c, 3)));
    }
}
