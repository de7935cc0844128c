//! Test utilities for usb-inspect
//!
//! Provides [`FakeBus`], an in-memory [`UsbBackend`] with scripted devices,
//! plus helpers for building descriptors.
//!
//! # Example
//!
//! ```
//! use common::UsbBackend;
//! use common::test_utils::{FakeBus, create_mock_keyboard};
//!
//! let bus = FakeBus::with_devices(vec![create_mock_keyboard(1, 4)]);
//! let devices = bus.list_devices().unwrap();
//! assert_eq!(devices.len(), 1);
//! assert_eq!(bus.device_descriptor(&devices[0]).unwrap().vendor_id, 0x046d);
//! ```

use crate::backend::{HotplugFilter, HotplugSink, UsbBackend};
use model::{
    ConfigurationInfo, DeviceAddress, DeviceDescriptorInfo, EndpointInfo, HotplugEventKind,
    InterfaceGroup, InterfaceInfo, TransferKind, UsbError,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Bulk IN endpoint descriptor
pub fn bulk_in(address: u8, max_packet_size: u16) -> EndpointInfo {
    EndpointInfo {
        address: address | 0x80,
        max_packet_size,
        transfer_type: TransferKind::Bulk,
    }
}

/// Bulk OUT endpoint descriptor
pub fn bulk_out(address: u8, max_packet_size: u16) -> EndpointInfo {
    EndpointInfo {
        address: address & 0x0f,
        max_packet_size,
        transfer_type: TransferKind::Bulk,
    }
}

/// Interrupt IN endpoint descriptor
pub fn interrupt_in(address: u8, max_packet_size: u16) -> EndpointInfo {
    EndpointInfo {
        address: address | 0x80,
        max_packet_size,
        transfer_type: TransferKind::Interrupt,
    }
}

/// Interface with a single alternate setting
pub fn mock_interface(
    number: u8,
    class: u8,
    subclass: u8,
    protocol: u8,
    endpoints: Vec<EndpointInfo>,
) -> InterfaceGroup {
    InterfaceGroup {
        number,
        alt_settings: vec![InterfaceInfo {
            number,
            alt_setting: 0,
            class,
            subclass,
            protocol,
            endpoints,
        }],
    }
}

/// Configuration holding `interfaces`
pub fn mock_configuration(index: u8, interfaces: Vec<InterfaceGroup>) -> ConfigurationInfo {
    ConfigurationInfo {
        index,
        value: index + 1,
        interfaces,
    }
}

/// Scripted result of one bulk read
pub type FakeRead = Result<Vec<u8>, UsbError>;

/// A device on the fake bus
#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub address: DeviceAddress,
    pub descriptor: DeviceDescriptorInfo,
    pub configurations: Vec<Result<ConfigurationInfo, UsbError>>,
    pub descriptor_error: Option<UsbError>,
    pub open_error: Option<UsbError>,
    pub claim_error: Option<UsbError>,
    /// Scripted reads per endpoint address; an empty queue times out
    pub reads: BTreeMap<u8, VecDeque<FakeRead>>,
    /// Whether the device currently shows up in the device list
    pub present: bool,
}

impl FakeDevice {
    /// Device without configurations
    pub fn new(bus: u8, address: u8, vendor_id: u16, product_id: u16) -> Self {
        Self {
            address: DeviceAddress::new(bus, address),
            descriptor: DeviceDescriptorInfo {
                vendor_id,
                product_id,
                usb_version: 0x0200,
                class: 0,
                subclass: 0,
                protocol: 0,
                num_configurations: 0,
            },
            configurations: Vec::new(),
            descriptor_error: None,
            open_error: None,
            claim_error: None,
            reads: BTreeMap::new(),
            present: true,
        }
    }

    pub fn with_configuration(mut self, configuration: ConfigurationInfo) -> Self {
        self.configurations.push(Ok(configuration));
        self
    }

    /// Add a configuration slot whose descriptor cannot be fetched
    pub fn with_failing_configuration(mut self, error: UsbError) -> Self {
        self.configurations.push(Err(error));
        self
    }

    pub fn with_read(mut self, endpoint: u8, read: FakeRead) -> Self {
        self.reads.entry(endpoint).or_default().push_back(read);
        self
    }

    pub fn failing_descriptor(mut self, error: UsbError) -> Self {
        self.descriptor_error = Some(error);
        self
    }

    pub fn failing_open(mut self, error: UsbError) -> Self {
        self.open_error = Some(error);
        self
    }

    pub fn failing_claim(mut self, error: UsbError) -> Self {
        self.claim_error = Some(error);
        self
    }

    fn descriptor(&self) -> DeviceDescriptorInfo {
        DeviceDescriptorInfo {
            num_configurations: self.configurations.len() as u8,
            ..self.descriptor
        }
    }
}

/// HID boot keyboard with one interrupt IN endpoint
pub fn create_mock_keyboard(bus: u8, address: u8) -> FakeDevice {
    FakeDevice::new(bus, address, 0x046d, 0xc31c).with_configuration(mock_configuration(
        0,
        vec![mock_interface(0, 0x03, 0x01, 0x01, vec![interrupt_in(1, 8)])],
    ))
}

/// HID boot mouse with one interrupt IN endpoint
pub fn create_mock_mouse(bus: u8, address: u8) -> FakeDevice {
    FakeDevice::new(bus, address, 0x046d, 0xc077).with_configuration(mock_configuration(
        0,
        vec![mock_interface(0, 0x03, 0x01, 0x02, vec![interrupt_in(1, 4)])],
    ))
}

/// Mass storage device with a bulk IN/OUT pair
pub fn create_mock_mass_storage(bus: u8, address: u8) -> FakeDevice {
    FakeDevice::new(bus, address, 0x0781, 0x5581).with_configuration(mock_configuration(
        0,
        vec![mock_interface(
            0,
            0x08,
            0x06,
            0x50,
            vec![bulk_in(1, 512), bulk_out(2, 512)],
        )],
    ))
}

/// Handle issued by the fake bus
#[derive(Debug, PartialEq, Eq)]
pub struct FakeHandle {
    pub id: u64,
    pub address: DeviceAddress,
    claimed: Vec<u8>,
}

/// Registration token issued by the fake bus
#[derive(Debug, PartialEq, Eq)]
pub struct FakeRegistration(pub u64);

/// A bulk read issued against the fake bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCall {
    pub device: DeviceAddress,
    pub endpoint: u8,
    pub buffer_len: usize,
    pub timeout: Duration,
}

/// Counters exposed for resource accounting assertions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeBusStats {
    pub opened: usize,
    pub closed: usize,
    /// Handles currently open
    pub open_handles: usize,
    /// Opens of a device that already had an open handle
    pub double_opens: usize,
    /// Closes of a handle that was not open
    pub invalid_closes: usize,
    pub config_fetches: usize,
    pub registrations: usize,
    pub deregistrations: usize,
    pub dispatches: usize,
    /// Reads issued on a handle that had already been closed
    pub reads_on_closed: usize,
    pub claims: usize,
    pub releases: usize,
}

type Sink = Box<dyn HotplugSink<DeviceAddress>>;

#[derive(Default)]
struct FakeBusState {
    devices: Vec<FakeDevice>,
    list_error: Option<UsbError>,
    register_error: Option<UsbError>,
    dispatch_errors: VecDeque<UsbError>,
    pending: VecDeque<(DeviceAddress, HotplugEventKind)>,
    sinks: BTreeMap<u64, (HotplugFilter, Sink)>,
    next_id: u64,
    open: BTreeMap<u64, DeviceAddress>,
    reads: Vec<ReadCall>,
    stats: FakeBusStats,
}

impl FakeBusState {
    fn device(&self, address: DeviceAddress) -> Option<&FakeDevice> {
        self.devices.iter().find(|d| d.address == address)
    }

    fn device_mut(&mut self, address: DeviceAddress) -> Option<&mut FakeDevice> {
        self.devices.iter_mut().find(|d| d.address == address)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory USB bus
///
/// Devices are addressed by [`DeviceAddress`]. Hotplug events queued with
/// [`FakeBus::plug`], [`FakeBus::unplug`] or [`FakeBus::queue_event`] are
/// delivered to registered sinks on the next [`UsbBackend::handle_events`].
/// Enumerated arrivals are delivered from inside
/// [`UsbBackend::register_hotplug`], as libusb does.
#[derive(Default)]
pub struct FakeBus {
    state: Mutex<FakeBusState>,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<FakeDevice>) -> Self {
        let bus = Self::new();
        bus.state().devices = devices;
        bus
    }

    fn state(&self) -> MutexGuard<'_, FakeBusState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next device list call fail
    pub fn fail_listing(&self, error: UsbError) {
        self.state().list_error = Some(error);
    }

    /// Make the next hotplug registration fail
    pub fn fail_registration(&self, error: UsbError) {
        self.state().register_error = Some(error);
    }

    /// Make the next event dispatch fail
    pub fn fail_dispatch(&self, error: UsbError) {
        self.state().dispatch_errors.push_back(error);
    }

    /// Script another read result for an endpoint of a connected device
    pub fn script_read(&self, address: DeviceAddress, endpoint: u8, read: FakeRead) {
        if let Some(device) = self.state().device_mut(address) {
            device.reads.entry(endpoint).or_default().push_back(read);
        }
    }

    /// Connect a device and queue its arrival
    pub fn plug(&self, mut device: FakeDevice) {
        let mut state = self.state();
        let address = device.address;
        device.present = true;
        state.devices.retain(|d| d.address != address);
        state.devices.push(device);
        state.pending.push_back((address, HotplugEventKind::Arrived));
    }

    /// Disconnect a device and queue its departure
    ///
    /// The descriptor stays readable, as libusb keeps it cached for
    /// departure callbacks.
    pub fn unplug(&self, address: DeviceAddress) {
        let mut state = self.state();
        if let Some(device) = state.device_mut(address) {
            device.present = false;
        }
        state.pending.push_back((address, HotplugEventKind::Left));
    }

    /// Queue a raw event without touching the device list
    pub fn queue_event(&self, address: DeviceAddress, kind: HotplugEventKind) {
        self.state().pending.push_back((address, kind));
    }

    pub fn pending_events(&self) -> usize {
        self.state().pending.len()
    }

    pub fn stats(&self) -> FakeBusStats {
        let state = self.state();
        FakeBusStats {
            open_handles: state.open.len(),
            ..state.stats.clone()
        }
    }

    pub fn read_calls(&self) -> Vec<ReadCall> {
        self.state().reads.clone()
    }
}

impl UsbBackend for FakeBus {
    type Device = DeviceAddress;
    type Handle = FakeHandle;
    type Registration = FakeRegistration;

    fn list_devices(&self) -> Result<Vec<DeviceAddress>, UsbError> {
        let mut state = self.state();
        if let Some(error) = state.list_error.take() {
            return Err(error);
        }
        Ok(state
            .devices
            .iter()
            .filter(|d| d.present)
            .map(|d| d.address)
            .collect())
    }

    fn device_address(&self, device: &DeviceAddress) -> DeviceAddress {
        *device
    }

    fn device_descriptor(&self, device: &DeviceAddress) -> Result<DeviceDescriptorInfo, UsbError> {
        let state = self.state();
        let device = state.device(*device).ok_or(UsbError::NoDevice)?;
        match &device.descriptor_error {
            Some(error) => Err(error.clone()),
            None => Ok(device.descriptor()),
        }
    }

    fn open(&self, device: &DeviceAddress) -> Result<FakeHandle, UsbError> {
        let mut state = self.state();
        let found = state.device(*device).ok_or(UsbError::NoDevice)?;
        if !found.present {
            return Err(UsbError::NoDevice);
        }
        if let Some(error) = &found.open_error {
            return Err(error.clone());
        }

        if state.open.values().any(|open| open == device) {
            state.stats.double_opens += 1;
        }
        let id = state.next_id();
        state.open.insert(id, *device);
        state.stats.opened += 1;
        Ok(FakeHandle {
            id,
            address: *device,
            claimed: Vec::new(),
        })
    }

    fn close(&self, handle: FakeHandle) {
        let mut state = self.state();
        if state.open.remove(&handle.id).is_some() {
            state.stats.closed += 1;
        } else {
            state.stats.invalid_closes += 1;
        }
    }

    fn config_descriptor(
        &self,
        device: &DeviceAddress,
        index: u8,
    ) -> Result<ConfigurationInfo, UsbError> {
        let mut state = self.state();
        state.stats.config_fetches += 1;
        let device = state.device(*device).ok_or(UsbError::NoDevice)?;
        device
            .configurations
            .get(index as usize)
            .cloned()
            .unwrap_or(Err(UsbError::NotFound))
    }

    fn claim_interface(&self, handle: &mut FakeHandle, interface: u8) -> Result<(), UsbError> {
        let mut state = self.state();
        state.stats.claims += 1;
        let device = state.device(handle.address).ok_or(UsbError::NoDevice)?;
        if let Some(error) = &device.claim_error {
            return Err(error.clone());
        }
        handle.claimed.push(interface);
        Ok(())
    }

    fn release_interface(&self, handle: &mut FakeHandle, interface: u8) -> Result<(), UsbError> {
        let mut state = self.state();
        state.stats.releases += 1;
        match handle.claimed.iter().position(|i| *i == interface) {
            Some(pos) => {
                handle.claimed.remove(pos);
                Ok(())
            }
            None => Err(UsbError::NotFound),
        }
    }

    fn read_bulk(
        &self,
        handle: &FakeHandle,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        let mut state = self.state();
        state.reads.push(ReadCall {
            device: handle.address,
            endpoint,
            buffer_len: buf.len(),
            timeout,
        });
        if !state.open.contains_key(&handle.id) {
            state.stats.reads_on_closed += 1;
            return Err(UsbError::NoDevice);
        }

        let device = state.device_mut(handle.address).ok_or(UsbError::NoDevice)?;
        if !device.present {
            return Err(UsbError::NoDevice);
        }
        let scripted = device
            .reads
            .get_mut(&endpoint)
            .and_then(|queue| queue.pop_front());

        match scripted {
            None => Err(UsbError::Timeout),
            Some(Err(error)) => Err(error),
            Some(Ok(data)) if data.len() > buf.len() => Err(UsbError::Overflow),
            Some(Ok(data)) => {
                buf[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            }
        }
    }

    fn register_hotplug(
        &self,
        filter: &HotplugFilter,
        mut sink: Box<dyn HotplugSink<DeviceAddress>>,
    ) -> Result<FakeRegistration, UsbError> {
        let present: Vec<DeviceAddress> = {
            let mut state = self.state();
            if let Some(error) = state.register_error.take() {
                return Err(error);
            }
            if filter.enumerate {
                state
                    .devices
                    .iter()
                    .filter(|d| d.present && filter.matches(&d.descriptor()))
                    .map(|d| d.address)
                    .collect()
            } else {
                Vec::new()
            }
        };

        // Delivered before registration returns, with the lock released
        for address in present {
            sink.on_event(address, HotplugEventKind::Arrived);
        }

        let mut state = self.state();
        let id = state.next_id();
        state.sinks.insert(id, (filter.clone(), sink));
        state.stats.registrations += 1;
        Ok(FakeRegistration(id))
    }

    fn deregister_hotplug(&self, registration: FakeRegistration) {
        let mut state = self.state();
        if state.sinks.remove(&registration.0).is_some() {
            state.stats.deregistrations += 1;
        }
    }

    fn handle_events(&self, _timeout: Duration) -> Result<(), UsbError> {
        // Sinks call back into the bus, so they run with the lock released
        let (events, mut sinks) = {
            let mut state = self.state();
            state.stats.dispatches += 1;
            if let Some(error) = state.dispatch_errors.pop_front() {
                return Err(error);
            }
            let events: Vec<_> = state.pending.drain(..).collect();
            let events: Vec<_> = events
                .into_iter()
                .map(|(address, kind)| {
                    let descriptor = state.device(address).map(|d| d.descriptor());
                    (address, kind, descriptor)
                })
                .collect();
            (events, std::mem::take(&mut state.sinks))
        };

        for (address, kind, descriptor) in events {
            for (filter, sink) in sinks.values_mut() {
                let matched = descriptor.as_ref().is_none_or(|d| filter.matches(d));
                if matched {
                    sink.on_event(address, kind);
                }
            }
        }

        let mut state = self.state();
        let registered_during_dispatch = std::mem::take(&mut state.sinks);
        sinks.extend(registered_during_dispatch);
        state.sinks = sinks;
        Ok(())
    }
}
