//! Device handle ownership
//!
//! A [`HandleCell`] owns one open device handle and closes it exactly once,
//! when the cell is dropped. The hotplug session keeps cells behind an `Arc`
//! and hands out [`HandleLease`]s to readers; revoking a cell on departure
//! stops new leases, while the close itself waits for the last lease
//! in flight to be dropped.

use common::UsbBackend;
use model::DeviceAddress;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// An open device handle, closed on drop
pub struct HandleCell<B: UsbBackend> {
    backend: Arc<B>,
    device: B::Device,
    address: DeviceAddress,
    handle: Option<B::Handle>,
    revoked: AtomicBool,
}

impl<B: UsbBackend> HandleCell<B> {
    pub fn new(backend: Arc<B>, device: B::Device, handle: B::Handle) -> Self {
        let address = backend.device_address(&device);
        Self {
            backend,
            device,
            address,
            handle: Some(handle),
            revoked: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn handle(&self) -> &B::Handle {
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("handle is only taken when the cell drops"),
        }
    }

    pub fn handle_mut(&mut self) -> &mut B::Handle {
        match &mut self.handle {
            Some(handle) => handle,
            None => unreachable!("handle is only taken when the cell drops"),
        }
    }

    /// Mark the handle as no longer leasable
    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::Release);
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }
}

impl<B: UsbBackend> Drop for HandleCell<B> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Closing handle for {}", self.address);
            self.backend.close(handle);
        }
    }
}

impl<B: UsbBackend> fmt::Debug for HandleCell<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleCell")
            .field("address", &self.address)
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

/// Shared lease on an open handle
///
/// The handle stays open for as long as any lease is alive, even after the
/// owning session has let go of it.
pub struct HandleLease<B: UsbBackend>(Arc<HandleCell<B>>);

impl<B: UsbBackend> HandleLease<B> {
    /// Take a lease unless the cell has been revoked
    pub fn acquire(cell: &Arc<HandleCell<B>>) -> Option<Self> {
        if cell.is_revoked() {
            None
        } else {
            Some(Self(Arc::clone(cell)))
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.0.address()
    }

    pub fn device(&self) -> &B::Device {
        self.0.device()
    }

    pub fn handle(&self) -> &B::Handle {
        self.0.handle()
    }

    /// Whether the device has departed since the lease was taken
    pub fn is_revoked(&self) -> bool {
        self.0.is_revoked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{FakeBus, create_mock_keyboard};

    fn open_cell(bus: &Arc<FakeBus>) -> Arc<HandleCell<FakeBus>> {
        let device = DeviceAddress::new(1, 4);
        let handle = bus.open(&device).unwrap();
        Arc::new(HandleCell::new(bus.clone(), device, handle))
    }

    #[test]
    fn test_cell_closes_once_on_drop() {
        let bus = Arc::new(FakeBus::with_devices(vec![create_mock_keyboard(1, 4)]));
        let cell = open_cell(&bus);
        assert_eq!(bus.stats().open_handles, 1);

        drop(cell);
        let stats = bus.stats();
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.invalid_closes, 0);
    }

    #[test]
    fn test_lease_defers_close() {
        let bus = Arc::new(FakeBus::with_devices(vec![create_mock_keyboard(1, 4)]));
        let cell = open_cell(&bus);
        let lease = HandleLease::acquire(&cell).unwrap();

        cell.revoke();
        drop(cell);
        assert_eq!(bus.stats().closed, 0);
        assert!(lease.is_revoked());

        drop(lease);
        assert_eq!(bus.stats().closed, 1);
    }

    #[test]
    fn test_revoked_cell_refuses_leases() {
        let bus = Arc::new(FakeBus::with_devices(vec![create_mock_keyboard(1, 4)]));
        let cell = open_cell(&bus);
        cell.revoke();
        assert!(HandleLease::acquire(&cell).is_none());
    }
}
