//! Hotplug watch loop
//!
//! Registers the session's callback, pumps USB events until cancelled or
//! enough devices have arrived, then tears everything down. The loop can run
//! on the caller's thread ([`run_watch`]) or on a dedicated thread
//! ([`Watcher::spawn`]) while other threads read from tracked devices and
//! consume the event log.

use super::bulk::ReadOptions;
use super::session::{HotplugSession, SessionHandle, SessionSink, TrackingMode};
use common::{
    CancelToken, DEFAULT_EVENT_BUFFER, Error, EventPublisher, EventStream, HotplugFilter, Result,
    UsbBackend, create_event_channel,
};
use model::{ConfigurationReport, DeviceAddress, DeviceDescriptorInfo, ReadOutcome, UsbError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause after a failed dispatch before trying again
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub filter: HotplugFilter,
    /// Sleep between dispatch rounds
    pub poll_interval: Duration,
    /// Longest a single dispatch may block
    pub event_timeout: Duration,
    pub tracking: TrackingMode,
    /// Stop after this many devices were opened
    pub exit_after_arrivals: Option<u64>,
    /// Query the first enumerated device before tearing down
    pub post_check: bool,
    pub event_buffer: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            filter: HotplugFilter::any(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            tracking: TrackingMode::default(),
            exit_after_arrivals: None,
            post_check: true,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// First device of the bus, as seen after the loop ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirstDevice {
    pub address: DeviceAddress,
    pub descriptor: DeviceDescriptorInfo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSummary {
    pub arrivals: u64,
    pub opened: u64,
    pub departures: u64,
    pub unhandled: u64,
    pub first_device: Option<FirstDevice>,
    /// Whether the loop stopped because it was cancelled
    pub cancelled: bool,
}

/// Deregisters the callback and shuts the session down when dropped
struct WatchGuard<B: UsbBackend> {
    session: SessionHandle<B>,
    registration: Option<B::Registration>,
}

impl<B: UsbBackend> Drop for WatchGuard<B> {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            self.session.backend().deregister_hotplug(registration);
            debug!("Hotplug callback deregistered");
        }
        self.session.shutdown();
    }
}

/// A registered watch, ready to run
pub struct WatchLoop<B: UsbBackend> {
    session: SessionHandle<B>,
    options: WatchOptions,
    guard: WatchGuard<B>,
}

impl<B: UsbBackend> WatchLoop<B> {
    /// Arm the session and register its hotplug callback
    ///
    /// With `enumerate` set, libusb reports connected devices from inside
    /// the registration call, so the session is armed first.
    pub fn register(session: SessionHandle<B>, options: WatchOptions) -> Result<Self> {
        session.arm();
        let sink = Box::new(SessionSink::new(session.clone()));
        let registration = match session.backend().register_hotplug(&options.filter, sink) {
            Ok(registration) => registration,
            Err(e) => {
                session.shutdown();
                return Err(Error::Initialization(format!(
                    "hotplug callback registration failed: {}",
                    e
                )));
            }
        };
        info!("Hotplug callback registered");

        let guard = WatchGuard {
            session: session.clone(),
            registration: Some(registration),
        };
        Ok(Self {
            session,
            options,
            guard,
        })
    }

    /// Pump events until cancelled or the arrival limit is reached
    pub fn run(self, cancel: &CancelToken) -> Result<WatchSummary> {
        let backend = Arc::clone(self.session.backend());
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                info!("Watch cancelled");
                cancelled = true;
                break;
            }
            if let Some(limit) = self.options.exit_after_arrivals
                && self.session.counters().opened >= limit
            {
                info!("Opened {} devices, stopping watch", limit);
                break;
            }

            match backend.handle_events(self.options.event_timeout) {
                Ok(()) => {}
                Err(UsbError::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(ERROR_BACKOFF);
                }
            }

            std::thread::sleep(self.options.poll_interval);
        }

        let first_device = if self.options.post_check {
            post_check(backend.as_ref())
        } else {
            None
        };

        let counters = self.session.counters();
        drop(self.guard);

        Ok(WatchSummary {
            arrivals: counters.arrivals,
            opened: counters.opened,
            departures: counters.departures,
            unhandled: counters.unhandled,
            first_device,
            cancelled,
        })
    }
}

/// Descriptor of the first device the bus lists
fn post_check<B: UsbBackend>(backend: &B) -> Option<FirstDevice> {
    let devices = match backend.list_devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!("Post-check could not list devices: {}", e);
            return None;
        }
    };
    let device = devices.first()?;
    let address = backend.device_address(device);
    match backend.device_descriptor(device) {
        Ok(descriptor) => Some(FirstDevice {
            address,
            descriptor,
        }),
        Err(e) => {
            warn!("Error retrieving descriptor for {}: {}", address, e);
            None
        }
    }
}

/// Run a watch on the calling thread
pub fn run_watch<B: UsbBackend>(
    backend: Arc<B>,
    options: &WatchOptions,
    cancel: &CancelToken,
    events: Option<EventPublisher>,
) -> Result<WatchSummary> {
    let session = SessionHandle::new(HotplugSession::new(backend, options.tracking, events));
    WatchLoop::register(session, options.clone())?.run(cancel)
}

/// A watch running on its own thread
pub struct Watcher<B: UsbBackend> {
    session: SessionHandle<B>,
    cancel: CancelToken,
    events: EventStream,
    thread: Option<JoinHandle<Result<WatchSummary>>>,
}

impl<B: UsbBackend> Watcher<B> {
    /// Start watching on a `usb-watch` thread
    ///
    /// Returns once the callback is registered; a registration failure is
    /// returned here rather than from [`Watcher::stop`].
    pub fn spawn(backend: Arc<B>, options: WatchOptions) -> Result<Self> {
        let (publisher, events) = create_event_channel(options.event_buffer);
        let session = SessionHandle::new(HotplugSession::new(
            backend,
            options.tracking,
            Some(publisher),
        ));
        let cancel = CancelToken::new();
        let (ready_tx, ready_rx) = async_channel::bounded::<Result<()>>(1);

        let thread_session = session.clone();
        let thread_cancel = cancel.clone();
        let thread = std::thread::Builder::new()
            .name("usb-watch".to_string())
            .spawn(move || {
                info!("USB watch thread started");
                let watch = match WatchLoop::register(thread_session, options) {
                    Ok(watch) => {
                        let _ = ready_tx.send_blocking(Ok(()));
                        watch
                    }
                    Err(e) => {
                        let message = e.to_string();
                        let _ = ready_tx.send_blocking(Err(e));
                        return Err(Error::Other(message));
                    }
                };
                let summary = watch.run(&thread_cancel);
                info!("USB watch thread stopped");
                summary
            })?;

        let mut watcher = Self {
            session,
            cancel,
            events,
            thread: Some(thread),
        };

        match ready_rx.recv_blocking() {
            Ok(Ok(())) => Ok(watcher),
            Ok(Err(e)) => {
                let _ = watcher.join_thread();
                Err(e)
            }
            Err(_) => {
                let _ = watcher.join_thread();
                Err(Error::Other("USB watch thread exited during startup".to_string()))
            }
        }
    }

    /// Session event log
    pub fn events(&self) -> &EventStream {
        &self.events
    }

    pub fn session(&self) -> &SessionHandle<B> {
        &self.session
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Read one packet from a tracked device
    pub fn read(
        &self,
        address: DeviceAddress,
        endpoint: u8,
        max_packet_size: u16,
        options: &ReadOptions,
    ) -> Option<ReadOutcome> {
        self.session.read(address, endpoint, max_packet_size, options)
    }

    /// Describe and read the first configuration of a tracked device
    pub fn read_configuration(
        &self,
        address: DeviceAddress,
        options: &ReadOptions,
    ) -> Result<Option<ConfigurationReport>> {
        self.session.read_configuration(address, options)
    }

    /// Cancel the watch and wait for teardown
    pub fn stop(mut self) -> Result<WatchSummary> {
        self.cancel.cancel();
        self.join_thread()
    }

    /// Wait for the watch to end on its own
    pub fn join(mut self) -> Result<WatchSummary> {
        self.join_thread()
    }

    fn join_thread(&mut self) -> Result<WatchSummary> {
        let Some(thread) = self.thread.take() else {
            return Err(Error::Other("USB watch thread already joined".to_string()));
        };
        match thread.join() {
            Ok(result) => result,
            Err(_) => {
                error!("USB watch thread panicked");
                Err(Error::Other("USB watch thread panicked".to_string()))
            }
        }
    }
}

impl<B: UsbBackend> Drop for Watcher<B> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel.cancel();
            let _ = self.join_thread();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{FakeBus, create_mock_keyboard};
    use model::SessionState;

    fn fast_options() -> WatchOptions {
        WatchOptions {
            poll_interval: Duration::from_millis(1),
            event_timeout: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_exit_after_first_open() {
        let bus = Arc::new(FakeBus::new());
        bus.plug(create_mock_keyboard(1, 4));
        let options = WatchOptions {
            exit_after_arrivals: Some(1),
            ..fast_options()
        };

        let summary = run_watch(bus.clone(), &options, &CancelToken::new(), None).unwrap();
        assert_eq!(summary.opened, 1);
        assert!(!summary.cancelled);
        assert_eq!(
            summary.first_device.map(|d| d.descriptor.vendor_id),
            Some(0x046d)
        );

        let stats = bus.stats();
        assert_eq!(stats.deregistrations, 1);
        assert_eq!(stats.opened, stats.closed);
    }

    #[test]
    fn test_cancelled_before_start() {
        let bus = Arc::new(FakeBus::new());
        let cancel = CancelToken::new();
        cancel.cancel();

        let options = WatchOptions {
            post_check: false,
            ..fast_options()
        };
        let summary = run_watch(bus.clone(), &options, &cancel, None).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.first_device, None);
        assert_eq!(bus.stats().dispatches, 0);
        assert_eq!(bus.stats().deregistrations, 1);
    }

    #[test]
    fn test_registration_failure() {
        let bus = Arc::new(FakeBus::new());
        bus.fail_registration(UsbError::NotSupported);

        let err = run_watch(bus.clone(), &fast_options(), &CancelToken::new(), None).unwrap_err();
        assert!(err.is_initialization());
        assert_eq!(bus.stats().registrations, 0);
    }

    #[test]
    fn test_dispatch_errors_do_not_stop_the_loop() {
        let bus = Arc::new(FakeBus::new());
        bus.fail_dispatch(UsbError::Interrupted);
        bus.fail_dispatch(UsbError::Io);
        bus.plug(create_mock_keyboard(1, 4));
        let options = WatchOptions {
            exit_after_arrivals: Some(1),
            ..fast_options()
        };

        let summary = run_watch(bus.clone(), &options, &CancelToken::new(), None).unwrap();
        assert_eq!(summary.opened, 1);
        assert!(bus.stats().dispatches >= 3);
    }

    #[test]
    fn test_watcher_stop() {
        let bus = Arc::new(FakeBus::new());
        let watcher = Watcher::spawn(bus.clone(), fast_options()).unwrap();
        assert_eq!(watcher.session().state(), SessionState::Armed);

        let summary = watcher.stop().unwrap();
        assert!(summary.cancelled);
        assert_eq!(bus.stats().deregistrations, 1);
    }
}
