//! Hotplug session state machine
//!
//! The session owns every handle opened in response to hotplug arrivals.
//! Events arrive through [`SessionSink`], which the USB access layer invokes
//! synchronously from its event dispatch; readers on other threads borrow
//! handles through [`SessionHandle::lease`].
//!
//! ```text
//! Idle --arm--> Armed --arrival--> Active --last departure--> Armed
//!                 \                   \
//!                  +----shutdown-------+--> Shutdown
//! ```

use super::bulk::{ReadOptions, read_endpoint};
use super::lease::{HandleCell, HandleLease};
use super::walker::{TopologyWalker, WalkOptions};
use common::{EventPublisher, HotplugSink, Result, UsbBackend};
use model::{
    ConfigurationReport, DeviceAddress, DeviceIdentity, HotplugEventKind, ReadOutcome,
    SessionEvent, SessionState, TransitionOutcome,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// How many handles the session keeps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// One handle per device address
    #[default]
    PerDevice,
    /// A single tracked handle. An arrival of another device displaces the
    /// tracked handle, which stays open until shutdown or until its device
    /// arrives again. A departure only closes the tracked handle when it
    /// belongs to the departing device.
    SingleSlot,
}

/// Event counters of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    /// Arrival events handled while armed
    pub arrivals: u64,
    /// Arrivals whose device was opened
    pub opened: u64,
    pub departures: u64,
    /// Events of a kind the session does not handle
    pub unhandled: u64,
}

pub struct HotplugSession<B: UsbBackend> {
    backend: Arc<B>,
    mode: TrackingMode,
    state: SessionState,
    tracked: BTreeMap<DeviceAddress, Arc<HandleCell<B>>>,
    /// Handles pushed out of the single slot; closed at shutdown
    displaced: Vec<Arc<HandleCell<B>>>,
    counters: SessionCounters,
    sequence: u64,
    publisher: Option<EventPublisher>,
}

impl<B: UsbBackend> HotplugSession<B> {
    pub fn new(backend: Arc<B>, mode: TrackingMode, publisher: Option<EventPublisher>) -> Self {
        Self {
            backend,
            mode,
            state: SessionState::Idle,
            tracked: BTreeMap::new(),
            displaced: Vec::new(),
            counters: SessionCounters::default(),
            sequence: 0,
            publisher,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    /// Addresses with a tracked handle
    pub fn tracked(&self) -> Vec<DeviceAddress> {
        self.tracked.keys().copied().collect()
    }

    /// Addresses of displaced handles still waiting for shutdown
    pub fn displaced(&self) -> Vec<DeviceAddress> {
        self.displaced.iter().map(|cell| cell.address()).collect()
    }

    /// Callback registered: start accepting events
    pub fn arm(&mut self) {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Armed;
                debug!("Hotplug session armed ({:?})", self.mode);
            }
            state => warn!("Cannot arm hotplug session in state {}", state),
        }
    }

    /// Apply one hotplug event and return its log entry
    pub fn handle_event(&mut self, device: &B::Device, kind: HotplugEventKind) -> SessionEvent {
        let address = self.backend.device_address(device);
        let identity = self
            .backend
            .device_descriptor(device)
            .ok()
            .map(|d| d.identity(address));

        let outcome = match self.state {
            SessionState::Idle | SessionState::Shutdown => {
                warn!(
                    "Ignoring {:?} for {} in state {}",
                    kind, address, self.state
                );
                TransitionOutcome::Ignored
            }
            SessionState::Armed | SessionState::Active => match kind {
                HotplugEventKind::Arrived => self.on_arrived(device, address, identity),
                HotplugEventKind::Left => self.on_left(address),
                HotplugEventKind::Other(code) => {
                    self.counters.unhandled += 1;
                    warn!("Unhandled hotplug event {} for {}", code, address);
                    TransitionOutcome::Unhandled
                }
            },
        };

        if matches!(self.state, SessionState::Armed | SessionState::Active) {
            self.state = if self.tracked.is_empty() {
                SessionState::Armed
            } else {
                SessionState::Active
            };
        }

        self.sequence += 1;
        let event = SessionEvent {
            sequence: self.sequence,
            device: address,
            identity,
            kind,
            outcome,
            state: self.state,
            tracked: self.tracked.len(),
        };
        debug!("{}", event);
        if let Some(publisher) = &self.publisher {
            publisher.publish(event.clone());
        }
        event
    }

    fn on_arrived(
        &mut self,
        device: &B::Device,
        address: DeviceAddress,
        identity: Option<DeviceIdentity>,
    ) -> TransitionOutcome {
        self.counters.arrivals += 1;
        self.release_stale(address);

        let handle = match self.backend.open(device) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Could not open USB device {}: {}", address, e);
                return TransitionOutcome::OpenFailed {
                    reason: e.to_string(),
                };
            }
        };
        self.counters.opened += 1;
        match identity {
            Some(identity) => info!("Device arrived: {}", identity),
            None => info!("Device arrived: {}", address),
        }

        let cell = Arc::new(HandleCell::new(
            Arc::clone(&self.backend),
            device.clone(),
            handle,
        ));

        let displaced = match self.mode {
            TrackingMode::PerDevice => {
                self.tracked.insert(address, cell);
                None
            }
            TrackingMode::SingleSlot => {
                let previous = std::mem::take(&mut self.tracked);
                self.tracked.insert(address, cell);
                previous.into_iter().next().map(|(previous, stale)| {
                    debug!("{} displaced from the tracked slot by {}", previous, address);
                    self.displaced.push(stale);
                    previous
                })
            }
        };

        TransitionOutcome::Opened { displaced }
    }

    /// Drop every handle still held for `address`, tracked or displaced
    ///
    /// A re-arrival opens a fresh handle, so the old one goes first. A lease
    /// still in flight delays the close until it is dropped.
    fn release_stale(&mut self, address: DeviceAddress) {
        if let Some(stale) = self.tracked.remove(&address) {
            warn!("{} arrived while already tracked, closing stale handle", address);
            stale.revoke();
        }
        let before = self.displaced.len();
        self.displaced.retain(|cell| {
            let stale = cell.address() == address;
            if stale {
                cell.revoke();
            }
            !stale
        });
        if self.displaced.len() != before {
            debug!("Closed displaced handle for re-arrived {}", address);
        }
    }

    fn on_left(&mut self, address: DeviceAddress) -> TransitionOutcome {
        self.counters.departures += 1;

        match self.tracked.remove(&address) {
            Some(cell) => {
                info!("Device left: {}", address);
                // In-flight leases keep the handle open until they drop
                cell.revoke();
                TransitionOutcome::Closed
            }
            None => {
                debug!("Device left: {} (no tracked handle)", address);
                TransitionOutcome::NotTracked
            }
        }
    }

    /// Lease the tracked handle for `address`
    pub fn lease(&self, address: DeviceAddress) -> Option<HandleLease<B>> {
        self.tracked.get(&address).and_then(HandleLease::acquire)
    }

    /// Release every handle and stop accepting events. Idempotent.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::Shutdown {
            return;
        }
        let tracked = std::mem::take(&mut self.tracked);
        let displaced = std::mem::take(&mut self.displaced);
        debug!(
            "Shutting down hotplug session: {} tracked, {} displaced",
            tracked.len(),
            displaced.len()
        );
        for cell in tracked.values().chain(displaced.iter()) {
            cell.revoke();
        }
        drop(tracked);
        drop(displaced);

        self.state = SessionState::Shutdown;
        // Closes the event channel once the consumer has drained it
        self.publisher = None;
    }
}

impl<B: UsbBackend> Drop for HotplugSession<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Shared handle to a session
pub struct SessionHandle<B: UsbBackend> {
    inner: Arc<Mutex<HotplugSession<B>>>,
    backend: Arc<B>,
}

impl<B: UsbBackend> Clone for SessionHandle<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: UsbBackend> SessionHandle<B> {
    pub fn new(session: HotplugSession<B>) -> Self {
        let backend = Arc::clone(&session.backend);
        Self {
            inner: Arc::new(Mutex::new(session)),
            backend,
        }
    }

    // A panic inside a callback must not wedge teardown
    fn lock(&self) -> MutexGuard<'_, HotplugSession<B>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn arm(&self) {
        self.lock().arm();
    }

    pub fn handle_event(&self, device: &B::Device, kind: HotplugEventKind) -> SessionEvent {
        self.lock().handle_event(device, kind)
    }

    pub fn shutdown(&self) {
        self.lock().shutdown();
    }

    pub fn state(&self) -> SessionState {
        self.lock().state()
    }

    pub fn counters(&self) -> SessionCounters {
        self.lock().counters()
    }

    pub fn tracked(&self) -> Vec<DeviceAddress> {
        self.lock().tracked()
    }

    pub fn displaced(&self) -> Vec<DeviceAddress> {
        self.lock().displaced()
    }

    /// Lease the tracked handle for `address`
    ///
    /// The session lock is only held while the lease is taken.
    pub fn lease(&self, address: DeviceAddress) -> Option<HandleLease<B>> {
        self.lock().lease(address)
    }

    /// Read one packet from a tracked device, or `None` if it is not tracked
    pub fn read(
        &self,
        address: DeviceAddress,
        endpoint: u8,
        max_packet_size: u16,
        options: &ReadOptions,
    ) -> Option<ReadOutcome> {
        let lease = self.lease(address)?;
        Some(read_endpoint(
            self.backend.as_ref(),
            lease.handle(),
            endpoint,
            max_packet_size,
            options,
        ))
    }

    /// Describe and read the first configuration of a tracked device
    ///
    /// Returns `Ok(None)` if the device is not tracked.
    pub fn read_configuration(
        &self,
        address: DeviceAddress,
        options: &ReadOptions,
    ) -> Result<Option<ConfigurationReport>> {
        let Some(lease) = self.lease(address) else {
            return Ok(None);
        };
        let config = self.backend.config_descriptor(lease.device(), 0)?;
        let walker = TopologyWalker::new(
            Arc::clone(&self.backend),
            WalkOptions {
                read: *options,
                ..Default::default()
            },
        );
        Ok(Some(walker.describe_configuration(&config, Some(lease.handle()))))
    }
}

/// Hotplug sink feeding a session
pub struct SessionSink<B: UsbBackend> {
    session: SessionHandle<B>,
}

impl<B: UsbBackend> SessionSink<B> {
    pub fn new(session: SessionHandle<B>) -> Self {
        Self { session }
    }
}

impl<B: UsbBackend> HotplugSink<B::Device> for SessionSink<B> {
    fn on_event(&mut self, device: B::Device, kind: HotplugEventKind) {
        self.session.handle_event(&device, kind);
    }
}
