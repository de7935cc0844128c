//! Async channel bridge between the USB watch thread and async callers
//!
//! The hotplug callback runs inside libusb's event dispatch on the watch
//! thread and must never block, so publishing is non-blocking: when the
//! receiver falls behind, entries are dropped and counted.

use async_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use model::SessionEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Default capacity of the event channel
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Sending half, owned by the watch thread
#[derive(Clone)]
pub struct EventPublisher {
    tx: Sender<SessionEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventPublisher {
    /// Publish an event without blocking
    pub fn publish(&self, event: SessionEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Event log full, dropping event #{}", event.sequence);
            }
            Err(TrySendError::Closed(_)) => {
                // Nobody is listening; the session still logs through tracing
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of events that could not be delivered
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving half, for async or blocking consumers
#[derive(Clone)]
pub struct EventStream {
    rx: Receiver<SessionEvent>,
}

impl EventStream {
    /// Receive the next event
    ///
    /// Fails once every publisher is gone and the buffer is drained.
    pub async fn recv(&self) -> crate::Result<SessionEvent> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from a non-async thread
    pub fn recv_blocking(&self) -> crate::Result<SessionEvent> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<SessionEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    /// Drain every buffered event
    pub fn drain(&self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// Create the event channel between the watch thread and its consumers
///
/// Returns (EventPublisher for the watch thread, EventStream for consumers)
pub fn create_event_channel(capacity: usize) -> (EventPublisher, EventStream) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        EventPublisher {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        EventStream { rx },
    )
}
