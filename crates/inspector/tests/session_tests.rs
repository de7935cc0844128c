//! Hotplug session integration tests
//!
//! Drives the session through event sequences and checks the resulting
//! state, the tracked set, and the handle accounting on the fake bus.
//!
//! Run with: `cargo test -p inspector --test session_tests`

use common::test_utils::{FakeBus, create_mock_keyboard, create_mock_mass_storage, create_mock_mouse};
use common::create_event_channel;
use inspector::usb::{HotplugSession, ReadOptions, SessionHandle, TrackingMode};
use model::{DeviceAddress, HotplugEventKind, ReadOutcome, SessionState, TransitionOutcome};
use std::sync::Arc;
use std::thread;

const A: DeviceAddress = DeviceAddress { bus: 1, address: 4 };
const B: DeviceAddress = DeviceAddress { bus: 1, address: 5 };
const C: DeviceAddress = DeviceAddress { bus: 2, address: 3 };

fn bus() -> Arc<FakeBus> {
    Arc::new(FakeBus::with_devices(vec![
        create_mock_keyboard(1, 4),
        create_mock_mouse(1, 5),
        create_mock_mass_storage(2, 3),
    ]))
}

fn armed(bus: &Arc<FakeBus>, mode: TrackingMode) -> SessionHandle<FakeBus> {
    let session = SessionHandle::new(HotplugSession::new(Arc::clone(bus), mode, None));
    session.arm();
    session
}

// ============================================================================
// Per-device tracking
// ============================================================================

mod per_device {
    use super::*;

    #[test]
    fn test_arrive_then_leave_returns_to_armed() {
        let bus = bus();
        let session = armed(&bus, TrackingMode::PerDevice);

        session.handle_event(&A, HotplugEventKind::Arrived);
        assert_eq!(session.state(), SessionState::Active);
        session.handle_event(&A, HotplugEventKind::Left);

        assert_eq!(session.state(), SessionState::Armed);
        assert!(session.tracked().is_empty());
        let stats = bus.stats();
        assert_eq!(stats.opened, 1);
        assert_eq!(stats.closed, 1);
    }

    #[test]
    fn test_two_devices_tracked_independently() {
        let bus = bus();
        let session = armed(&bus, TrackingMode::PerDevice);

        session.handle_event(&A, HotplugEventKind::Arrived);
        session.handle_event(&B, HotplugEventKind::Arrived);
        assert_eq!(session.tracked(), vec![A, B]);

        let event = session.handle_event(&A, HotplugEventKind::Left);
        assert_eq!(event.outcome, TransitionOutcome::Closed);
        assert_eq!(event.tracked, 1);
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.tracked(), vec![B]);

        session.handle_event(&B, HotplugEventKind::Left);
        assert_eq!(session.state(), SessionState::Armed);
        assert_eq!(bus.stats().open_handles, 0);
    }

    #[test]
    fn test_rearrival_closes_stale_handle() {
        let bus = bus();
        let session = armed(&bus, TrackingMode::PerDevice);

        session.handle_event(&A, HotplugEventKind::Arrived);
        let event = session.handle_event(&A, HotplugEventKind::Arrived);

        assert_eq!(event.outcome, TransitionOutcome::Opened { displaced: None });
        let stats = bus.stats();
        assert_eq!(stats.opened, 2);
        assert_eq!(stats.closed, 1);
        // The stale handle was closed before the device was opened again
        assert_eq!(stats.double_opens, 0);
        assert_eq!(stats.open_handles, 1);
        assert_eq!(session.tracked(), vec![A]);
        assert_eq!(session.counters().arrivals, 2);
    }

    #[test]
    fn test_rearrival_with_failed_open_drops_stale_handle() {
        let bus = bus();
        let session = armed(&bus, TrackingMode::PerDevice);
        session.handle_event(&A, HotplugEventKind::Arrived);

        bus.plug(create_mock_keyboard(1, 4).failing_open(model::UsbError::Busy));
        let event = session.handle_event(&A, HotplugEventKind::Arrived);

        assert!(matches!(event.outcome, TransitionOutcome::OpenFailed { .. }));
        assert!(session.tracked().is_empty());
        assert_eq!(session.state(), SessionState::Armed);
        assert_eq!(bus.stats().open_handles, 0);
    }

    #[test]
    fn test_departure_of_untracked_device() {
        let bus = bus();
        let session = armed(&bus, TrackingMode::PerDevice);

        let event = session.handle_event(&C, HotplugEventKind::Left);
        assert_eq!(event.outcome, TransitionOutcome::NotTracked);
        assert_eq!(session.state(), SessionState::Armed);
        assert_eq!(session.counters().departures, 1);
        assert_eq!(bus.stats().closed, 0);
    }
}

// ============================================================================
// Single-slot tracking
// ============================================================================

mod single_slot {
    use super::*;

    #[test]
    fn test_departure_of_displaced_device_keeps_slot() {
        let bus = bus();
        let session = armed(&bus, TrackingMode::SingleSlot);

        session.handle_event(&A, HotplugEventKind::Arrived);
        session.handle_event(&B, HotplugEventKind::Arrived);
        let event = session.handle_event(&A, HotplugEventKind::Left);

        assert_eq!(event.outcome, TransitionOutcome::NotTracked);
        assert_eq!(session.tracked(), vec![B]);
        assert_eq!(session.displaced(), vec![A]);
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(bus.stats().closed, 0);

        session.shutdown();
        let stats = bus.stats();
        assert_eq!(stats.closed, 2);
        assert_eq!(stats.open_handles, 0);
    }

    #[test]
    fn test_departure_of_tracked_device_empties_slot() {
        let bus = bus();
        let session = armed(&bus, TrackingMode::SingleSlot);

        session.handle_event(&A, HotplugEventKind::Arrived);
        let event = session.handle_event(&A, HotplugEventKind::Left);

        assert_eq!(event.outcome, TransitionOutcome::Closed);
        assert_eq!(session.state(), SessionState::Armed);
        assert_eq!(bus.stats().closed, 1);
    }

    #[test]
    fn test_rearrival_of_tracked_device_is_not_a_displacement() {
        let bus = bus();
        let session = armed(&bus, TrackingMode::SingleSlot);

        session.handle_event(&A, HotplugEventKind::Arrived);
        let event = session.handle_event(&A, HotplugEventKind::Arrived);

        assert_eq!(event.outcome, TransitionOutcome::Opened { displaced: None });
        assert_eq!(session.tracked(), vec![A]);
        assert!(session.displaced().is_empty());
        let stats = bus.stats();
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.double_opens, 0);
        assert_eq!(stats.open_handles, 1);
    }

    #[test]
    fn test_rearrival_of_displaced_device_closes_its_old_handle() {
        let bus = bus();
        let session = armed(&bus, TrackingMode::SingleSlot);

        session.handle_event(&A, HotplugEventKind::Arrived);
        session.handle_event(&B, HotplugEventKind::Arrived);
        let event = session.handle_event(&A, HotplugEventKind::Arrived);

        assert_eq!(event.outcome, TransitionOutcome::Opened { displaced: Some(B) });
        assert_eq!(session.tracked(), vec![A]);
        assert_eq!(session.displaced(), vec![B]);
        let stats = bus.stats();
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.double_opens, 0);
        assert_eq!(stats.open_handles, 2);
    }

    #[test]
    fn test_displaced_handles_are_not_leasable() {
        let bus = bus();
        let session = armed(&bus, TrackingMode::SingleSlot);

        session.handle_event(&A, HotplugEventKind::Arrived);
        session.handle_event(&B, HotplugEventKind::Arrived);

        assert!(session.lease(A).is_none());
        assert!(session.lease(B).is_some());
    }
}

// ============================================================================
// Leases and concurrent readers
// ============================================================================

mod leases {
    use super::*;

    #[test]
    fn test_lease_outlives_departure() {
        let bus = bus();
        let session = armed(&bus, TrackingMode::PerDevice);
        session.handle_event(&A, HotplugEventKind::Arrived);

        let lease = session.lease(A).unwrap();
        session.handle_event(&A, HotplugEventKind::Left);

        // Departed device: no new leases, but the held one stays open
        assert!(session.lease(A).is_none());
        assert!(lease.is_revoked());
        assert_eq!(bus.stats().closed, 0);

        drop(lease);
        let stats = bus.stats();
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.invalid_closes, 0);
    }

    #[test]
    fn test_lease_in_flight_across_rearrival() {
        let bus = bus();
        let session = armed(&bus, TrackingMode::PerDevice);
        session.handle_event(&A, HotplugEventKind::Arrived);

        let old = session.lease(A).unwrap();
        session.handle_event(&A, HotplugEventKind::Arrived);

        // The old lease is refused further use; the new handle is leasable
        assert!(old.is_revoked());
        let new = session.lease(A).unwrap();
        assert!(!new.is_revoked());
        assert_eq!(bus.stats().closed, 0);

        drop(old);
        let stats = bus.stats();
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.open_handles, 1);
        assert_eq!(stats.invalid_closes, 0);
    }

    #[test]
    fn test_read_after_departure_is_refused() {
        let bus = bus();
        let session = armed(&bus, TrackingMode::PerDevice);
        session.handle_event(&A, HotplugEventKind::Arrived);
        session.handle_event(&A, HotplugEventKind::Left);

        assert!(session.read(A, 0x81, 8, &ReadOptions::default()).is_none());
        assert_eq!(bus.stats().reads_on_closed, 0);
        assert!(bus.read_calls().is_empty());
    }

    #[test]
    fn test_concurrent_readers_and_departure() {
        let bus = bus();
        let session = armed(&bus, TrackingMode::PerDevice);
        session.handle_event(&A, HotplugEventKind::Arrived);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let session = session.clone();
                thread::spawn(move || {
                    let mut outcomes = Vec::new();
                    for _ in 0..25 {
                        if let Some(outcome) = session.read(A, 0x81, 8, &ReadOptions::default()) {
                            outcomes.push(outcome);
                        }
                    }
                    outcomes
                })
            })
            .collect();

        session.handle_event(&A, HotplugEventKind::Left);

        for reader in readers {
            let outcomes = reader.join().unwrap();
            // Unscripted reads time out; none may hit a closed handle
            assert!(outcomes.iter().all(ReadOutcome::is_timeout));
        }

        let stats = bus.stats();
        assert_eq!(stats.reads_on_closed, 0);
        assert_eq!(stats.opened, stats.closed);
    }
}

// ============================================================================
// Event log and shutdown
// ============================================================================

#[test]
fn test_unknown_event_is_unhandled() {
    let bus = bus();
    let session = armed(&bus, TrackingMode::PerDevice);

    let event = session.handle_event(&A, HotplugEventKind::Other(0x10));
    assert_eq!(event.outcome, TransitionOutcome::Unhandled);
    assert_eq!(session.state(), SessionState::Armed);
    assert_eq!(session.counters().unhandled, 1);
    assert_eq!(bus.stats().opened, 0);
}

#[test]
fn test_event_log_sequence() {
    let bus = bus();
    let (publisher, stream) = create_event_channel(16);
    let session = SessionHandle::new(HotplugSession::new(
        bus.clone(),
        TrackingMode::PerDevice,
        Some(publisher),
    ));
    session.arm();

    session.handle_event(&A, HotplugEventKind::Arrived);
    session.handle_event(&C, HotplugEventKind::Arrived);
    session.handle_event(&A, HotplugEventKind::Left);
    session.handle_event(&C, HotplugEventKind::Left);
    session.shutdown();

    let events = stream.drain();
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
    let states: Vec<SessionState> = events.iter().map(|e| e.state).collect();
    assert_eq!(
        states,
        vec![
            SessionState::Active,
            SessionState::Active,
            SessionState::Active,
            SessionState::Armed
        ]
    );
    assert_eq!(events[1].identity.map(|i| i.vendor_id), Some(0x0781));
}

#[test]
fn test_shutdown_closes_everything_once() {
    let bus = bus();
    let session = armed(&bus, TrackingMode::PerDevice);
    session.handle_event(&A, HotplugEventKind::Arrived);
    session.handle_event(&B, HotplugEventKind::Arrived);

    session.shutdown();
    session.shutdown();

    let stats = bus.stats();
    assert_eq!(stats.opened, 2);
    assert_eq!(stats.closed, 2);
    assert_eq!(stats.invalid_closes, 0);

    let event = session.handle_event(&C, HotplugEventKind::Arrived);
    assert_eq!(event.outcome, TransitionOutcome::Ignored);
    assert_eq!(session.state(), SessionState::Shutdown);
}

#[test]
fn test_dropping_last_handle_shuts_down() {
    let bus = bus();
    let session = armed(&bus, TrackingMode::PerDevice);
    session.handle_event(&A, HotplugEventKind::Arrived);

    drop(session);
    assert_eq!(bus.stats().closed, 1);
}
