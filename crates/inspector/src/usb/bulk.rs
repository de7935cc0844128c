//! Single-shot bulk IN reads
//!
//! One call is one transfer attempt with a buffer sized to the endpoint's
//! max packet size. Every failure is folded into [`ReadOutcome`]; nothing
//! here returns an error to the caller.

use common::UsbBackend;
use model::{Direction, ReadOutcome, UsbError, endpoint_direction};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for a single bulk read
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Largest packet size a descriptor may legitimately report
pub const MAX_PACKET_SIZE: u16 = 1024;

/// What to do with a descriptor reporting a packet size above [`MAX_PACKET_SIZE`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketSizePolicy {
    /// Read at most [`MAX_PACKET_SIZE`] bytes
    #[default]
    Clamp,
    /// Refuse to read the endpoint
    Reject,
}

impl PacketSizePolicy {
    /// Buffer length to use for `max_packet_size`, or `None` if rejected
    pub fn bound(self, max_packet_size: u16) -> Option<usize> {
        if max_packet_size <= MAX_PACKET_SIZE {
            return Some(max_packet_size as usize);
        }
        match self {
            PacketSizePolicy::Clamp => Some(MAX_PACKET_SIZE as usize),
            PacketSizePolicy::Reject => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    pub timeout: Duration,
    pub policy: PacketSizePolicy,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_READ_TIMEOUT,
            policy: PacketSizePolicy::default(),
        }
    }
}

/// Read one packet from a bulk IN endpoint
pub fn read_endpoint<B: UsbBackend>(
    backend: &B,
    handle: &B::Handle,
    endpoint: u8,
    max_packet_size: u16,
    options: &ReadOptions,
) -> ReadOutcome {
    if endpoint_direction(endpoint) == Direction::Out {
        return ReadOutcome::error(format!("endpoint {:#04x} is not an IN endpoint", endpoint));
    }

    let Some(len) = options.policy.bound(max_packet_size) else {
        warn!(
            "Endpoint {:#04x} reports max packet size {} above {}, not reading",
            endpoint, max_packet_size, MAX_PACKET_SIZE
        );
        return ReadOutcome::error(format!(
            "max packet size {} exceeds {} bytes",
            max_packet_size, MAX_PACKET_SIZE
        ));
    };

    debug!(
        "Bulk read: endpoint={:#04x}, len={}, timeout={}ms",
        endpoint,
        len,
        options.timeout.as_millis()
    );

    let mut buffer = vec![0u8; len];
    match backend.read_bulk(handle, endpoint, &mut buffer, options.timeout) {
        Ok(n) => {
            buffer.truncate(n);
            ReadOutcome::ok(buffer)
        }
        Err(UsbError::Timeout) => {
            debug!("Bulk read timed out on endpoint {:#04x}", endpoint);
            ReadOutcome::Timeout
        }
        Err(e) => {
            warn!("Bulk read failed on endpoint {:#04x}: {}", endpoint, e);
            ReadOutcome::error(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{FakeBus, FakeHandle, create_mock_mass_storage};
    use model::DeviceAddress;

    const DEVICE: DeviceAddress = DeviceAddress { bus: 1, address: 2 };

    fn open(bus: &FakeBus) -> FakeHandle {
        bus.open(&DEVICE).unwrap()
    }

    #[test]
    fn test_full_packet() {
        let bus = FakeBus::with_devices(vec![
            create_mock_mass_storage(1, 2).with_read(0x81, Ok(vec![0xAB; 512])),
        ]);
        let handle = open(&bus);

        let outcome = read_endpoint(&bus, &handle, 0x81, 512, &ReadOptions::default());
        assert_eq!(outcome, ReadOutcome::ok(vec![0xAB; 512]));
        assert_eq!(bus.read_calls()[0].buffer_len, 512);
        assert_eq!(bus.read_calls()[0].timeout, DEFAULT_READ_TIMEOUT);
        bus.close(handle);
    }

    #[test]
    fn test_short_packet_truncated() {
        let bus = FakeBus::with_devices(vec![
            create_mock_mass_storage(1, 2).with_read(0x81, Ok(vec![1, 2, 3])),
        ]);
        let handle = open(&bus);

        let outcome = read_endpoint(&bus, &handle, 0x81, 512, &ReadOptions::default());
        match outcome {
            ReadOutcome::Ok {
                bytes_transferred,
                data,
            } => {
                assert_eq!(bytes_transferred, 3);
                assert_eq!(data, vec![1, 2, 3]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        bus.close(handle);
    }

    #[test]
    fn test_timeout_is_not_an_error() {
        let bus = FakeBus::with_devices(vec![create_mock_mass_storage(1, 2)]);
        let handle = open(&bus);

        let outcome = read_endpoint(&bus, &handle, 0x81, 512, &ReadOptions::default());
        assert!(outcome.is_timeout());
        bus.close(handle);
    }

    #[test]
    fn test_transfer_error_carries_reason() {
        let bus = FakeBus::with_devices(vec![
            create_mock_mass_storage(1, 2).with_read(0x81, Err(UsbError::Pipe)),
        ]);
        let handle = open(&bus);

        let outcome = read_endpoint(&bus, &handle, 0x81, 512, &ReadOptions::default());
        assert_eq!(outcome, ReadOutcome::error(UsbError::Pipe.to_string()));
        bus.close(handle);
    }

    #[test]
    fn test_out_endpoint_not_read() {
        let bus = FakeBus::with_devices(vec![create_mock_mass_storage(1, 2)]);
        let handle = open(&bus);

        let outcome = read_endpoint(&bus, &handle, 0x02, 512, &ReadOptions::default());
        assert!(matches!(outcome, ReadOutcome::Error { .. }));
        assert!(bus.read_calls().is_empty());
        bus.close(handle);
    }

    #[test]
    fn test_zero_packet_size() {
        let bus = FakeBus::with_devices(vec![
            create_mock_mass_storage(1, 2).with_read(0x81, Ok(Vec::new())),
        ]);
        let handle = open(&bus);

        let outcome = read_endpoint(&bus, &handle, 0x81, 0, &ReadOptions::default());
        assert_eq!(outcome, ReadOutcome::ok(Vec::new()));
        assert_eq!(bus.read_calls()[0].buffer_len, 0);
        bus.close(handle);
    }

    #[test]
    fn test_oversize_clamped_or_rejected() {
        let bus = FakeBus::with_devices(vec![create_mock_mass_storage(1, 2)]);
        let handle = open(&bus);

        read_endpoint(&bus, &handle, 0x81, u16::MAX, &ReadOptions::default());
        assert_eq!(bus.read_calls()[0].buffer_len, MAX_PACKET_SIZE as usize);

        let reject = ReadOptions {
            policy: PacketSizePolicy::Reject,
            ..Default::default()
        };
        let outcome = read_endpoint(&bus, &handle, 0x81, 4096, &reject);
        assert!(matches!(outcome, ReadOutcome::Error { .. }));
        assert_eq!(bus.read_calls().len(), 1);
        bus.close(handle);
    }

    #[test]
    fn test_policy_bound() {
        assert_eq!(PacketSizePolicy::Clamp.bound(64), Some(64));
        assert_eq!(PacketSizePolicy::Reject.bound(1024), Some(1024));
        assert_eq!(PacketSizePolicy::Clamp.bound(1025), Some(1024));
        assert_eq!(PacketSizePolicy::Reject.bound(1025), None);
    }
}
