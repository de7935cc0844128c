//! Hotplug session event log types

use crate::types::{DeviceAddress, DeviceIdentity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of hotplug notification delivered by the USB access layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotplugEventKind {
    Arrived,
    Left,
    /// Any event code the session does not handle
    Other(u8),
}

/// Hotplug session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, callback not registered yet
    Idle,
    /// Callback registered, no handle tracked
    Armed,
    /// At least one device handle open
    Active,
    /// Callback deregistered and handles closed
    Shutdown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Armed => "armed",
            SessionState::Active => "active",
            SessionState::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// What a hotplug event did to the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// A handle was opened and is now tracked. In single-slot mode the
    /// previously tracked device, if any, is reported as displaced.
    Opened { displaced: Option<DeviceAddress> },
    /// Arrival seen but the device could not be opened
    OpenFailed { reason: String },
    /// The tracked handle for the departing device was released
    Closed,
    /// Departure of a device with no tracked handle
    NotTracked,
    /// Event kind the session does not handle
    Unhandled,
    /// Event delivered while the session was not armed
    Ignored,
}

/// One entry of the hotplug event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Position of this event in the session, starting at 1
    pub sequence: u64,
    pub device: DeviceAddress,
    /// None when the descriptor could not be read
    pub identity: Option<DeviceIdentity>,
    pub kind: HotplugEventKind,
    pub outcome: TransitionOutcome,
    /// Session state after the transition
    pub state: SessionState,
    /// Number of handles tracked after the transition
    pub tracked: usize,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identity {
            Some(identity) => write!(f, "#{} {} {:?}", self.sequence, identity, self.kind)?,
            None => write!(f, "#{} {} {:?}", self.sequence, self.device, self.kind)?,
        }
        write!(
            f,
            " -> {:?}, state {}, {} tracked",
            self.outcome, self.state, self.tracked
        )
    }
}
