//! Human-readable labels for interface classes and protocols
//!
//! Labels serialize as the same strings they display as, so a JSON report
//! reads the same as the text one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of an interface, derived from its class code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassLabel {
    #[serde(rename = "Audio")]
    Audio,
    #[serde(rename = "Communications")]
    Communications,
    #[serde(rename = "Human Interface Device")]
    HumanInterfaceDevice,
    #[serde(rename = "Don't Care")]
    DontCare,
}

impl ClassLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassLabel::Audio => "Audio",
            ClassLabel::Communications => "Communications",
            ClassLabel::HumanInterfaceDevice => "Human Interface Device",
            ClassLabel::DontCare => "Don't Care",
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-role of an interface within its class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolLabel {
    #[serde(rename = "Keyboard")]
    Keyboard,
    #[serde(rename = "Mouse")]
    Mouse,
    #[serde(rename = "Don't Care")]
    DontCare,
}

impl ProtocolLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolLabel::Keyboard => "Keyboard",
            ProtocolLabel::Mouse => "Mouse",
            ProtocolLabel::DontCare => "Don't Care",
        }
    }
}

impl fmt::Display for ProtocolLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyboard modifier keys, bit order of the boot report's first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyModifier {
    LeftCtrl,
    LeftShift,
    LeftAlt,
    LeftGui,
    RightCtrl,
    RightShift,
    RightAlt,
    RightGui,
}

/// Mouse buttons, bit order of the boot report's first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Boot-protocol view of a HID input report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HidReport {
    Keyboard {
        modifiers: Vec<KeyModifier>,
        /// Usage IDs of pressed keys, empty slots dropped
        keys: Vec<u8>,
    },
    Mouse {
        buttons: Vec<MouseButton>,
        dx: i8,
        dy: i8,
        wheel: Option<i8>,
    },
}
