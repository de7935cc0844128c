//! Interface classification
//!
//! Maps raw interface class/protocol codes to labels through a lookup table
//! keyed by class code. Only classes whose sub-role depends on the protocol
//! carry a secondary protocol table. Unknown codes fall through to
//! "Don't Care"; nothing here can fail.

use model::{ClassLabel, ProtocolLabel};

/// Row of the class table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassEntry {
    pub code: u8,
    /// USB-IF class name, reported even for classes without a label yet
    pub name: &'static str,
    pub label: ClassLabel,
    /// Protocol disambiguation; empty means every protocol is "Don't Care"
    pub protocols: &'static [(u8, ProtocolLabel)],
}

pub const CLASS_AUDIO: u8 = 0x01;
pub const CLASS_COMMUNICATIONS: u8 = 0x02;
pub const CLASS_HID: u8 = 0x03;

pub const HID_PROTOCOL_KEYBOARD: u8 = 0x01;
pub const HID_PROTOCOL_MOUSE: u8 = 0x02;

const HID_PROTOCOLS: &[(u8, ProtocolLabel)] = &[
    (HID_PROTOCOL_KEYBOARD, ProtocolLabel::Keyboard),
    (HID_PROTOCOL_MOUSE, ProtocolLabel::Mouse),
];

const fn entry(code: u8, name: &'static str, label: ClassLabel) -> ClassEntry {
    ClassEntry {
        code,
        name,
        label,
        protocols: &[],
    }
}

/// Interface class table
///
/// Reserved rows are named but still labelled "Don't Care"; giving one a
/// label is a one-line change here.
pub const CLASS_TABLE: &[ClassEntry] = &[
    entry(CLASS_AUDIO, "Audio", ClassLabel::Audio),
    entry(CLASS_COMMUNICATIONS, "Communications", ClassLabel::Communications),
    ClassEntry {
        code: CLASS_HID,
        name: "Human Interface Device",
        label: ClassLabel::HumanInterfaceDevice,
        protocols: HID_PROTOCOLS,
    },
    entry(0x05, "Physical", ClassLabel::DontCare),
    entry(0x06, "Image", ClassLabel::DontCare),
    entry(0x07, "Printer", ClassLabel::DontCare),
    entry(0x08, "Mass Storage", ClassLabel::DontCare),
    entry(0x09, "Hub", ClassLabel::DontCare),
    entry(0x0A, "CDC-Data", ClassLabel::DontCare),
    entry(0x0B, "Smart Card", ClassLabel::DontCare),
    entry(0x0D, "Content Security", ClassLabel::DontCare),
    entry(0x0E, "Video", ClassLabel::DontCare),
    entry(0x0F, "Personal Healthcare", ClassLabel::DontCare),
];

/// Table row for a class code, if the class is known
pub fn class_entry(class: u8) -> Option<&'static ClassEntry> {
    CLASS_TABLE.iter().find(|e| e.code == class)
}

/// Classify an interface by its class and protocol codes
pub fn classify(class: u8, protocol: u8) -> (ClassLabel, ProtocolLabel) {
    match class_entry(class) {
        Some(entry) => {
            let protocol_label = entry
                .protocols
                .iter()
                .find(|(code, _)| *code == protocol)
                .map(|(_, label)| *label)
                .unwrap_or(ProtocolLabel::DontCare);
            (entry.label, protocol_label)
        }
        None => (ClassLabel::DontCare, ProtocolLabel::DontCare),
    }
}
