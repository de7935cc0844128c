//! Boot-protocol HID report decoding
//!
//! Keyboard reports are `[modifiers, reserved, key0..key5]`; mouse reports
//! are `[buttons, dx, dy, wheel?]`.

use model::{ClassLabel, HidReport, KeyModifier, MouseButton, ProtocolLabel};

const KEYBOARD_MIN_LEN: usize = 3;
const KEYBOARD_REPORT_LEN: usize = 8;
const MOUSE_MIN_LEN: usize = 3;

const MODIFIER_BITS: [(u8, KeyModifier); 8] = [
    (1 << 0, KeyModifier::LeftCtrl),
    (1 << 1, KeyModifier::LeftShift),
    (1 << 2, KeyModifier::LeftAlt),
    (1 << 3, KeyModifier::LeftGui),
    (1 << 4, KeyModifier::RightCtrl),
    (1 << 5, KeyModifier::RightShift),
    (1 << 6, KeyModifier::RightAlt),
    (1 << 7, KeyModifier::RightGui),
];

const BUTTON_BITS: [(u8, MouseButton); 3] = [
    (1 << 0, MouseButton::Left),
    (1 << 1, MouseButton::Right),
    (1 << 2, MouseButton::Middle),
];

/// Decode a report read from an interface with the given labels
///
/// Returns `None` for non-HID interfaces, HID interfaces other than boot
/// keyboards and mice, and reports too short for their layout.
pub fn decode(class: ClassLabel, protocol: ProtocolLabel, data: &[u8]) -> Option<HidReport> {
    if class != ClassLabel::HumanInterfaceDevice {
        return None;
    }
    match protocol {
        ProtocolLabel::Keyboard => decode_keyboard(data),
        ProtocolLabel::Mouse => decode_mouse(data),
        ProtocolLabel::DontCare => None,
    }
}

pub fn decode_keyboard(data: &[u8]) -> Option<HidReport> {
    if data.len() < KEYBOARD_MIN_LEN {
        return None;
    }
    let modifiers = MODIFIER_BITS
        .iter()
        .filter(|(bit, _)| data[0] & bit != 0)
        .map(|(_, m)| *m)
        .collect();
    let end = data.len().min(KEYBOARD_REPORT_LEN);
    let keys = data[2..end].iter().copied().filter(|k| *k != 0).collect();
    Some(HidReport::Keyboard { modifiers, keys })
}

pub fn decode_mouse(data: &[u8]) -> Option<HidReport> {
    if data.len() < MOUSE_MIN_LEN {
        return None;
    }
    let buttons = BUTTON_BITS
        .iter()
        .filter(|(bit, _)| data[0] & bit != 0)
        .map(|(_, b)| *b)
        .collect();
    Some(HidReport::Mouse {
        buttons,
        dx: data[1] as i8,
        dy: data[2] as i8,
        wheel: data.get(3).map(|w| *w as i8),
    })
}
