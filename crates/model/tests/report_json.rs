//! JSON shape of enumeration reports and session events
//!
//! Reports are the tool's output format, so the field names and label
//! strings here are what downstream scripts see.

use model::{
    ClassLabel, ConfigurationReport, DeviceAddress, DeviceDescriptorInfo, DeviceError,
    DeviceReport, DeviceStage, Direction, EndpointReport, HotplugEventKind, InterfaceReport,
    ProtocolLabel, ReadOutcome, SessionEvent, SessionState, TransferKind, TransitionOutcome,
};
use serde_json::{Value, json};

fn keyboard_report() -> DeviceReport {
    DeviceReport {
        address: DeviceAddress::new(1, 7),
        descriptor: Some(DeviceDescriptorInfo {
            vendor_id: 0x046d,
            product_id: 0xc31c,
            usb_version: 0x0110,
            class: 0,
            subclass: 0,
            protocol: 0,
            num_configurations: 1,
        }),
        opened: true,
        configurations: vec![ConfigurationReport {
            index: 0,
            value: 1,
            interfaces: vec![InterfaceReport {
                number: 0,
                class: 3,
                subclass: 1,
                protocol: 1,
                class_label: ClassLabel::HumanInterfaceDevice,
                protocol_label: ProtocolLabel::Keyboard,
                endpoints: vec![EndpointReport {
                    address: 0x81,
                    direction: Direction::In,
                    transfer_type: TransferKind::Interrupt,
                    max_packet_size: 8,
                    read: Some(ReadOutcome::Timeout),
                    decoded: None,
                }],
            }],
        }],
        errors: vec![],
    }
}

// ============================================================================
// Device reports
// ============================================================================

#[test]
fn test_labels_serialize_as_display_strings() {
    let value = serde_json::to_value(keyboard_report()).unwrap();
    let iface = &value["configurations"][0]["interfaces"][0];

    assert_eq!(iface["class_label"], json!("Human Interface Device"));
    assert_eq!(iface["protocol_label"], json!("Keyboard"));
}

#[test]
fn test_timeout_is_distinct_from_error() {
    let value = serde_json::to_value(keyboard_report()).unwrap();
    let read = &value["configurations"][0]["interfaces"][0]["endpoints"][0]["read"];

    assert_eq!(read, &json!("timeout"));
}

#[test]
fn test_decoded_omitted_when_absent() {
    let value = serde_json::to_value(keyboard_report()).unwrap();
    let endpoint = &value["configurations"][0]["interfaces"][0]["endpoints"][0];

    assert!(endpoint.get("decoded").is_none());
}

#[test]
fn test_report_round_trips() {
    let report = keyboard_report();
    let text = serde_json::to_string(&report).unwrap();
    let parsed: DeviceReport = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, report);
}

#[test]
fn test_failed_device_keeps_address_and_errors() {
    let mut report = DeviceReport::new(DeviceAddress::new(2, 3));
    report.errors.push(DeviceError {
        stage: DeviceStage::Descriptor,
        reason: "Input/Output Error".to_string(),
    });

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["address"], json!({ "bus": 2, "address": 3 }));
    assert_eq!(value["descriptor"], Value::Null);
    assert_eq!(value["errors"][0]["stage"], json!("descriptor"));
}

// ============================================================================
// Read outcomes and events
// ============================================================================

#[test]
fn test_read_outcome_ok_carries_bytes() {
    let value = serde_json::to_value(ReadOutcome::ok(vec![1, 2, 3])).unwrap();
    assert_eq!(value["ok"]["bytes_transferred"], json!(3));
    assert_eq!(value["ok"]["data"], json!([1, 2, 3]));
}

#[test]
fn test_session_event_json() {
    let event = SessionEvent {
        sequence: 1,
        device: DeviceAddress::new(1, 9),
        identity: None,
        kind: HotplugEventKind::Arrived,
        outcome: TransitionOutcome::Opened { displaced: None },
        state: SessionState::Active,
        tracked: 1,
    };

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["kind"], json!("arrived"));
    assert_eq!(value["state"], json!("active"));
    assert_eq!(value["outcome"], json!({ "opened": { "displaced": null } }));
}
