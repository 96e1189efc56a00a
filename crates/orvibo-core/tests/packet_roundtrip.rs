//! Integration tests for the orvibo-core packet layer.
//!
//! These exercise the public API the way `orvibo-remote` uses it: build an
//! outbound packet, then run the same reply predicates and header-strip logic
//! the exchange classifiers rely on.

use orvibo_core::protocol::{
    code_payload, decode_header, emit_ir_packet, is_emit_reply, is_learn_ack, is_learn_capture,
    learn_packet, matches_hardware_id, subscribe_packet, EMIT_OVERHEAD, LEARN_LEN,
};
use orvibo_core::{CommandId, HardwareId};

fn device() -> HardwareId {
    "AC:CF:23:72:5A:50".parse().expect("valid mac")
}

#[test]
fn test_emit_then_strip_recovers_code() {
    // Arrange
    let code = vec![0x00, 0x11, 0x22];

    // Act
    let packet = emit_ir_packet(&device(), 0x1234, &code).expect("encode");
    let header = decode_header(&packet).expect("header");

    // Assert
    assert_eq!(packet.len(), EMIT_OVERHEAD + code.len());
    assert_eq!(header.total_len, 0x001D);
    assert_eq!(header.command_id(), Some(CommandId::EmitIr));
    assert_eq!(code_payload(&packet), Some(code.as_slice()));
}

#[test]
fn test_emit_with_empty_code_has_no_payload() {
    let packet = emit_ir_packet(&device(), 0, &[]).expect("encode");
    assert_eq!(packet.len(), EMIT_OVERHEAD);
    assert_eq!(code_payload(&packet), None);
}

#[test]
fn test_every_outbound_packet_embeds_the_hardware_id() {
    let id = device();
    let packets = [
        subscribe_packet(&id),
        emit_ir_packet(&id, 1, &[1, 2, 3]).expect("encode"),
        learn_packet(&id),
    ];
    for packet in &packets {
        assert!(matches_hardware_id(packet, &id));
    }
}

#[test]
fn test_hardware_id_match_is_exclusive_across_a_range_of_ids() {
    for last in 0u8..=255 {
        let id = HardwareId::new([0xAC, 0xCF, 0x23, 0x72, 0x5A, last]);
        let other = HardwareId::new([0xAC, 0xCF, 0x23, 0x72, 0x5A, last.wrapping_add(1)]);
        let packet = subscribe_packet(&id);
        assert!(matches_hardware_id(&packet, &id));
        assert!(!matches_hardware_id(&packet, &other));
    }
}

#[test]
fn test_emit_reply_scenario_from_device() {
    // 68 64 00 0d 69 63 <mac> 00 – a 13-byte acknowledgement
    let mut reply = vec![0x68, 0x64, 0x00, 0x0D, 0x69, 0x63];
    reply.extend_from_slice(device().as_bytes());
    reply.push(0x00);

    assert!(is_emit_reply(&reply, &device()));
}

#[test]
fn test_learn_reply_at_fixed_length_means_no_key_yet() {
    let ack = learn_packet(&device());
    assert_eq!(decode_header(&ack).expect("header").total_len, LEARN_LEN);
    assert!(is_learn_ack(&ack, &device()));
    assert!(!is_learn_capture(&ack, &device()));
}

#[test]
fn test_learn_reply_above_fixed_length_carries_code_after_offset_26() {
    // Arrange: 24-byte learn frame, 2 bytes of device framing, then the code.
    let code = [0x26, 0x00, 0xCA, 0x00, 0x00, 0x01];
    let mut reply = learn_packet(&device());
    reply.extend_from_slice(&[0x00, 0x00]);
    reply.extend_from_slice(&code);
    let total = reply.len() as u16;
    reply[2..4].copy_from_slice(&total.to_be_bytes());

    // Act / Assert
    assert!(is_learn_capture(&reply, &device()));
    assert_eq!(code_payload(&reply), Some(&code[..]));
}
