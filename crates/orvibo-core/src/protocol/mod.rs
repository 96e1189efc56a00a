//! Protocol constants, packet builders and reply parsers.

pub mod codec;
pub mod messages;

pub use codec::{
    code_payload, decode_header, discovery_probe, emit_ir_packet, encode_header,
    find_hardware_id, is_discovery_reply, is_emit_reply, is_learn_ack, is_learn_capture,
    is_subscribe_reply, learn_packet, matches_hardware_id, parse_discovery_reply,
    subscribe_packet, PacketHeader, ProtocolError, MAX_CODE_LEN,
};
pub use messages::*;
