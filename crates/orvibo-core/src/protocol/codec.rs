//! Packet builders and reply parsers for the AllOne UDP protocol.
//!
//! Wire format:
//! ```text
//! [magic:2][total_len:2][command:2][body:N]
//! ```
//! `total_len` is big-endian and covers the header.  Values inside emit
//! bodies (nonce, code length) are little-endian.
//!
//! The reply predicates (`is_*_reply`) are the shape checks used by the
//! exchange classifiers: command id, length floor and embedded hardware id.
//! They never fail; a mismatch simply means "not the datagram we wait for".

use std::net::SocketAddr;

use thiserror::Error;
use tracing::trace;

use crate::domain::device::{DeviceDescriptor, DeviceKind, DeviceTime};
use crate::domain::hardware_id::{HardwareId, HARDWARE_ID_LEN};
use crate::protocol::messages::{
    CommandId, DISCOVERY_MAC_RANGE, DISCOVERY_PROBE_LEN, DISCOVERY_REPLY_MIN_LEN,
    DISCOVERY_TIME_RANGE, EMIT_CONST, EMIT_OVERHEAD, EMIT_REPLY_MIN_LEN, HEADER_SIZE, LEARN_CONST,
    LEARN_CODE_OFFSET, LEARN_LEN, MAGIC, PADDING, SUBSCRIBE_LEN, SUBSCRIBE_REPLY_MIN_LEN,
    VENDOR_PREFIX,
};

/// Errors produced while building or parsing packets.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the layout requires.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The packet does not start with the `68 64` magic.
    #[error("bad magic: {0:02X?}")]
    BadMagic([u8; 2]),

    /// The command id is not the one the parser expects.
    #[error("unexpected command id {found:02X?}, expected {expected:02X?}")]
    UnexpectedCommand { expected: [u8; 2], found: [u8; 2] },

    /// A discovery reply carries neither known type signature.
    #[error("unknown device kind")]
    UnknownDeviceKind,

    /// An IR code does not fit the 16-bit length fields.
    #[error("IR code of {len} bytes exceeds the maximum of {max}")]
    CodeTooLong { len: usize, max: usize },

    /// A hardware id could not be parsed.
    #[error("invalid hardware id: {0}")]
    InvalidHardwareId(String),
}

/// Largest IR code whose packet length still fits the 16-bit length field.
pub const MAX_CODE_LEN: usize = u16::MAX as usize - EMIT_OVERHEAD;

/// Decoded common header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Declared total length (header + body).
    pub total_len: u16,
    /// Raw command id bytes.
    pub command: [u8; 2],
}

impl PacketHeader {
    /// The command id, if it is one this crate knows.
    pub fn command_id(&self) -> Option<CommandId> {
        CommandId::try_from(self.command).ok()
    }
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// Prepends magic, big-endian total length and command id to `body`.
///
/// Every outbound packet is framed here.
///
/// # Errors
///
/// Returns [`ProtocolError::CodeTooLong`] if the packet would exceed 65535 bytes.
pub fn encode_header(command: CommandId, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let total_len = u16::try_from(HEADER_SIZE + body.len()).map_err(|_| {
        ProtocolError::CodeTooLong {
            len: body.len(),
            max: u16::MAX as usize - HEADER_SIZE,
        }
    })?;
    Ok(frame(command, total_len, body))
}

/// Framing for bodies whose length is a protocol constant.
fn frame(command: CommandId, total_len: u16, body: &[u8]) -> Vec<u8> {
    debug_assert_eq!(HEADER_SIZE + body.len(), usize::from(total_len));
    let mut buf = Vec::with_capacity(usize::from(total_len));
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&total_len.to_be_bytes());
    buf.extend_from_slice(&command.bytes());
    buf.extend_from_slice(body);
    buf
}

/// Decodes the 6-byte header at the start of `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] for short input and
/// [`ProtocolError::BadMagic`] when the magic does not match.
pub fn decode_header(bytes: &[u8]) -> Result<PacketHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }
    let magic = [bytes[0], bytes[1]];
    if magic != MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }
    Ok(PacketHeader {
        total_len: u16::from_be_bytes([bytes[2], bytes[3]]),
        command: [bytes[4], bytes[5]],
    })
}

// ── Packet builders ───────────────────────────────────────────────────────────

/// The fixed broadcast discovery probe (`68 64 00 06 71 61`).
pub fn discovery_probe() -> Vec<u8> {
    frame(CommandId::Discovery, DISCOVERY_PROBE_LEN, &[])
}

/// `mac + padding`, the prefix of every addressed body.
fn addressed_body(id: &HardwareId, capacity: usize) -> Vec<u8> {
    let mut body = Vec::with_capacity(capacity);
    body.extend_from_slice(id.as_bytes());
    body.extend_from_slice(&PADDING);
    body
}

/// Subscribe: `mac + padding + reversed mac + padding`.
pub fn subscribe_packet(id: &HardwareId) -> Vec<u8> {
    let mut body = addressed_body(id, usize::from(SUBSCRIBE_LEN) - HEADER_SIZE);
    body.extend_from_slice(id.reversed());
    body.extend_from_slice(&PADDING);
    frame(CommandId::Subscribe, SUBSCRIBE_LEN, &body)
}

/// Emit: `mac + padding + const + nonce(LE) + code_len(LE) + code`.
///
/// # Errors
///
/// Returns [`ProtocolError::CodeTooLong`] when `code` exceeds [`MAX_CODE_LEN`].
pub fn emit_ir_packet(id: &HardwareId, nonce: u16, code: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let code_len = u16::try_from(code.len())
        .ok()
        .filter(|_| code.len() <= MAX_CODE_LEN)
        .ok_or(ProtocolError::CodeTooLong {
            len: code.len(),
            max: MAX_CODE_LEN,
        })?;

    let mut body = addressed_body(id, EMIT_OVERHEAD - HEADER_SIZE + code.len());
    body.extend_from_slice(&EMIT_CONST);
    body.extend_from_slice(&nonce.to_le_bytes());
    body.extend_from_slice(&code_len.to_le_bytes());
    body.extend_from_slice(code);
    encode_header(CommandId::EmitIr, &body)
}

/// Enter learning mode: `mac + padding + 01 00 00 00 00 00`.
pub fn learn_packet(id: &HardwareId) -> Vec<u8> {
    let mut body = addressed_body(id, usize::from(LEARN_LEN) - HEADER_SIZE);
    body.extend_from_slice(&LEARN_CONST);
    frame(CommandId::LearnIr, LEARN_LEN, &body)
}

// ── Reply inspection ──────────────────────────────────────────────────────────

/// Locates the embedded hardware id by scanning for the vendor prefix.
///
/// Returns the first six bytes starting at the first `AC CF` occurrence, or
/// `None` if the prefix is absent or too close to the end of the datagram.
pub fn find_hardware_id(datagram: &[u8]) -> Option<&[u8]> {
    let idx = datagram
        .windows(VENDOR_PREFIX.len())
        .position(|w| w == VENDOR_PREFIX)?;
    datagram.get(idx..idx + HARDWARE_ID_LEN)
}

/// `true` when the hardware id embedded in `datagram` equals `id`.
pub fn matches_hardware_id(datagram: &[u8], id: &HardwareId) -> bool {
    find_hardware_id(datagram).is_some_and(|found| found == id.as_bytes())
}

fn command_at(datagram: &[u8]) -> Option<[u8; 2]> {
    datagram.get(4..6).map(|c| [c[0], c[1]])
}

fn length_field(datagram: &[u8]) -> Option<u16> {
    datagram.get(2..4).map(|l| u16::from_be_bytes([l[0], l[1]]))
}

fn has_command(datagram: &[u8], command: CommandId) -> bool {
    command_at(datagram) == Some(command.bytes())
}

/// A discovery reply long enough to parse.
pub fn is_discovery_reply(datagram: &[u8]) -> bool {
    datagram.len() >= DISCOVERY_REPLY_MIN_LEN && has_command(datagram, CommandId::Discovery)
}

/// A subscribe acknowledgement from the device `id`.
pub fn is_subscribe_reply(datagram: &[u8], id: &HardwareId) -> bool {
    datagram.len() >= SUBSCRIBE_REPLY_MIN_LEN
        && has_command(datagram, CommandId::Subscribe)
        && matches_hardware_id(datagram, id)
}

/// An emit acknowledgement from the device `id`.
pub fn is_emit_reply(datagram: &[u8], id: &HardwareId) -> bool {
    datagram.len() >= EMIT_REPLY_MIN_LEN
        && has_command(datagram, CommandId::EmitIr)
        && matches_hardware_id(datagram, id)
}

/// The acknowledgement of an enter-learning request: length field equals
/// [`LEARN_LEN`] exactly.
pub fn is_learn_ack(datagram: &[u8], id: &HardwareId) -> bool {
    datagram.len() >= HEADER_SIZE
        && has_command(datagram, CommandId::LearnIr)
        && length_field(datagram) == Some(LEARN_LEN)
        && matches_hardware_id(datagram, id)
}

/// A learn report that carries captured IR data: length field strictly
/// greater than [`LEARN_LEN`].
pub fn is_learn_capture(datagram: &[u8], id: &HardwareId) -> bool {
    datagram.len() >= HEADER_SIZE
        && has_command(datagram, CommandId::LearnIr)
        && length_field(datagram).is_some_and(|len| len > LEARN_LEN)
        && matches_hardware_id(datagram, id)
}

/// Strips the 26-byte code header from an emit packet or a learn capture.
///
/// Returns `None` unless the datagram is strictly longer than the header.
pub fn code_payload(datagram: &[u8]) -> Option<&[u8]> {
    if datagram.len() > LEARN_CODE_OFFSET {
        Some(&datagram[LEARN_CODE_OFFSET..])
    } else {
        None
    }
}

/// Parses a discovery reply into a [`DeviceDescriptor`].
///
/// # Errors
///
/// - [`ProtocolError::InsufficientData`] if shorter than 41 bytes.
/// - [`ProtocolError::UnexpectedCommand`] if not a discovery reply.
/// - [`ProtocolError::UnknownDeviceKind`] if no type signature is present.
pub fn parse_discovery_reply(
    datagram: &[u8],
    from: SocketAddr,
) -> Result<DeviceDescriptor, ProtocolError> {
    if datagram.len() < DISCOVERY_REPLY_MIN_LEN {
        return Err(ProtocolError::InsufficientData {
            needed: DISCOVERY_REPLY_MIN_LEN,
            available: datagram.len(),
        });
    }
    let found = [datagram[4], datagram[5]];
    if found != CommandId::Discovery.bytes() {
        return Err(ProtocolError::UnexpectedCommand {
            expected: CommandId::Discovery.bytes(),
            found,
        });
    }

    let kind = DeviceKind::classify(datagram).ok_or(ProtocolError::UnknownDeviceKind)?;
    let hardware_id = HardwareId::from_slice(&datagram[DISCOVERY_MAC_RANGE])?;
    let t = &datagram[DISCOVERY_TIME_RANGE];
    let device_time = DeviceTime(u32::from_le_bytes([t[0], t[1], t[2], t[3]]));
    trace!(%from, ?kind, mac = %hardware_id, "parsed discovery reply");

    Ok(DeviceDescriptor {
        address: from,
        kind,
        hardware_id,
        device_time,
        raw: datagram.to_vec(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
