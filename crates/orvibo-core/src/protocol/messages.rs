//! Wire constants and command identifiers of the AllOne UDP protocol.
//!
//! Every packet starts with the same 6-byte header:
//!
//! ```text
//! [magic:2 = 68 64][total_len:2, big-endian][command:2]
//! ```
//!
//! `total_len` covers header and body.  Bodies frequently embed the device's
//! [`HardwareId`](crate::HardwareId), padded with ASCII spaces.

/// Magic bytes at the start of every packet (`"hd"`).
pub const MAGIC: [u8; 2] = [0x68, 0x64];

/// Size of the common header (magic + length + command).
pub const HEADER_SIZE: usize = 6;

/// UDP port every AllOne listens on, and the port the client binds locally.
pub const DEFAULT_PORT: u16 = 10000;

/// Default discovery target.
pub const DEFAULT_BROADCAST_ADDRESS: &str = "255.255.255.255";

/// Six ASCII spaces following the hardware id in command bodies.
pub const PADDING: [u8; 6] = [0x20; 6];

/// Vendor prefix used to locate the embedded hardware id inside a datagram.
pub const VENDOR_PREFIX: [u8; 2] = [0xAC, 0xCF];

// ── Discovery ─────────────────────────────────────────────────────────────────

/// Total length of the (body-less) discovery probe.
pub const DISCOVERY_PROBE_LEN: u16 = 0x0006;

/// Minimum length of a discovery reply worth parsing.
pub const DISCOVERY_REPLY_MIN_LEN: usize = 41;

/// Byte range of the hardware id inside a discovery reply.
pub const DISCOVERY_MAC_RANGE: std::ops::Range<usize> = 7..13;

/// Byte range of the little-endian device clock inside a discovery reply.
pub const DISCOVERY_TIME_RANGE: std::ops::Range<usize> = 37..41;

/// Type signature marking an AllOne (infrared blaster) in discovery replies.
pub const SIGNATURE_ALLONE: &[u8] = b"IRD";

/// Type signature marking an S20 socket in discovery replies.
pub const SIGNATURE_SOCKET: &[u8] = b"SOC";

/// Seconds between the device clock epoch (1900-01-01) and the Unix epoch.
pub const DEVICE_EPOCH_OFFSET_SECS: u64 = 2_208_988_800;

// ── Subscribe ─────────────────────────────────────────────────────────────────

/// Total length of the subscribe packet.
pub const SUBSCRIBE_LEN: u16 = 0x001E;

/// Minimum length of an acceptable subscribe reply.
pub const SUBSCRIBE_REPLY_MIN_LEN: usize = 13;

// ── Emit IR ───────────────────────────────────────────────────────────────────

/// Constant block following the padding in an emit body.
pub const EMIT_CONST: [u8; 4] = [0x65, 0x00, 0x00, 0x00];

/// Bytes preceding the raw code in an emit packet; also the emit length overhead.
pub const EMIT_OVERHEAD: usize = 26;

/// Minimum length of an acceptable emit acknowledgement.
pub const EMIT_REPLY_MIN_LEN: usize = 6;

// ── Learn IR ──────────────────────────────────────────────────────────────────

/// Fixed total length of the enter-learning packet and of an empty learn reply.
pub const LEARN_LEN: u16 = 0x0018;

/// Constant block closing the enter-learning body.
pub const LEARN_CONST: [u8; 6] = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Offset at which a captured code begins inside a learn reply.
pub const LEARN_CODE_OFFSET: usize = 26;

/// Seconds the device stays in learning mode after acknowledging the request.
pub const LEARN_WINDOW_SECS: u64 = 40;

/// Seconds a successful subscription stays valid.
pub const SUBSCRIPTION_VALIDITY_SECS: u64 = 60;

// ── Command identifiers ───────────────────────────────────────────────────────

/// Two-byte command identifier at offset 4..6 of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    /// `71 61` – broadcast probe and its replies.
    Discovery,
    /// `63 6c` – session subscription.
    Subscribe,
    /// `69 63` – emit an infrared code.
    EmitIr,
    /// `6c 73` – enter learning mode / report a captured code.
    LearnIr,
}

impl CommandId {
    /// Wire representation.
    pub const fn bytes(self) -> [u8; 2] {
        match self {
            CommandId::Discovery => [0x71, 0x61],
            CommandId::Subscribe => [0x63, 0x6C],
            CommandId::EmitIr => [0x69, 0x63],
            CommandId::LearnIr => [0x6C, 0x73],
        }
    }
}

impl TryFrom<[u8; 2]> for CommandId {
    type Error = ();

    fn try_from(value: [u8; 2]) -> Result<Self, ()> {
        match value {
            [0x71, 0x61] => Ok(CommandId::Discovery),
            [0x63, 0x6C] => Ok(CommandId::Subscribe),
            [0x69, 0x63] => Ok(CommandId::EmitIr),
            [0x6C, 0x73] => Ok(CommandId::LearnIr),
            _ => Err(()),
        }
    }
}
