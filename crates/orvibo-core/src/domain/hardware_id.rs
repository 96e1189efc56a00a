//! Six-byte device identifier ("MAC") carried in almost every AllOne packet.
//!
//! The protocol embeds the identifier in two orders: natural order in command
//! bodies, and byte-reversed order in the second half of the subscribe body.
//! [`HardwareId`] stores both so packet builders never need to reverse on the
//! hot path.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;

/// Number of bytes in a hardware id.
pub const HARDWARE_ID_LEN: usize = 6;

/// Immutable 6-byte device identifier.
///
/// Textual forms accepted by [`FromStr`]: `ac:cf:23:72:5a:50`,
/// `AC-CF-23-72-5A-50`, `ac cf 23 72 5a 50` and `accf23725a50`.
/// [`fmt::Display`] always renders the lowercase colon-separated form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareId {
    natural: [u8; HARDWARE_ID_LEN],
    reversed: [u8; HARDWARE_ID_LEN],
}

impl HardwareId {
    /// Builds an identifier from its natural byte order.
    pub fn new(bytes: [u8; HARDWARE_ID_LEN]) -> Self {
        let mut reversed = bytes;
        reversed.reverse();
        Self {
            natural: bytes,
            reversed,
        }
    }

    /// Builds an identifier from a slice that must be exactly six bytes long.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidHardwareId`] for any other length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let arr: [u8; HARDWARE_ID_LEN] = bytes.try_into().map_err(|_| {
            ProtocolError::InvalidHardwareId(format!(
                "expected {HARDWARE_ID_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::new(arr))
    }

    /// The identifier in natural (wire) order.
    pub fn as_bytes(&self) -> &[u8; HARDWARE_ID_LEN] {
        &self.natural
    }

    /// The identifier in byte-reversed order, as used by the subscribe body.
    pub fn reversed(&self) -> &[u8; HARDWARE_ID_LEN] {
        &self.reversed
    }

    /// Compact lowercase hex without separators (`accf23725a50`).
    pub fn to_hex(&self) -> String {
        hex::encode(self.natural)
    }
}

impl From<[u8; HARDWARE_ID_LEN]> for HardwareId {
    fn from(bytes: [u8; HARDWARE_ID_LEN]) -> Self {
        Self::new(bytes)
    }
}

impl FromStr for HardwareId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | ' '))
            .collect();
        let bytes = hex::decode(&compact)
            .map_err(|e| ProtocolError::InvalidHardwareId(format!("{s:?}: {e}")))?;
        Self::from_slice(&bytes).map_err(|_| {
            ProtocolError::InvalidHardwareId(format!(
                "{s:?}: expected {HARDWARE_ID_LEN} bytes, got {}",
                bytes.len()
            ))
        })
    }
}

impl TryFrom<String> for HardwareId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HardwareId> for String {
    fn from(id: HardwareId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.natural;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
