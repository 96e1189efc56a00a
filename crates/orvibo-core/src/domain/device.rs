//! Device classification and the descriptor produced by discovery.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::domain::hardware_id::HardwareId;
use crate::protocol::messages::{DEVICE_EPOCH_OFFSET_SECS, SIGNATURE_ALLONE, SIGNATURE_SOCKET};

/// Kind of Orvibo device, recognised by a type signature in discovery replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// AllOne infrared blaster (`IRD`).
    AllOne,
    /// S20 smart socket (`SOC`). Classified only; no control operations.
    Socket,
}

impl DeviceKind {
    /// The signature substring identifying this kind.
    pub const fn signature(self) -> &'static [u8] {
        match self {
            DeviceKind::AllOne => SIGNATURE_ALLONE,
            DeviceKind::Socket => SIGNATURE_SOCKET,
        }
    }

    /// Finds the first known signature in `payload`.
    ///
    /// AllOne is checked first, so a payload carrying both signatures is
    /// classified as an AllOne.
    pub fn classify(payload: &[u8]) -> Option<Self> {
        [DeviceKind::AllOne, DeviceKind::Socket]
            .into_iter()
            .find(|kind| contains(payload, kind.signature()))
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::AllOne => f.write_str("allone"),
            DeviceKind::Socket => f.write_str("socket"),
        }
    }
}

/// Raw device clock value as reported in a discovery reply.
///
/// The device counts seconds since 1900-01-01 (NTP era 0).  The raw value is
/// what gets stored; [`DeviceTime::to_system_time`] is the only conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceTime(pub u32);

impl DeviceTime {
    /// Converts to wall-clock time, or `None` when the value predates 1970.
    pub fn to_system_time(self) -> Option<SystemTime> {
        let unix_secs = u64::from(self.0).checked_sub(DEVICE_EPOCH_OFFSET_SECS)?;
        UNIX_EPOCH.checked_add(Duration::from_secs(unix_secs))
    }
}

impl fmt::Display for DeviceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_system_time() {
            Some(t) => {
                let secs = t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
                write!(f, "unix:{secs}")
            }
            None => write!(f, "raw:{}", self.0),
        }
    }
}

/// A device that answered a discovery probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Source address of the reply.
    pub address: SocketAddr,
    /// Kind recognised from the type signature.
    pub kind: DeviceKind,
    /// Hardware id read from bytes 7..13 of the reply.
    pub hardware_id: HardwareId,
    /// Device clock read from bytes 37..41 (little-endian).
    pub device_time: DeviceTime,
    /// Complete reply datagram.
    pub raw: Vec<u8>,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {}",
            self.address, self.kind, self.hardware_id, self.device_time
        )
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_recognises_allone_signature() {
        assert_eq!(DeviceKind::classify(b"xxIRDxx"), Some(DeviceKind::AllOne));
    }

    #[test]
    fn test_classify_recognises_socket_signature() {
        assert_eq!(DeviceKind::classify(b"..SOC.."), Some(DeviceKind::Socket));
    }

    #[test]
    fn test_classify_returns_none_without_signature() {
        assert_eq!(DeviceKind::classify(b"nothing here"), None);
    }

    #[test]
    fn test_device_time_subtracts_ntp_offset() {
        // 2019-04-25 00:00:00 UTC
        let unix = 1_556_150_400u64;
        let raw = DeviceTime((unix + DEVICE_EPOCH_OFFSET_SECS) as u32);

        let converted = raw.to_system_time().expect("after 1970");

        assert_eq!(converted, UNIX_EPOCH + Duration::from_secs(unix));
    }

    #[test]
    fn test_device_time_before_unix_epoch_is_none() {
        assert_eq!(DeviceTime(1_000).to_system_time(), None);
        assert_eq!(DeviceTime(1_000).to_string(), "raw:1000");
    }
}
