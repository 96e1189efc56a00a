//! UDP broadcast-based device discovery.
//!
//! # How discovery works (for beginners)
//!
//! 1. The client broadcasts the 6-byte probe `68 64 00 06 71 61` to port
//!    10000 (or unicasts it to one host).
//!
//! 2. Every Orvibo device on the LAN answers with a reply of at least 41
//!    bytes carrying its hardware id, a type signature (`IRD` for AllOne,
//!    `SOC` for S20 sockets) and its clock.
//!
//! 3. The exchange collects every reply until the attempt budget runs out.
//!    Replies are keyed by `"host:port"`; when one device answers twice the
//!    later reply wins.
//!
//! Replies without a known signature are logged and skipped.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use orvibo_core::protocol::{
    discovery_probe, is_discovery_reply, parse_discovery_reply, DEFAULT_PORT,
};
use orvibo_core::{DeviceDescriptor, DeviceKind, ProtocolError};
use tracing::{debug, info, warn};

use super::connection_manager::ConnectionManager;
use super::endpoint::Datagram;
use super::exchange::{Decision, ExchangeRequest, DEFAULT_RETRIES};

/// Default collection window of a discovery probe.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where and how long to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Broadcast address, or a single device host for a unicast probe.
    pub target: IpAddr,
    pub port: u16,
    /// Per-attempt collection window.
    pub timeout: Duration,
    pub retries: u32,
    /// `true` to listen for replies from any host.
    pub broadcast: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            target: IpAddr::V4(Ipv4Addr::BROADCAST),
            port: DEFAULT_PORT,
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
            retries: DEFAULT_RETRIES,
            broadcast: true,
        }
    }
}

impl DiscoveryOptions {
    /// Unicast probe of one host.
    pub fn unicast(host: IpAddr) -> Self {
        Self {
            target: host,
            broadcast: false,
            ..Self::default()
        }
    }

    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.target, self.port)
    }
}

/// Classifier for discovery replies: keep every well-formed reply.
pub fn classify_discovery_reply(datagram: &[u8], _from: SocketAddr) -> Decision {
    if is_discovery_reply(datagram) {
        Decision::AddAndContinueWaiting(datagram.to_vec())
    } else {
        Decision::ContinueWaiting
    }
}

/// Probes the network and returns every device that answered, keyed by
/// `"host:port"`.
pub async fn discover(
    connections: &ConnectionManager,
    options: &DiscoveryOptions,
) -> HashMap<String, DeviceDescriptor> {
    let mut request = ExchangeRequest::send(discovery_probe(), options.destination())
        .with_timeout(options.timeout)
        .with_retries(options.retries);
    if options.broadcast {
        request = request.broadcast();
    }

    debug!(to = %options.destination(), "sending discovery probe");
    let replies = connections
        .exchange(&request, classify_discovery_reply)
        .await
        .map(|result| result.into_datagrams())
        .unwrap_or_default();

    collect_descriptors(replies)
}

/// Parses collected replies into descriptors.  Later replies from the same
/// `host:port` replace earlier ones.
pub fn collect_descriptors(replies: Vec<Datagram>) -> HashMap<String, DeviceDescriptor> {
    let mut devices = HashMap::new();
    for reply in replies {
        match parse_discovery_reply(&reply.payload, reply.from) {
            Ok(descriptor) => {
                info!(
                    address = %descriptor.address,
                    kind = %descriptor.kind,
                    mac = %descriptor.hardware_id,
                    "discovered device"
                );
                devices.insert(reply.from.to_string(), descriptor);
            }
            Err(ProtocolError::UnknownDeviceKind) => {
                warn!(from = %reply.from, "discovery reply with unknown device kind, skipping");
            }
            Err(e) => {
                debug!(from = %reply.from, "unparseable discovery reply: {e}");
            }
        }
    }
    devices
}

/// Keeps only devices of `kind`.
pub fn filter_kind(
    devices: HashMap<String, DeviceDescriptor>,
    kind: DeviceKind,
) -> HashMap<String, DeviceDescriptor> {
    devices
        .into_iter()
        .filter(|(_, d)| d.kind == kind)
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
