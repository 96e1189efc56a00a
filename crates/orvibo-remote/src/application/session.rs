//! Per-device session state shared by every command.
//!
//! A session knows where the device is, which hardware id it answers with,
//! and when it last confirmed a subscription.  Devices drop subscribers after
//! about a minute of silence, so every command first calls
//! [`DeviceSession::subscribe_if_stale`], which re-subscribes only when the
//! previous subscription is older than [`SUBSCRIPTION_VALIDITY`].
//!
//! All timestamps are `tokio::time::Instant`, which lets tests drive the
//! windows with a paused clock.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use orvibo_core::protocol::{is_subscribe_reply, subscribe_packet, SUBSCRIPTION_VALIDITY_SECS};
use orvibo_core::{DeviceDescriptor, DeviceTime, HardwareId};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::infrastructure::network::connection_manager::ConnectionManager;
use crate::infrastructure::network::exchange::{
    Decision, ExchangeRequest, DEFAULT_RETRIES, DEFAULT_TIMEOUT,
};

/// How long a successful subscription stays valid.
pub const SUBSCRIPTION_VALIDITY: Duration = Duration::from_secs(SUBSCRIPTION_VALIDITY_SECS);

/// One device's session.
pub struct DeviceSession {
    connections: Arc<ConnectionManager>,
    address: SocketAddr,
    hardware_id: HardwareId,
    device_time: Option<DeviceTime>,
    response_timeout: Duration,
    retries: u32,
    last_subscribe: Option<Instant>,
    learning_started: Option<Instant>,
    subscription_data: Option<Vec<u8>>,
}

impl DeviceSession {
    /// A session for a device at a known address.
    pub fn new(
        connections: Arc<ConnectionManager>,
        address: SocketAddr,
        hardware_id: HardwareId,
    ) -> Self {
        Self {
            connections,
            address,
            hardware_id,
            device_time: None,
            response_timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            last_subscribe: None,
            learning_started: None,
            subscription_data: None,
        }
    }

    /// A session for a device found by discovery.
    pub fn from_descriptor(connections: Arc<ConnectionManager>, device: &DeviceDescriptor) -> Self {
        let mut session = Self::new(connections, device.address, device.hardware_id);
        session.device_time = Some(device.device_time);
        session
    }

    /// Default per-attempt timeout for operations called without an override.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Default attempt count for operations called without an override.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn hardware_id(&self) -> &HardwareId {
        &self.hardware_id
    }

    pub fn device_time(&self) -> Option<DeviceTime> {
        self.device_time
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn last_subscribe(&self) -> Option<Instant> {
        self.last_subscribe
    }

    pub fn learning_started(&self) -> Option<Instant> {
        self.learning_started
    }

    /// The most recent subscribe acknowledgement, as received.
    pub fn subscription_data(&self) -> Option<&[u8]> {
        self.subscription_data.as_deref()
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// `true` while the last successful subscription is younger than
    /// [`SUBSCRIPTION_VALIDITY`].
    pub fn is_subscribed(&self) -> bool {
        self.last_subscribe
            .is_some_and(|at| at.elapsed() < SUBSCRIPTION_VALIDITY)
    }

    /// Builds a request towards this device with the session defaults
    /// applied where no override is given.
    pub fn request(
        &self,
        packet: Vec<u8>,
        timeout: Option<Duration>,
        retries: Option<u32>,
    ) -> ExchangeRequest {
        ExchangeRequest::send(packet, self.address)
            .with_timeout(timeout.unwrap_or(self.response_timeout))
            .with_retries(retries.unwrap_or(self.retries))
    }

    /// Subscribes unless a subscription younger than 60 s exists.
    ///
    /// Returns `true` when the session is subscribed afterwards.  A failed
    /// attempt leaves the previous timestamp untouched, so the next call
    /// tries again.
    pub async fn subscribe_if_stale(
        &mut self,
        timeout: Option<Duration>,
        retries: Option<u32>,
    ) -> bool {
        if self.is_subscribed() {
            return true;
        }

        let request = self.request(subscribe_packet(&self.hardware_id), timeout, retries);
        let id = self.hardware_id;
        let reply = self
            .connections
            .exchange(&request, |data: &[u8], _| {
                if is_subscribe_reply(data, &id) {
                    Decision::ReturnImmediately(data.to_vec())
                } else {
                    Decision::ContinueWaiting
                }
            })
            .await
            .and_then(|result| result.into_single());

        match reply {
            Some(datagram) => {
                debug!(device = %self.address, data = %hex::encode(&datagram.payload), "subscribed");
                self.last_subscribe = Some(Instant::now());
                self.subscription_data = Some(datagram.payload);
                true
            }
            None => {
                info!(device = %self.address, mac = %self.hardware_id, "subscription failed");
                false
            }
        }
    }

    pub(crate) fn mark_learning_started(&mut self) {
        self.learning_started = Some(Instant::now());
    }

    pub(crate) fn clear_learning(&mut self) {
        self.learning_started = None;
    }
}

impl fmt::Display for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.address, self.hardware_id)?;
        match self.device_time {
            Some(time) => write!(f, " {time}"),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("address", &self.address)
            .field("hardware_id", &self.hardware_id)
            .field("device_time", &self.device_time)
            .field("last_subscribe", &self.last_subscribe)
            .field("learning_started", &self.learning_started)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::connection_manager::TransportConfig;
    use orvibo_core::protocol::{encode_header, CommandId, PADDING};
    use orvibo_core::DeviceKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::UdpSocket;

    const MAC: [u8; 6] = [0xAC, 0xCF, 0x23, 0x72, 0x5A, 0x50];

    fn manager() -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(TransportConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            allow_broadcast: false,
            queue_capacity: 8,
        }))
    }

    fn session() -> DeviceSession {
        DeviceSession::new(
            manager(),
            "192.168.25.41:10000".parse().unwrap(),
            HardwareId::new(MAC),
        )
    }

    #[test]
    fn test_new_session_uses_default_timing() {
        let s = session();
        assert_eq!(s.response_timeout(), Duration::from_secs(3));
        assert_eq!(s.retries(), 3);
        assert!(!s.is_subscribed());
        assert!(s.subscription_data().is_none());
    }

    #[test]
    fn test_request_applies_overrides_before_defaults() {
        let s = session().with_response_timeout(Duration::from_secs(7));

        let defaulted = s.request(vec![1], None, None);
        let overridden = s.request(vec![1], Some(Duration::from_secs(1)), Some(5));

        assert_eq!(defaulted.timeout, Duration::from_secs(7));
        assert_eq!(defaulted.retries, 3);
        assert_eq!(overridden.timeout, Duration::from_secs(1));
        assert_eq!(overridden.retries, 5);
        assert_eq!(overridden.destination, s.address());
    }

    #[test]
    fn test_display_shows_address_mac_and_time() {
        let descriptor = DeviceDescriptor {
            address: "192.168.25.41:10000".parse().unwrap(),
            kind: DeviceKind::AllOne,
            hardware_id: HardwareId::new(MAC),
            device_time: DeviceTime(1_000),
            raw: Vec::new(),
        };

        let s = DeviceSession::from_descriptor(manager(), &descriptor);

        assert_eq!(
            s.to_string(),
            "[192.168.25.41:10000] ac:cf:23:72:5a:50 raw:1000"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_expires_after_sixty_seconds() {
        // Arrange
        let mut s = session();
        s.last_subscribe = Some(Instant::now());

        // Act / Assert
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(s.is_subscribed());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!s.is_subscribed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_subscription_skips_network() {
        // Arrange: a manager that was shut down would fail any exchange
        let connections = manager();
        connections.shutdown().await;
        let mut s = DeviceSession::new(
            connections,
            "192.168.25.41:10000".parse().unwrap(),
            HardwareId::new(MAC),
        );
        s.last_subscribe = Some(Instant::now());
        tokio::time::advance(Duration::from_secs(30)).await;

        // Act
        let subscribed = s.subscribe_if_stale(None, None).await;

        // Assert
        assert!(subscribed);
    }

    /// Answers every subscribe request for `MAC` and counts them.
    async fn subscribe_responder() -> (SocketAddr, Arc<AtomicUsize>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let mut body = MAC.to_vec();
        body.extend_from_slice(&PADDING);
        body.extend_from_slice(&[0; 6]);
        let reply = encode_header(CommandId::Subscribe, &body).unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                if len >= 6 && buf[4..6] == CommandId::Subscribe.bytes() {
                    seen.fetch_add(1, Ordering::SeqCst);
                    let _ = socket.send_to(&reply, from).await;
                }
            }
        });
        (addr, count)
    }

    #[tokio::test]
    async fn test_stale_subscription_is_renewed_on_the_wire() {
        // Arrange
        let (device, subscribes) = subscribe_responder().await;
        let mut s = DeviceSession::new(manager(), device, HardwareId::new(MAC));

        // Act: subscribe, call again within the window, then once it lapsed
        assert!(s.subscribe_if_stale(None, Some(1)).await);
        assert!(s.subscribe_if_stale(None, Some(1)).await);
        let within_window = subscribes.load(Ordering::SeqCst);

        s.last_subscribe = s
            .last_subscribe
            .and_then(|at| at.checked_sub(SUBSCRIPTION_VALIDITY + Duration::from_secs(1)));
        assert!(!s.is_subscribed());
        assert!(s.subscribe_if_stale(None, Some(1)).await);

        // Assert
        assert_eq!(within_window, 1);
        assert_eq!(subscribes.load(Ordering::SeqCst), 2);
        assert!(s.is_subscribed());
    }

    #[tokio::test]
    async fn test_failed_subscribe_keeps_previous_timestamp() {
        let connections = manager();
        connections.shutdown().await;
        let mut s = DeviceSession::new(
            connections,
            "127.0.0.1:9".parse().unwrap(),
            HardwareId::new(MAC),
        );

        let subscribed = s.subscribe_if_stale(Some(Duration::from_millis(10)), Some(1)).await;

        assert!(!subscribed);
        assert!(s.last_subscribe().is_none());
    }
}
