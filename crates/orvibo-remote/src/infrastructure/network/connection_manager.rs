//! ConnectionManager: owns the shared UDP endpoint and runs exchanges on it.
//!
//! The endpoint moves through a small state machine:
//!
//! ```text
//!   Idle ──first exchange──▶ Open ──socket error──▶ Idle ──next exchange──▶ Open
//!     │                        │
//!     └────────shutdown()──────┴──▶ ShutDown (terminal)
//! ```
//!
//! Exchanges never fail with an error: a transport failure tears the endpoint
//! down, is logged, and reads as "no reply" to the caller.  The next exchange
//! opens a fresh endpoint.
//!
//! A queue normally lives only as long as the exchange reading it.  When a
//! device reports something outside any exchange (a learned IR code arrives
//! whenever the user presses a key), [`ConnectionManager::hold_conversation`]
//! keeps the device's queue open so the report waits for the next exchange.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use orvibo_core::protocol::DEFAULT_PORT;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::endpoint::{Endpoint, PeerKey, TransportError, DEFAULT_QUEUE_CAPACITY};
use super::exchange::{exchange, DatagramLink, Decision, ExchangeRequest, ExchangeResult};

/// Configuration of the shared endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub bind_address: SocketAddr,
    pub allow_broadcast: bool,
    pub queue_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            allow_broadcast: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Keeps one peer queue open on the endpoint until dropped.
///
/// Datagrams arriving while no exchange runs are queued (up to the queue
/// capacity) and handed to the next exchange on the same key.  If the endpoint
/// is torn down meanwhile the hold becomes inert.
pub struct HeldConversation {
    endpoint: Arc<Endpoint>,
    key: PeerKey,
}

impl HeldConversation {
    pub fn key(&self) -> PeerKey {
        self.key
    }
}

impl fmt::Debug for HeldConversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeldConversation")
            .field("key", &self.key)
            .field("endpoint_closed", &self.endpoint.is_closed())
            .finish()
    }
}

impl Drop for HeldConversation {
    fn drop(&mut self) {
        self.endpoint.close_conversation(self.key);
        debug!(peer = %self.key, "released held conversation");
    }
}

enum LinkState {
    Idle,
    Open(Arc<Endpoint>),
    ShutDown,
}

/// Process-wide owner of the UDP endpoint.
///
/// Share it between sessions with `Arc<ConnectionManager>`.
pub struct ConnectionManager {
    config: TransportConfig,
    state: Mutex<LinkState>,
    generation: AtomicU64,
}

impl ConnectionManager {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LinkState::Idle),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// How many endpoints have been opened so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Returns the open endpoint, opening one if needed.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] after [`ConnectionManager::shutdown`], or the
    /// bind error if the socket cannot be opened.
    pub async fn endpoint(&self) -> Result<Arc<Endpoint>, TransportError> {
        let mut state = self.state.lock().await;
        match &*state {
            LinkState::Open(endpoint) if !endpoint.is_closed() => return Ok(Arc::clone(endpoint)),
            LinkState::ShutDown => return Err(TransportError::Closed),
            LinkState::Open(_) | LinkState::Idle => {}
        }

        let endpoint = Arc::new(
            Endpoint::open(
                self.config.bind_address,
                self.config.allow_broadcast,
                self.config.queue_capacity,
            )
            .await?,
        );
        self.generation.fetch_add(1, Ordering::Relaxed);
        *state = LinkState::Open(Arc::clone(&endpoint));
        Ok(endpoint)
    }

    /// Local address of the open endpoint, if any.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().await {
            LinkState::Open(endpoint) => endpoint.local_addr().ok(),
            LinkState::Idle | LinkState::ShutDown => None,
        }
    }

    pub async fn is_open(&self) -> bool {
        matches!(&*self.state.lock().await, LinkState::Open(e) if !e.is_closed())
    }

    /// Runs one exchange on the shared endpoint.
    ///
    /// Returns `None` on timeout and on any transport failure.
    pub async fn exchange<F>(&self, request: &ExchangeRequest, classify: F) -> Option<ExchangeResult>
    where
        F: FnMut(&[u8], SocketAddr) -> Decision,
    {
        let endpoint = match self.endpoint().await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!(bind = %self.config.bind_address, "cannot open UDP endpoint: {e}");
                return None;
            }
        };

        match exchange(endpoint.as_ref(), request, classify).await {
            Ok(result) => result,
            Err(e) => {
                error!(peer = %request.destination, "exchange failed, tearing down endpoint: {e}");
                self.teardown(&endpoint).await;
                None
            }
        }
    }

    /// Opens a conversation on `key` that outlives individual exchanges.
    ///
    /// Returns `None` if no endpoint can be opened.
    pub async fn hold_conversation(&self, key: PeerKey) -> Option<HeldConversation> {
        match self.endpoint().await {
            Ok(endpoint) => {
                endpoint.open_conversation(key);
                debug!(peer = %key, "holding conversation");
                Some(HeldConversation { endpoint, key })
            }
            Err(e) => {
                error!(bind = %self.config.bind_address, "cannot open UDP endpoint: {e}");
                None
            }
        }
    }

    /// Closes the endpoint for good.  Later exchanges return `None`.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.state.lock().await, LinkState::ShutDown);
        if let LinkState::Open(endpoint) = previous {
            endpoint.close();
            info!("UDP endpoint shut down");
        }
    }

    /// Drops `failed` if it is still the current endpoint.
    async fn teardown(&self, failed: &Arc<Endpoint>) {
        failed.close();
        let mut state = self.state.lock().await;
        if matches!(&*state, LinkState::Open(current) if Arc::ptr_eq(current, failed)) {
            *state = LinkState::Idle;
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback_config() -> TransportConfig {
        TransportConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            allow_broadcast: false,
            queue_capacity: 8,
        }
    }

    #[test]
    fn test_default_config_binds_device_port_on_all_interfaces() {
        let config = TransportConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:10000".parse().unwrap());
        assert!(config.allow_broadcast);
        assert_eq!(config.queue_capacity, 64);
    }

    #[tokio::test]
    async fn test_endpoint_is_opened_lazily_and_reused() {
        // Arrange
        let manager = ConnectionManager::new(loopback_config());
        assert!(!manager.is_open().await);

        // Act
        let first = manager.endpoint().await.unwrap();
        let second = manager.endpoint().await.unwrap();

        // Assert
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.generation(), 1);
        assert!(manager.local_addr().await.is_some());
    }

    #[tokio::test]
    async fn test_closed_endpoint_is_replaced_on_next_use() {
        let manager = ConnectionManager::new(loopback_config());
        let first = manager.endpoint().await.unwrap();

        first.close();
        let second = manager.endpoint().await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(manager.generation(), 2);
    }

    #[tokio::test]
    async fn test_exchange_after_shutdown_returns_none() {
        // Arrange
        let manager = ConnectionManager::new(loopback_config());
        manager.endpoint().await.unwrap();
        manager.shutdown().await;

        // Act
        let request = ExchangeRequest::send(vec![1], "127.0.0.1:9".parse().unwrap())
            .with_timeout(Duration::from_millis(20))
            .with_retries(1);
        let result = manager
            .exchange(&request, |d: &[u8], _| Decision::ReturnImmediately(d.to_vec()))
            .await;

        // Assert
        assert!(result.is_none());
        assert!(!manager.is_open().await);
        assert!(matches!(manager.endpoint().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_held_conversation_keeps_early_reply_for_next_exchange() {
        // Arrange: the device speaks before anyone is waiting
        let manager = ConnectionManager::new(loopback_config());
        let device = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let device_addr = device.local_addr().unwrap();
        let hold = manager
            .hold_conversation(PeerKey::Host(device_addr.ip()))
            .await
            .unwrap();
        let endpoint = manager.endpoint().await.unwrap();
        device
            .send_to(b"early", endpoint.local_addr().unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Act
        let request = ExchangeRequest::listen(device_addr, Duration::from_secs(2));
        let result = manager
            .exchange(&request, |d: &[u8], _| Decision::ReturnImmediately(d.to_vec()))
            .await;

        // Assert
        let datagram = result.and_then(ExchangeResult::into_single).unwrap();
        assert_eq!(datagram.payload, b"early");
        assert_eq!(endpoint.open_queue_count(), 1);
        drop(hold);
        assert_eq!(endpoint.open_queue_count(), 0);
    }

    #[tokio::test]
    async fn test_hold_after_shutdown_is_none() {
        let manager = ConnectionManager::new(loopback_config());
        manager.shutdown().await;

        let hold = manager
            .hold_conversation(PeerKey::Host("127.0.0.1".parse().unwrap()))
            .await;

        assert!(hold.is_none());
    }

    #[tokio::test]
    async fn test_bind_failure_reads_as_no_reply() {
        let holder = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let manager = ConnectionManager::new(TransportConfig {
            bind_address: holder.local_addr().unwrap(),
            ..loopback_config()
        });
        let request = ExchangeRequest::send(vec![1], "127.0.0.1:9".parse().unwrap());

        let result = manager
            .exchange(&request, |d: &[u8], _| Decision::ReturnImmediately(d.to_vec()))
            .await;

        assert!(result.is_none());
        assert_eq!(manager.generation(), 0);
    }
}
