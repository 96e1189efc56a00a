//! AllOne infrared blaster: emit and learn.
//!
//! # Learning (for beginners)
//!
//! Learning is a two-step conversation:
//!
//! 1. [`AllOne::enter_learning_mode`] sends the enter-learning packet.  The
//!    device acknowledges with a 24-byte reply and stays in learning mode for
//!    40 seconds.
//! 2. [`AllOne::get_learned_key`] only listens.  When the user presses a key
//!    on a remote pointed at the device, it reports a longer learn packet whose
//!    bytes after offset 26 are the captured code.
//!
//! ```text
//!  Idle ──enter_learning_mode──▶ LearningRequested ──ack──▶ LearningActive
//!   ▲                                  │ no ack                 │
//!   └──────────────────────────────────┘           capture ┌────┴────┐ 40 s elapsed
//!                                                          ▼         ▼
//!                                                    KeyCaptured  WindowExpired
//! ```
//!
//! The listen budget is `min(40 s − elapsed, timeout)`; once the window has
//! closed no I/O happens at all.
//!
//! The device sends a capture exactly once.  From the learning request until
//! the window closes or a code is captured, the device's queue is held open,
//! so a report that arrives between two polls waits for the next one.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use orvibo_core::protocol::{
    code_payload, emit_ir_packet, is_emit_reply, is_learn_ack, is_learn_capture, learn_packet,
    LEARN_WINDOW_SECS, MAX_CODE_LEN,
};
use orvibo_core::{DeviceKind, HardwareId, ProtocolError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::session::DeviceSession;
use crate::infrastructure::network::connection_manager::{ConnectionManager, HeldConversation};
use crate::infrastructure::network::discovery::{self, DiscoveryOptions};
use crate::infrastructure::network::endpoint::PeerKey;
use crate::infrastructure::network::exchange::{Decision, ExchangeRequest};

/// How long the device stays in learning mode after acknowledging.
pub const LEARN_WINDOW: Duration = Duration::from_secs(LEARN_WINDOW_SECS);

/// Where an AllOne is in the learning conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnState {
    Idle,
    LearningRequested,
    LearningActive,
    KeyCaptured,
    WindowExpired,
}

/// An AllOne device.
#[derive(Debug)]
pub struct AllOne {
    session: DeviceSession,
    learn_state: LearnState,
    learn_hold: Option<HeldConversation>,
}

impl AllOne {
    pub fn new(session: DeviceSession) -> Self {
        Self {
            session,
            learn_state: LearnState::Idle,
            learn_hold: None,
        }
    }

    /// Builds an AllOne from an address and a textual MAC such as
    /// `ac:cf:23:72:5a:50`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidHardwareId`] if `mac` does not parse.
    pub fn connect(
        connections: Arc<ConnectionManager>,
        address: SocketAddr,
        mac: &str,
    ) -> Result<Self, ProtocolError> {
        let hardware_id: HardwareId = mac.parse()?;
        Ok(Self::new(DeviceSession::new(connections, address, hardware_id)))
    }

    /// Discovers devices and keeps only AllOnes, keyed by `"host:port"`.
    pub async fn discover(
        connections: &Arc<ConnectionManager>,
        options: &DiscoveryOptions,
    ) -> HashMap<String, AllOne> {
        let devices = discovery::discover(connections, options).await;
        discovery::filter_kind(devices, DeviceKind::AllOne)
            .into_iter()
            .map(|(key, descriptor)| {
                let session = DeviceSession::from_descriptor(Arc::clone(connections), &descriptor);
                (key, AllOne::new(session))
            })
            .collect()
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut DeviceSession {
        &mut self.session
    }

    pub fn learn_state(&self) -> LearnState {
        self.learn_state
    }

    /// Sends an IR code and returns the device's acknowledgement.
    ///
    /// Returns `Ok(None)` when the subscription fails or no acknowledgement
    /// arrives within the retry budget.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::CodeTooLong`] for codes over [`MAX_CODE_LEN`] bytes,
    /// reported before any network traffic.
    pub async fn emit_ir(
        &mut self,
        code: &[u8],
        timeout: Option<Duration>,
        retries: Option<u32>,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        if code.len() > MAX_CODE_LEN {
            return Err(ProtocolError::CodeTooLong {
                len: code.len(),
                max: MAX_CODE_LEN,
            });
        }
        if !self.session.subscribe_if_stale(timeout, retries).await {
            return Ok(None);
        }

        let id = *self.session.hardware_id();
        let packet = emit_ir_packet(&id, rand::random::<u16>(), code)?;
        let request = self.session.request(packet, timeout, retries);
        let ack = self
            .session
            .connections()
            .exchange(&request, |data: &[u8], _| {
                if is_emit_reply(data, &id) {
                    Decision::ReturnImmediately(data.to_vec())
                } else {
                    Decision::ContinueWaiting
                }
            })
            .await
            .and_then(|result| result.into_single())
            .map(|datagram| datagram.payload);

        match &ack {
            Some(reply) => debug!(device = %self.session.address(), ack = %hex::encode(reply), "IR code emitted"),
            None => warn!(device = %self.session.address(), "no acknowledgement for IR code"),
        }
        Ok(ack)
    }

    /// Puts the device into learning mode.
    ///
    /// Returns `true` once the device acknowledged; the 40 s learning window
    /// starts at that moment.
    pub async fn enter_learning_mode(
        &mut self,
        timeout: Option<Duration>,
        retries: Option<u32>,
    ) -> bool {
        if !self.session.subscribe_if_stale(timeout, retries).await {
            self.abandon_learning();
            return false;
        }

        self.learn_state = LearnState::LearningRequested;
        let key = PeerKey::Host(self.session.address().ip());
        self.learn_hold = self.session.connections().hold_conversation(key).await;
        let id = *self.session.hardware_id();
        let request = self.session.request(learn_packet(&id), timeout, retries);
        let acked = self
            .session
            .connections()
            .exchange(&request, |data: &[u8], _| {
                if is_learn_ack(data, &id) {
                    Decision::ReturnImmediately(data.to_vec())
                } else {
                    Decision::ContinueWaiting
                }
            })
            .await
            .and_then(|result| result.into_single())
            .is_some();

        if acked {
            self.session.mark_learning_started();
            self.learn_state = LearnState::LearningActive;
            info!(device = %self.session.address(), "learning mode active, press a key");
        } else {
            self.abandon_learning();
        }
        acked
    }

    /// Time left in the current learning window.
    pub fn learning_time_remaining(&self) -> Duration {
        self.session
            .learning_started()
            .map(|started| LEARN_WINDOW.saturating_sub(started.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    /// Waits for the device to report a captured code.
    ///
    /// Listens without sending anything, for `min(remaining window, timeout)`.
    /// Returns the code bytes (the report minus its 26-byte header), or `None`
    /// when nothing was captured in time or learning was never entered.
    pub async fn get_learned_key(&mut self, timeout: Duration) -> Option<Vec<u8>> {
        if self.learn_state != LearnState::LearningActive {
            return None;
        }
        let started = self.session.learning_started()?;
        let budget = LEARN_WINDOW
            .saturating_sub(started.elapsed())
            .min(timeout);
        if budget.is_zero() {
            if started.elapsed() >= LEARN_WINDOW {
                self.end_learning(LearnState::WindowExpired);
            }
            return None;
        }

        let id = *self.session.hardware_id();
        let request = ExchangeRequest::listen(self.session.address(), budget);
        let capture = self
            .session
            .connections()
            .exchange(&request, |data: &[u8], _| {
                if is_learn_capture(data, &id) {
                    Decision::ReturnImmediately(data.to_vec())
                } else {
                    Decision::ContinueWaiting
                }
            })
            .await
            .and_then(|result| result.into_single());

        let code = capture.and_then(|datagram| code_payload(&datagram.payload).map(<[u8]>::to_vec));
        match &code {
            Some(code) => {
                self.end_learning(LearnState::KeyCaptured);
                info!(device = %self.session.address(), len = code.len(), "IR code captured");
            }
            None if Instant::now() >= started + LEARN_WINDOW => {
                self.end_learning(LearnState::WindowExpired);
            }
            None => {}
        }
        code
    }

    /// A failed request leaves no window behind, whatever an earlier run did.
    fn abandon_learning(&mut self) {
        self.end_learning(LearnState::Idle);
        self.session.clear_learning();
    }

    fn end_learning(&mut self, state: LearnState) {
        self.learn_state = state;
        self.learn_hold = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::connection_manager::TransportConfig;

    fn manager() -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(TransportConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            allow_broadcast: false,
            queue_capacity: 8,
        }))
    }

    fn device(connections: Arc<ConnectionManager>) -> AllOne {
        AllOne::connect(connections, "127.0.0.1:9".parse().unwrap(), "ac:cf:23:72:5a:50").unwrap()
    }

    #[test]
    fn test_connect_rejects_bad_mac() {
        let result = AllOne::connect(manager(), "127.0.0.1:9".parse().unwrap(), "ac:cf");
        assert!(matches!(result, Err(ProtocolError::InvalidHardwareId(_))));
    }

    #[test]
    fn test_new_device_is_idle_with_no_window() {
        let d = device(manager());
        assert_eq!(d.learn_state(), LearnState::Idle);
        assert_eq!(d.learning_time_remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_oversized_code_fails_before_any_io() {
        // Arrange: a shut-down manager proves nothing is sent
        let connections = manager();
        connections.shutdown().await;
        let mut d = device(Arc::clone(&connections));
        let code = vec![0u8; MAX_CODE_LEN + 1];

        // Act
        let result = d.emit_ir(&code, None, None).await;

        // Assert
        assert!(matches!(result, Err(ProtocolError::CodeTooLong { .. })));
        assert_eq!(connections.generation(), 0);
    }

    #[tokio::test]
    async fn test_get_learned_key_without_learning_returns_none() {
        let connections = manager();
        let mut d = device(Arc::clone(&connections));

        assert!(d.get_learned_key(Duration::from_secs(1)).await.is_none());
        assert_eq!(connections.generation(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_learning_window_closes_after_forty_seconds() {
        // Arrange
        let connections = manager();
        let mut d = device(Arc::clone(&connections));
        d.session_mut().mark_learning_started();
        d.learn_state = LearnState::LearningActive;

        // Act
        tokio::time::advance(Duration::from_secs(25)).await;
        let remaining = d.learning_time_remaining();
        tokio::time::advance(Duration::from_secs(15)).await;
        let key = d.get_learned_key(Duration::from_secs(30)).await;

        // Assert: the expired window short-circuits without opening a socket
        assert_eq!(remaining, Duration::from_secs(15));
        assert!(key.is_none());
        assert_eq!(d.learn_state(), LearnState::WindowExpired);
        assert_eq!(connections.generation(), 0);
    }

    #[tokio::test]
    async fn test_failed_learning_request_clears_previous_window() {
        // Arrange: an earlier learning run left a window open
        let connections = manager();
        let mut d = device(Arc::clone(&connections));
        d.session_mut().mark_learning_started();
        d.learn_state = LearnState::LearningActive;
        connections.shutdown().await;

        // Act: the new request fails (subscription cannot be refreshed)
        let entered = d
            .enter_learning_mode(Some(Duration::from_millis(10)), Some(1))
            .await;
        let key = d.get_learned_key(Duration::from_secs(1)).await;

        // Assert
        assert!(!entered);
        assert_eq!(d.learn_state(), LearnState::Idle);
        assert!(key.is_none());
    }

    #[tokio::test]
    async fn test_failed_subscription_blocks_learning() {
        let connections = manager();
        connections.shutdown().await;
        let mut d = device(connections);

        let entered = d
            .enter_learning_mode(Some(Duration::from_millis(10)), Some(1))
            .await;

        assert!(!entered);
        assert_eq!(d.learn_state(), LearnState::Idle);
        assert!(d.session().learning_started().is_none());
    }
}
