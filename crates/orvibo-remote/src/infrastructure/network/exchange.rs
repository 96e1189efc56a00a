//! Request/response engine: send, classify inbound datagrams, retry.
//!
//! Every device operation runs through [`exchange`].  The caller supplies an
//! optional packet, a destination, a total time budget, an attempt count and a
//! classifier.  The classifier sees each inbound datagram of the conversation
//! and returns a [`Decision`].
//!
//! # Timing
//!
//! `timeout` is the budget of one attempt.  Within an attempt the remaining
//! time shrinks with each datagram received, so a chatty peer cannot extend it.
//! The engine makes at most `max(retries, 1)` attempts.  An attempt that ends
//! with collected datagrams finishes the exchange.  An exchange without a
//! packet is a pure listen and makes exactly one attempt.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::endpoint::{Datagram, PeerKey, TransportError};

/// Default per-attempt budget of a device exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default number of attempts.
pub const DEFAULT_RETRIES: u32 = 3;

/// The socket operations the engine needs.
///
/// [`Endpoint`](super::endpoint::Endpoint) is the production implementation;
/// tests substitute a mock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatagramLink: Send + Sync {
    /// Sends one datagram.
    async fn send(&self, payload: &[u8], destination: SocketAddr) -> Result<(), TransportError>;

    /// Waits up to `budget` for the next datagram queued under `key`.
    ///
    /// `Ok(None)` means the budget elapsed, or that no conversation is open
    /// on `key`.
    async fn receive(
        &self,
        key: PeerKey,
        budget: Duration,
    ) -> Result<Option<Datagram>, TransportError>;

    /// Starts routing inbound datagrams to `key`.
    fn open_conversation(&self, key: PeerKey);

    /// Undoes one [`DatagramLink::open_conversation`].
    fn close_conversation(&self, key: PeerKey);
}

/// Verdict of a classifier on one inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Accept this datagram and end the exchange.
    ReturnImmediately(Vec<u8>),
    /// Ignore it and keep waiting.
    ContinueWaiting,
    /// End this attempt now and start the next one.
    AbortAndRetry,
    /// Keep it and keep waiting; the exchange returns everything collected.
    AddAndContinueWaiting(Vec<u8>),
}

/// Outcome of a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeResult {
    /// A datagram accepted with [`Decision::ReturnImmediately`].
    Single(Datagram),
    /// Every datagram kept with [`Decision::AddAndContinueWaiting`], in arrival order.
    Collected(Vec<Datagram>),
}

impl ExchangeResult {
    /// The accepted datagram, if this is a single-reply result.
    pub fn into_single(self) -> Option<Datagram> {
        match self {
            ExchangeResult::Single(d) => Some(d),
            ExchangeResult::Collected(_) => None,
        }
    }

    /// All datagrams, whichever way they were accepted.
    pub fn into_datagrams(self) -> Vec<Datagram> {
        match self {
            ExchangeResult::Single(d) => vec![d],
            ExchangeResult::Collected(all) => all,
        }
    }
}

/// Parameters of one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    /// Packet to send at the start of each attempt; `None` for a pure listen.
    pub packet: Option<Vec<u8>>,
    pub destination: SocketAddr,
    /// Budget of one attempt.
    pub timeout: Duration,
    /// Attempt count.  Zero is treated as one.
    pub retries: u32,
    /// Listen on the wildcard queue instead of the destination host's.
    pub broadcast: bool,
}

impl ExchangeRequest {
    /// A send-and-wait request with default timing.
    pub fn send(packet: Vec<u8>, destination: SocketAddr) -> Self {
        Self {
            packet: Some(packet),
            destination,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            broadcast: false,
        }
    }

    /// A single-attempt listen on `destination`'s queue.
    pub fn listen(destination: SocketAddr, timeout: Duration) -> Self {
        Self {
            packet: None,
            destination,
            timeout,
            retries: 1,
            broadcast: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    /// The queue this request listens on.
    pub fn peer_key(&self) -> PeerKey {
        PeerKey::for_destination(self.destination, self.broadcast)
    }

    fn attempts(&self) -> u32 {
        if self.packet.is_none() {
            1
        } else {
            self.retries.max(1)
        }
    }
}

/// Keeps a conversation open for the lifetime of one exchange.
struct Conversation<'a, L: DatagramLink + ?Sized> {
    link: &'a L,
    key: PeerKey,
}

impl<'a, L: DatagramLink + ?Sized> Conversation<'a, L> {
    fn open(link: &'a L, key: PeerKey) -> Self {
        link.open_conversation(key);
        Self { link, key }
    }
}

impl<L: DatagramLink + ?Sized> Drop for Conversation<'_, L> {
    fn drop(&mut self) {
        self.link.close_conversation(self.key);
    }
}

enum AttemptOutcome {
    Accepted(Datagram),
    Exhausted,
}

/// Runs one exchange over `link`.
///
/// Returns `Ok(None)` when every attempt ran out without an accepted reply and
/// nothing was collected.
///
/// # Errors
///
/// Propagates any [`TransportError`] from the link; the caller decides whether
/// the endpoint must be torn down.
pub async fn exchange<L, F>(
    link: &L,
    request: &ExchangeRequest,
    mut classify: F,
) -> Result<Option<ExchangeResult>, TransportError>
where
    L: DatagramLink + ?Sized,
    F: FnMut(&[u8], SocketAddr) -> Decision,
{
    let key = request.peer_key();
    let _conversation = Conversation::open(link, key);
    let mut collected = Vec::new();
    let attempts = request.attempts();

    for attempt in 1..=attempts {
        if let Some(packet) = &request.packet {
            link.send(packet, request.destination).await?;
        }

        match run_attempt(link, key, request.timeout, &mut classify, &mut collected).await? {
            AttemptOutcome::Accepted(datagram) => {
                debug!(peer = %key, attempt, "exchange accepted reply");
                return Ok(Some(ExchangeResult::Single(datagram)));
            }
            AttemptOutcome::Exhausted if !collected.is_empty() => {
                debug!(peer = %key, attempt, count = collected.len(), "exchange collected replies");
                return Ok(Some(ExchangeResult::Collected(collected)));
            }
            AttemptOutcome::Exhausted => {
                warn!(
                    peer = %request.destination,
                    attempt,
                    attempts,
                    "no reply within {:?}",
                    request.timeout
                );
            }
        }
    }

    Ok(None)
}

async fn run_attempt<L, F>(
    link: &L,
    key: PeerKey,
    budget: Duration,
    classify: &mut F,
    collected: &mut Vec<Datagram>,
) -> Result<AttemptOutcome, TransportError>
where
    L: DatagramLink + ?Sized,
    F: FnMut(&[u8], SocketAddr) -> Decision,
{
    let deadline = Instant::now() + budget;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(AttemptOutcome::Exhausted);
        }
        let Some(datagram) = link.receive(key, remaining).await? else {
            return Ok(AttemptOutcome::Exhausted);
        };

        match classify(&datagram.payload, datagram.from) {
            Decision::ReturnImmediately(payload) => {
                return Ok(AttemptOutcome::Accepted(Datagram {
                    payload,
                    from: datagram.from,
                }));
            }
            Decision::ContinueWaiting => {}
            Decision::AbortAndRetry => return Ok(AttemptOutcome::Exhausted),
            Decision::AddAndContinueWaiting(payload) => collected.push(Datagram {
                payload,
                from: datagram.from,
            }),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
