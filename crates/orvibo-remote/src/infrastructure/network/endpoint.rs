//! UDP endpoint shared by every device conversation.
//!
//! # How it works (for beginners)
//!
//! All devices answer on the same port, so a single UDP socket serves every
//! session.  A background reader task pulls datagrams off the socket and sorts
//! them into bounded per-peer queues:
//!
//! ```text
//!             ┌──────────────┐      Host(192.168.1.40) ──▶ queue ──▶ emit exchange
//!  socket ──▶ │ reader task  │ ───▶ Host(192.168.1.41) ──▶ queue ──▶ learn exchange
//!             └──────────────┘      Wildcard           ──▶ queue ──▶ discovery
//! ```
//!
//! A queue exists only while at least one conversation is open on its key.
//! An inbound datagram from host `H` is delivered to `Host(H)` if that queue
//! exists, and a copy goes to `Wildcard` while a broadcast conversation is
//! open, so discovery and per-device traffic never hide each other's replies.
//! With neither queue open the datagram is dropped.
//!
//! A full queue drops the new datagram and logs a warning.  The reader never
//! blocks on a slow consumer.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::exchange::DatagramLink;

/// Largest datagram the reader accepts.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Default bound of each per-peer queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Error type for socket-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind UDP endpoint on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("endpoint is closed")]
    Closed,
}

/// Identifies the inbound queue a conversation reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerKey {
    /// Replies from one device host.
    Host(IpAddr),
    /// Replies to a broadcast, from any host.
    Wildcard,
}

impl PeerKey {
    /// The key an exchange towards `destination` listens on.
    pub fn for_destination(destination: SocketAddr, broadcast: bool) -> Self {
        if broadcast {
            PeerKey::Wildcard
        } else {
            PeerKey::Host(destination.ip())
        }
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerKey::Host(ip) => write!(f, "{ip}"),
            PeerKey::Wildcard => f.write_str("*"),
        }
    }
}

/// An inbound datagram and its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub from: SocketAddr,
}

struct PeerQueue {
    tx: mpsc::Sender<Datagram>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Datagram>>>,
    conversations: usize,
}

impl PeerQueue {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            conversations: 0,
        }
    }
}

/// State shared between the endpoint handle and its reader task.
struct Shared {
    queues: Mutex<HashMap<PeerKey, PeerQueue>>,
    closed: AtomicBool,
    capacity: usize,
}

impl Shared {
    fn queues(&self) -> MutexGuard<'_, HashMap<PeerKey, PeerQueue>> {
        self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the endpoint closed and drops every queue sender, waking all
    /// pending receivers.  Returns `false` if it was already closed.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.queues().clear();
        true
    }

    fn route(&self, datagram: Datagram) {
        let queues = self.queues();
        let host = PeerKey::Host(datagram.from.ip());
        let to_host = queues.get(&host);
        let to_wildcard = queues.get(&PeerKey::Wildcard);

        match (to_host, to_wildcard) {
            (None, None) => {
                debug!(from = %datagram.from, "no open conversation, dropping datagram");
            }
            (Some(queue), None) => Self::offer(queue, host, datagram),
            (None, Some(queue)) => Self::offer(queue, PeerKey::Wildcard, datagram),
            (Some(host_queue), Some(wildcard_queue)) => {
                Self::offer(wildcard_queue, PeerKey::Wildcard, datagram.clone());
                Self::offer(host_queue, host, datagram);
            }
        }
    }

    fn offer(queue: &PeerQueue, key: PeerKey, datagram: Datagram) {
        match queue.tx.try_send(datagram) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!(peer = %key, from = %dropped.from, "peer queue full, dropping datagram");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// The shared UDP endpoint.
///
/// Dropping the endpoint closes it.
pub struct Endpoint {
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Endpoint {
    /// Binds the socket and starts the background reader.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if the address is unavailable and
    /// [`TransportError::Io`] if broadcast cannot be enabled.
    pub async fn open(
        bind: SocketAddr,
        allow_broadcast: bool,
        queue_capacity: usize,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|source| TransportError::Bind { addr: bind, source })?;
        socket.set_broadcast(allow_broadcast)?;
        let socket = Arc::new(socket);

        let shared = Arc::new(Shared {
            queues: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            capacity: queue_capacity,
        });

        let reader = tokio::spawn(read_loop(Arc::clone(&socket), Arc::clone(&shared)));
        info!(addr = %socket.local_addr()?, broadcast = allow_broadcast, "UDP endpoint open");

        Ok(Self {
            socket,
            shared,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// The address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Stops the reader and releases every queue.  Idempotent.
    ///
    /// Receivers blocked in [`DatagramLink::receive`] wake up with
    /// [`TransportError::Closed`].
    pub fn close(&self) {
        if self.shared.close() {
            debug!("UDP endpoint closed");
        }
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Number of keys that currently have an open conversation.
    pub fn open_queue_count(&self) -> usize {
        self.shared.queues().len()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl DatagramLink for Endpoint {
    async fn send(&self, payload: &[u8], destination: SocketAddr) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        debug!(to = %destination, len = payload.len(), data = %hex::encode(payload), "send");
        self.socket.send_to(payload, destination).await?;
        Ok(())
    }

    async fn receive(
        &self,
        key: PeerKey,
        budget: Duration,
    ) -> Result<Option<Datagram>, TransportError> {
        let rx = {
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            match self.shared.queues().get(&key) {
                Some(queue) => Arc::clone(&queue.rx),
                None => {
                    debug!(peer = %key, "receive without an open conversation");
                    return Ok(None);
                }
            }
        };

        let next = tokio::time::timeout(budget, async {
            let mut rx = rx.lock().await;
            rx.recv().await
        })
        .await;

        match next {
            Ok(Some(datagram)) => Ok(Some(datagram)),
            Ok(None) => Err(TransportError::Closed),
            Err(_elapsed) => Ok(None),
        }
    }

    fn open_conversation(&self, key: PeerKey) {
        if self.is_closed() {
            return;
        }
        let capacity = self.shared.capacity;
        self.shared
            .queues()
            .entry(key)
            .or_insert_with(|| PeerQueue::new(capacity))
            .conversations += 1;
    }

    fn close_conversation(&self, key: PeerKey) {
        let mut queues = self.shared.queues();
        if let Some(queue) = queues.get_mut(&key) {
            queue.conversations = queue.conversations.saturating_sub(1);
            if queue.conversations == 0 {
                queues.remove(&key);
            }
        }
    }
}

/// Reader task: receive, log, route.  Exits when the endpoint closes or the
/// socket fails for good.
async fn read_loop(socket: Arc<UdpSocket>, shared: Arc<Shared>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                let payload = buf[..len].to_vec();
                debug!(%from, len, data = %hex::encode(&payload), "recv");
                shared.route(Datagram { payload, from });
            }
            Err(_) if shared.is_closed() => break,
            // ICMP port-unreachable from an earlier send surfaces here on some platforms.
            Err(e) if matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
            ) =>
            {
                warn!("transient receive error: {e}");
            }
            Err(e) => {
                error!("UDP receive failed, closing endpoint: {e}");
                shared.close();
                break;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
