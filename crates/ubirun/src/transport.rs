//! # Transport Abstraction
//!
//! A minimal, async interface for moving bytes between nodes.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: the transport knows nothing about frames, values, or
//!   topologies. It moves opaque buffers.
//! - **Request-Response**: the fundamental interaction is "send bytes, await
//!   bytes". Connection management, retries, and marshalling beyond bytes
//!   belong to the transport implementation, not to this crate.

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The node is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// No reply arrived within the transport's deadline.
    Timeout,
    /// The remote node rejected the payload size.
    PayloadTooLarge,
    /// Anything else the underlying channel reports.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::Timeout => write!(f, "request timed out"),
            Self::PayloadTooLarge => write!(f, "payload too large for transport"),
            Self::Io(msg) => write!(f, "i/o error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A mechanism to send a byte buffer to one node and receive its reply.
///
/// Object-safe; nodes hold theirs as `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a payload and waits for the response.
    ///
    /// Blocking from the perspective of the calling task. There is no
    /// cancellation: a hung node hangs the caller.
    ///
    /// # invariants
    /// - Returns `Ok(vec)` with the raw reply bytes on success.
    /// - Returns `Err` if the network fails.
    /// - Never interprets the payload content.
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

/// Byte counters for one process.
///
/// Every request or reply that crosses a node boundary is counted, on both
/// the sending and the serving side.
#[derive(Debug, Default)]
pub struct Traffic {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl Traffic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_in(&self, bytes: usize) {
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_out(&self, bytes: usize) {
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn total_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn total_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }
}
