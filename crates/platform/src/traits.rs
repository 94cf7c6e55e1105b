//! Boundary traits consumed by Oakley protocol engines

use crate::OakleyResult;
use std::net::SocketAddr;
use std::time::Instant;

/// Security module interface
///
/// Protocol engines implement this trait to provide unified management.
pub trait SecurityModule: Send + Sync {
    /// Unique module identifier
    fn id(&self) -> &'static str;

    /// Module version
    fn version(&self) -> &'static str;

    /// Module description
    fn description(&self) -> &'static str;

    /// Initialize the module
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails
    fn init(&mut self) -> OakleyResult<()> {
        Ok(())
    }

    /// Shutdown the module
    ///
    /// # Errors
    ///
    /// Returns an error if shutdown fails
    fn shutdown(&mut self) -> OakleyResult<()> {
        Ok(())
    }
}

/// Datagram transport used by an engine to reach its peers
///
/// `send` is called synchronously from inside message processing and must
/// not wait on the network. Implementations typically queue the datagram
/// for an I/O task.
pub trait Transport: Send {
    /// Hand one complete datagram to the transport
    ///
    /// # Errors
    ///
    /// Returns an error if the datagram cannot be accepted
    fn send(&mut self, remote: SocketAddr, datagram: &[u8]) -> OakleyResult<()>;
}

/// Source of monotonic time
pub trait Clock: Send {
    /// Current instant
    fn current_time(&self) -> Instant;
}

/// Clock backed by [`Instant::now`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn current_time(&self) -> Instant {
        Instant::now()
    }
}

/// A queued outbound datagram
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Datagram {
    /// Destination address
    pub remote: SocketAddr,
    /// Datagram bytes
    pub data: Vec<u8>,
}

/// Transport that buffers datagrams until they are drained
#[derive(Debug, Default)]
pub struct QueuedTransport {
    queue: Vec<Datagram>,
}

impl QueuedTransport {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued datagram, oldest first
    pub fn drain(&mut self) -> Vec<Datagram> {
        std::mem::take(&mut self.queue)
    }

    /// Number of datagrams waiting
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Transport for QueuedTransport {
    fn send(&mut self, remote: SocketAddr, datagram: &[u8]) -> OakleyResult<()> {
        self.queue.push(Datagram {
            remote,
            data: datagram.to_vec(),
        });
        Ok(())
    }
}
