//! UDP endpoint
//!
//! Runs a [`Phase1Engine`] on a tokio UDP socket: received datagrams are
//! fed to the engine, queued outbound datagrams are flushed to the socket,
//! and timers are ticked when the next deadline passes.

use super::engine::{InboundPacket, Phase1Engine};
use super::ikev1::main_mode::Outcome;
use super::ikev1::message::Cookie;
use super::sadb::Phase2Waiter;
use super::{Error, Result};
use oakley_platform::{Clock, QueuedTransport};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

/// Largest datagram accepted
const MAX_DATAGRAM: usize = 65536;

/// Phase 1 engine bound to a UDP socket
///
/// The bound address is reported to the engine as the local address of
/// every received datagram, so bind to a specific address rather than the
/// unspecified one when identities are derived from it.
///
/// # Example
///
/// ```rust,no_run
/// use oakley_platform::{QueuedTransport, SystemClock};
/// use oakley_proto::ipsec::config::EngineConfig;
/// use oakley_proto::ipsec::engine::Phase1Engine;
/// use oakley_proto::ipsec::udp::Phase1Endpoint;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = Phase1Engine::new(EngineConfig::default(), QueuedTransport::new(), SystemClock)?;
///     let mut endpoint = Phase1Endpoint::bind(engine, "192.0.2.1:500".parse()?).await?;
///
///     loop {
///         if let Some(outcome) = endpoint.step().await? {
///             println!("{:?}", outcome);
///         }
///     }
/// }
/// ```
pub struct Phase1Endpoint<C: Clock> {
    engine: Phase1Engine<QueuedTransport, C>,
    socket: UdpSocket,
    local_addr: SocketAddr,
    recv_buffer: Vec<u8>,
}

enum Wakeup {
    Datagram(usize, SocketAddr),
    Timer,
}

impl<C: Clock> Phase1Endpoint<C> {
    /// Bind the endpoint to `addr`
    ///
    /// # Errors
    ///
    /// Returns `Io` if the socket cannot be bound
    pub async fn bind(engine: Phase1Engine<QueuedTransport, C>, addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::Io(e.to_string()))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| Error::Io(e.to_string()))?;

        Ok(Phase1Endpoint {
            engine,
            socket,
            local_addr,
            recv_buffer: vec![0u8; MAX_DATAGRAM],
        })
    }

    /// Bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The engine
    pub fn engine(&self) -> &Phase1Engine<QueuedTransport, C> {
        &self.engine
    }

    /// The engine, mutably
    pub fn engine_mut(&mut self) -> &mut Phase1Engine<QueuedTransport, C> {
        &mut self.engine
    }

    /// Start an exchange with `remote` and send the first message
    pub async fn connect(
        &mut self,
        policy: &str,
        remote: SocketAddr,
        waiter: Option<Phase2Waiter>,
    ) -> Result<Cookie> {
        let (icookie, _) = self.engine.start_initiator(policy, remote, waiter)?;
        self.flush().await?;
        Ok(icookie)
    }

    /// Send every queued outbound datagram
    ///
    /// Returns the number of datagrams sent.
    pub async fn flush(&mut self) -> Result<usize> {
        let queued = self.engine.transport_mut().drain();
        for datagram in &queued {
            self.socket
                .send_to(&datagram.data, datagram.remote)
                .await
                .map_err(|e| Error::Io(e.to_string()))?;
            trace!(peer = %datagram.remote, size_bytes = datagram.data.len(), "datagram sent");
        }
        Ok(queued.len())
    }

    /// Fire expired timers and run queued removals
    pub async fn tick(&mut self) -> Result<()> {
        self.engine.poll_timers();
        self.engine.process_events();
        self.flush().await?;
        Ok(())
    }

    /// Wait for one datagram or the next timer deadline
    ///
    /// Returns the outcome of a received datagram, or `None` when a timer
    /// fired or the datagram was rejected before reaching an exchange.
    ///
    /// # Errors
    ///
    /// Only socket errors are returned; protocol errors are logged.
    pub async fn step(&mut self) -> Result<Option<Outcome>> {
        let deadline = self.engine.next_deadline();

        let wakeup = tokio::select! {
            received = self.socket.recv_from(&mut self.recv_buffer) => {
                let (len, remote) = received.map_err(|e| Error::Io(e.to_string()))?;
                Wakeup::Datagram(len, remote)
            }
            _ = sleep_until(deadline) => Wakeup::Timer,
        };

        match wakeup {
            Wakeup::Datagram(len, remote) => {
                let packet = InboundPacket {
                    data: self.recv_buffer[..len].to_vec(),
                    remote,
                    local: self.local_addr,
                };
                let outcome = match self.engine.process_inbound(packet) {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        debug!(peer = %remote, error = %e, "datagram dropped");
                        None
                    }
                };
                self.engine.process_events();
                self.flush().await?;
                Ok(outcome)
            }
            Wakeup::Timer => {
                self.tick().await?;
                Ok(None)
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
