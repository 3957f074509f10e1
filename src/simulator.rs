//! In-process network and fault injection for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate datagrams. To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! this module provides:
//!
//! - [`MemoryNetwork`]: an in-process datagram "switch". Every
//!   [`MemoryChannel`] endpoint registered on it gets an address; sends to an
//!   unregistered address vanish, exactly like UDP to a closed port.
//! - [`Simulator`]: wraps any [`Channel`] and applies a configurable fault
//!   model to outbound messages:
//!
//! | Fault            | Description                                        |
//! |------------------|----------------------------------------------------|
//! | Loss             | Drop a message with probability `loss_rate`.       |
//! | Reordering       | Hold a message back until after the next send.     |
//! | Duplication      | Deliver a message twice.                           |
//!
//! Faults are drawn from a seeded RNG so a failing run can be replayed.
//! Wrapping both peers' channels makes both directions lossy.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::message::{Message, MessageKind};
use crate::socket::{Channel, SocketError};

type Datagram = (Vec<u8>, SocketAddr);

// ---------------------------------------------------------------------------
// MemoryNetwork / MemoryChannel
// ---------------------------------------------------------------------------

/// A loss-free in-process datagram network.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    routes: Arc<Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint at `addr`, replacing any previous one.
    pub fn endpoint(&self, addr: SocketAddr) -> MemoryChannel {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(addr, tx);
        MemoryChannel {
            local: addr,
            network: self.clone(),
            inbox: rx,
        }
    }

    fn deliver(&self, datagram: Vec<u8>, from: SocketAddr, dest: SocketAddr) {
        let routes = self
            .routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match routes.get(&dest) {
            Some(tx) => {
                // A closed inbox is the same as nobody listening.
                let _ = tx.send((datagram, from));
            }
            None => log::trace!("no endpoint at {dest}; datagram dropped"),
        }
    }
}

/// One endpoint on a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryChannel {
    local: SocketAddr,
    network: MemoryNetwork,
    inbox: mpsc::UnboundedReceiver<Datagram>,
}

impl MemoryChannel {
    /// Send raw bytes that bypass the message codec.
    pub fn send_raw(&self, bytes: &[u8], dest: SocketAddr) {
        self.network.deliver(bytes.to_vec(), self.local, dest);
    }

    async fn recv_one(&mut self) -> Result<(Message, SocketAddr), SocketError> {
        let (bytes, from) = self.inbox.recv().await.ok_or(SocketError::Closed)?;
        Ok((Message::decode(&bytes)?, from))
    }
}

impl Channel for MemoryChannel {
    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    async fn send(&mut self, message: &Message, dest: SocketAddr) -> Result<(), SocketError> {
        let bytes = message.encode()?;
        self.network.deliver(bytes, self.local, dest);
        Ok(())
    }

    async fn recv(
        &mut self,
        wait: Option<Duration>,
    ) -> Result<Option<(Message, SocketAddr)>, SocketError> {
        match wait {
            None => self.recv_one().await.map(Some),
            Some(bound) => match timeout(bound, self.recv_one()).await {
                Ok(result) => result.map(Some),
                Err(_elapsed) => Ok(None),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given message is silently dropped.
    pub loss_rate: f64,
    /// Probability that a message is held back behind the next one.
    pub reorder_rate: f64,
    /// Probability that a message is delivered twice.
    pub duplicate_rate: f64,
    /// Restrict faults to `Data` and `Ack`; control messages pass untouched.
    pub data_plane_only: bool,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            duplicate_rate: 0.0,
            data_plane_only: true,
            seed: 0,
        }
    }
}

/// A fault-injecting wrapper around another channel.
pub struct Simulator<C> {
    pub config: SimulatorConfig,
    inner: C,
    rng: StdRng,
    held: Option<(Message, SocketAddr)>,
    /// Messages dropped so far.
    pub dropped: u64,
    /// Extra copies delivered so far.
    pub duplicated: u64,
}

impl<C: Channel> Simulator<C> {
    pub fn new(inner: C, mut config: SimulatorConfig) -> Self {
        config.loss_rate = config.loss_rate.clamp(0.0, 1.0);
        config.reorder_rate = config.reorder_rate.clamp(0.0, 1.0);
        config.duplicate_rate = config.duplicate_rate.clamp(0.0, 1.0);
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            inner,
            rng,
            held: None,
            dropped: 0,
            duplicated: 0,
        }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    fn faulty(&self, message: &Message) -> bool {
        !self.config.data_plane_only
            || matches!(message.kind, MessageKind::Data | MessageKind::Ack)
    }
}

impl<C: Channel> Channel for Simulator<C> {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    async fn send(&mut self, message: &Message, dest: SocketAddr) -> Result<(), SocketError> {
        if !self.faulty(message) {
            return self.inner.send(message, dest).await;
        }

        if self.rng.random_bool(self.config.loss_rate) {
            self.dropped += 1;
            log::debug!("[sim] dropped {} to {dest}", message.kind);
        } else if self.held.is_none() && self.rng.random_bool(self.config.reorder_rate) {
            log::debug!("[sim] holding back {} to {dest}", message.kind);
            self.held = Some((message.clone(), dest));
            return Ok(());
        } else {
            self.inner.send(message, dest).await?;
            if self.rng.random_bool(self.config.duplicate_rate) {
                self.duplicated += 1;
                log::debug!("[sim] duplicated {} to {dest}", message.kind);
                self.inner.send(message, dest).await?;
            }
        }

        if let Some((late, late_dest)) = self.held.take() {
            self.inner.send(&late, late_dest).await?;
        }
        Ok(())
    }

    async fn recv(
        &mut self,
        wait: Option<Duration>,
    ) -> Result<Option<(Message, SocketAddr)>, SocketError> {
        self.inner.recv(wait).await
    }
}
