//! Windowed reliable delivery (server side).
//!
//! [`Delivery`] pushes every chunk of a [`ChunkStore`] to one peer and
//! returns once all of them are acknowledged.
//!
//! # Round structure
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────────┐
//!  │ pick first `window` unacked chunks ──▶ send each as Data     │
//!  │        ▲                                     │               │
//!  │        │                                     ▼               │
//!  │  grow ×2 (≤ ceiling)            one bounded wait per chunk   │
//!  │  or collapse to 1  ◀── all of 1..=last acknowledged?         │
//!  └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - Each wait consumes at most one datagram. An `Ack` for the awaited
//!   chunk acknowledges it; an `Ack` for some other chunk acknowledges
//!   *that* chunk. Anything else, or nothing within the bound, is a miss.
//! - A missed chunk stays unacknowledged and is picked again by a later
//!   round. There is no per-chunk retry limit; the only optional stop is
//!   [`DeliveryConfig::max_consecutive_collapses`].
//! - Waits are sequential, so a round lasts up to `window × ack_timeout`.
//!
//! Fatal conditions end the transfer with a [`DeliveryError`]: the peer
//! sends `Error`, an `Ack` whose content does not parse, or any other kind.

use std::net::SocketAddr;

use thiserror::Error;

use crate::chunk_store::{AckOutcome, ChunkStore};
use crate::config::DeliveryConfig;
use crate::message::{ContentError, Message, MessageKind};
use crate::socket::{Channel, SocketError};
use crate::window::SlowStart;

// ---------------------------------------------------------------------------
// Errors / report
// ---------------------------------------------------------------------------

/// Reasons a transfer stops before every chunk is acknowledged.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("peer sent Error")]
    PeerAborted,
    #[error("malformed acknowledgment: {0}")]
    MalformedAck(#[from] ContentError),
    #[error("unexpected {0} message during delivery")]
    Unexpected(MessageKind),
    #[error("no progress after {0} consecutive collapsed rounds")]
    Stalled(u32),
    #[error(transparent)]
    Socket(#[from] SocketError),
}

impl DeliveryError {
    /// `true` when the peer should be told about the abort with `Error`.
    pub fn should_notify_peer(&self) -> bool {
        !matches!(self, DeliveryError::PeerAborted | DeliveryError::Socket(_))
    }
}

/// What a completed transfer looked like.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Number of chunks delivered.
    pub chunks: usize,
    /// `Data` messages sent, retransmissions included.
    pub transmissions: u64,
    /// Window size used by each round, in order.
    pub windows: Vec<usize>,
}

impl DeliveryReport {
    pub fn rounds(&self) -> usize {
        self.windows.len()
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// One transfer's delivery loop.
pub struct Delivery<'a, C> {
    channel: &'a mut C,
    peer: SocketAddr,
    store: &'a mut ChunkStore,
    window: SlowStart,
    config: &'a DeliveryConfig,
    report: DeliveryReport,
}

impl<'a, C: Channel> Delivery<'a, C> {
    /// Prepare to deliver `store` to `peer` with a window capped at `ceiling`.
    pub fn new(
        channel: &'a mut C,
        peer: SocketAddr,
        store: &'a mut ChunkStore,
        ceiling: usize,
        config: &'a DeliveryConfig,
    ) -> Self {
        let report = DeliveryReport {
            chunks: store.len(),
            ..Default::default()
        };
        Self {
            channel,
            peer,
            store,
            window: SlowStart::new(ceiling),
            config,
            report,
        }
    }

    /// Run rounds until no chunk remains unacknowledged.
    pub async fn run(mut self) -> Result<DeliveryReport, DeliveryError> {
        while self.store.has_unacknowledged() {
            self.round().await?;
        }
        log::info!(
            "[delivery] {} chunk(s) acknowledged in {} round(s), {} transmission(s)",
            self.report.chunks,
            self.report.rounds(),
            self.report.transmissions
        );
        Ok(self.report)
    }

    async fn round(&mut self) -> Result<(), DeliveryError> {
        let size = self.window.size();
        let batch = self.store.first_available(size);
        let Some(&last) = batch.last() else {
            return Ok(());
        };
        self.report.windows.push(size);

        for &seq in &batch {
            if let Some(record) = self.store.get(seq) {
                self.channel.send(&record.message, self.peer).await?;
                self.report.transmissions += 1;
                log::debug!("[delivery] → DATA seq={seq} window={size}");
            }
        }

        for &seq in &batch {
            // An earlier out-of-order Ack may already have covered it.
            if !self.store.is_acknowledged(seq) {
                self.await_ack(seq).await?;
            }
        }

        if self.store.prefix_acknowledged(last) {
            self.window.grow();
            log::debug!("[delivery] round ok; window {size} → {}", self.window.size());
        } else {
            self.window.collapse();
            log::debug!(
                "[delivery] round missed; window {size} → 1 ({} left)",
                self.store.remaining()
            );
            if let Some(max) = self.config.max_consecutive_collapses {
                let collapses = self.window.consecutive_collapses();
                if collapses >= max {
                    return Err(DeliveryError::Stalled(collapses));
                }
            }
        }
        Ok(())
    }

    /// One bounded wait for chunk `seq`'s acknowledgment.
    async fn await_ack(&mut self, seq: u16) -> Result<(), DeliveryError> {
        let (message, from) = match self.channel.recv(Some(self.config.ack_timeout)).await {
            Ok(Some(received)) => received,
            Ok(None) => {
                log::debug!("[delivery] no ACK for seq={seq} in time");
                return Ok(());
            }
            Err(e) if e.is_decode() => {
                log::warn!("[delivery] dropping undecodable datagram: {e}");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if from != self.peer {
            reject_intruder(&mut *self.channel, &message, from).await?;
            return Ok(());
        }

        match message.kind {
            MessageKind::Ack => {
                let acked = message.ack_seq()?;
                match self.store.acknowledge(acked) {
                    AckOutcome::Newly if acked == seq => {
                        log::debug!("[delivery] ← ACK seq={acked}");
                    }
                    AckOutcome::Newly => {
                        log::debug!("[delivery] ← ACK seq={acked} while waiting for {seq}");
                    }
                    AckOutcome::Already => {
                        log::debug!("[delivery] ← duplicate ACK seq={acked}");
                    }
                    AckOutcome::Unknown => {
                        log::warn!("[delivery] ← ACK for unknown seq={acked}; ignored");
                    }
                }
                Ok(())
            }
            MessageKind::Error => Err(DeliveryError::PeerAborted),
            other => Err(DeliveryError::Unexpected(other)),
        }
    }
}

/// Answer a datagram from someone other than the session peer.
///
/// The active session is left untouched; the sender gets `Error` unless it
/// sent `Error` itself.
pub(crate) async fn reject_intruder<C: Channel>(
    channel: &mut C,
    message: &Message,
    from: SocketAddr,
) -> Result<(), SocketError> {
    log::warn!("rejecting {} from {from}: a session is already active", message.kind);
    if message.kind != MessageKind::Error {
        channel.send(&Message::error(), from).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use super::*;
    use crate::simulator::{MemoryChannel, MemoryNetwork};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    const SERVER: u16 = 32000;
    const CLIENT: u16 = 40000;

    fn config() -> DeliveryConfig {
        DeliveryConfig {
            ack_timeout: Duration::from_millis(100),
            max_consecutive_collapses: None,
        }
    }

    /// How the scripted client misbehaves.
    #[derive(Default)]
    struct Script {
        /// Swallow the first ack for each of these seqs.
        drop_once: Vec<u16>,
        /// Send the first ack for each of these seqs only after the next one.
        hold_once: Vec<u16>,
    }

    fn take(list: &mut Vec<u16>, seq: u16) -> bool {
        match list.iter().position(|&s| s == seq) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Ack `Data` until `total` distinct chunks have been acknowledged.
    /// Returns the order in which `Data` seqs arrived.
    async fn scripted_client(mut ch: MemoryChannel, total: usize, mut script: Script) -> Vec<u16> {
        let mut acked = BTreeSet::new();
        let mut seen = Vec::new();
        let mut held = None;
        while acked.len() < total {
            let (msg, _) = ch
                .recv(Some(Duration::from_secs(30)))
                .await
                .unwrap()
                .expect("server went quiet");
            let (seq, _) = msg.data_parts().unwrap();
            seen.push(seq);
            if take(&mut script.drop_once, seq) {
                continue;
            }
            if take(&mut script.hold_once, seq) {
                held = Some(seq);
                continue;
            }
            ch.send(&Message::ack(seq), addr(SERVER)).await.unwrap();
            acked.insert(seq);
            if let Some(late) = held.take() {
                ch.send(&Message::ack(late), addr(SERVER)).await.unwrap();
                acked.insert(late);
            }
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn clean_run_doubles_to_ceiling() {
        let net = MemoryNetwork::new();
        let mut server = net.endpoint(addr(SERVER));
        let client = net.endpoint(addr(CLIENT));
        let mut store = ChunkStore::segment("abcdefghij", 1).unwrap();
        let cfg = config();

        let delivery = Delivery::new(&mut server, addr(CLIENT), &mut store, 4, &cfg);
        let (report, seen) = tokio::join!(
            delivery.run(),
            scripted_client(client, 10, Script::default())
        );
        let report = report.unwrap();

        assert_eq!(report.windows, vec![1, 2, 4, 4]);
        assert_eq!(report.transmissions, 10);
        assert_eq!(seen, (1..=10).collect::<Vec<_>>());
        assert!(!store.has_unacknowledged());
    }

    #[tokio::test(start_paused = true)]
    async fn missed_ack_collapses_window_then_regrows() {
        // ceiling 3, seven chunks, chunk 3's first ack lost.
        let net = MemoryNetwork::new();
        let mut server = net.endpoint(addr(SERVER));
        let client = net.endpoint(addr(CLIENT));
        let mut store = ChunkStore::segment("1234567", 1).unwrap();
        let cfg = config();

        let script = Script {
            drop_once: vec![3],
            ..Default::default()
        };
        let delivery = Delivery::new(&mut server, addr(CLIENT), &mut store, 3, &cfg);
        let (report, seen) = tokio::join!(delivery.run(), scripted_client(client, 7, script));
        let report = report.unwrap();

        // {1} ok → 2; {2,3} miss → 1; {3} ok → 2; {4,5} ok → 3; {6,7} ok.
        assert_eq!(report.windows, vec![1, 2, 1, 2, 3]);
        assert_eq!(seen, vec![1, 2, 3, 3, 4, 5, 6, 7]);
        assert!(report.windows.iter().all(|&w| (1..=3).contains(&w)));
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_ack_is_recorded_but_round_still_misses() {
        let net = MemoryNetwork::new();
        let mut server = net.endpoint(addr(SERVER));
        let client = net.endpoint(addr(CLIENT));
        let mut store = ChunkStore::segment("abc", 1).unwrap();
        let cfg = config();

        let script = Script {
            hold_once: vec![2],
            ..Default::default()
        };
        let delivery = Delivery::new(&mut server, addr(CLIENT), &mut store, 4, &cfg);
        let (report, _) = tokio::join!(delivery.run(), scripted_client(client, 3, script));
        let report = report.unwrap();

        // Round 2 sends {2,3}; ack 3 arrives while waiting for 2, so chunk 3
        // is done but chunk 2 is missed. Round 3 resends only chunk 2.
        assert_eq!(report.windows, vec![1, 2, 1]);
        assert_eq!(report.transmissions, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_error_aborts() {
        let net = MemoryNetwork::new();
        let mut server = net.endpoint(addr(SERVER));
        let mut client = net.endpoint(addr(CLIENT));
        let mut store = ChunkStore::segment("abc", 1).unwrap();
        let cfg = config();

        let peer = async {
            let _ = client.recv(None).await.unwrap();
            client.send(&Message::error(), addr(SERVER)).await.unwrap();
        };
        let delivery = Delivery::new(&mut server, addr(CLIENT), &mut store, 4, &cfg);
        let (result, ()) = tokio::join!(delivery.run(), peer);

        let err = result.unwrap_err();
        assert!(matches!(err, DeliveryError::PeerAborted));
        assert!(!err.should_notify_peer());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_ack_aborts() {
        let net = MemoryNetwork::new();
        let mut server = net.endpoint(addr(SERVER));
        let mut client = net.endpoint(addr(CLIENT));
        let mut store = ChunkStore::segment("abc", 1).unwrap();
        let cfg = config();

        let peer = async {
            let _ = client.recv(None).await.unwrap();
            let bogus = Message {
                kind: MessageKind::Ack,
                content: Some("one".into()),
            };
            client.send(&bogus, addr(SERVER)).await.unwrap();
        };
        let delivery = Delivery::new(&mut server, addr(CLIENT), &mut store, 4, &cfg);
        let (result, ()) = tokio::join!(delivery.run(), peer);

        let err = result.unwrap_err();
        assert!(matches!(err, DeliveryError::MalformedAck(_)));
        assert!(err.should_notify_peer());
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_kind_from_peer_aborts() {
        let net = MemoryNetwork::new();
        let mut server = net.endpoint(addr(SERVER));
        let mut client = net.endpoint(addr(CLIENT));
        let mut store = ChunkStore::segment("abc", 1).unwrap();
        let cfg = config();

        let peer = async {
            let _ = client.recv(None).await.unwrap();
            client.send(&Message::hello(None), addr(SERVER)).await.unwrap();
        };
        let delivery = Delivery::new(&mut server, addr(CLIENT), &mut store, 4, &cfg);
        let (result, ()) = tokio::join!(delivery.run(), peer);

        assert!(matches!(
            result.unwrap_err(),
            DeliveryError::Unexpected(MessageKind::Hello)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_stalls_when_limit_set() {
        let net = MemoryNetwork::new();
        let mut server = net.endpoint(addr(SERVER));
        let _client = net.endpoint(addr(CLIENT));
        let mut store = ChunkStore::segment("abc", 1).unwrap();
        let cfg = DeliveryConfig {
            max_consecutive_collapses: Some(3),
            ..config()
        };

        let result = Delivery::new(&mut server, addr(CLIENT), &mut store, 4, &cfg)
            .run()
            .await;

        assert!(matches!(result.unwrap_err(), DeliveryError::Stalled(3)));
        assert_eq!(store.remaining(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn intruder_hello_is_rejected_without_touching_the_store() {
        let net = MemoryNetwork::new();
        let mut server = net.endpoint(addr(SERVER));
        let client = net.endpoint(addr(CLIENT));
        let mut intruder = net.endpoint(addr(CLIENT + 1));
        let mut store = ChunkStore::segment("ab", 1).unwrap();
        let cfg = config();

        intruder
            .send(&Message::hello(Some(9)), addr(SERVER))
            .await
            .unwrap();

        let delivery = Delivery::new(&mut server, addr(CLIENT), &mut store, 4, &cfg);
        let (report, _) = tokio::join!(
            delivery.run(),
            scripted_client(client, 2, Script::default())
        );

        let report = report.unwrap();
        assert_eq!(report.chunks, 2);
        assert!(!store.has_unacknowledged());
        let (reply, from) = intruder.recv(Some(Duration::from_secs(1))).await.unwrap().unwrap();
        assert_eq!(reply, Message::error());
        assert_eq!(from, addr(SERVER));
    }

    #[tokio::test]
    async fn empty_store_needs_no_rounds() {
        let net = MemoryNetwork::new();
        let mut server = net.endpoint(addr(SERVER));
        let mut store = ChunkStore::segment("", 1).unwrap();
        let cfg = config();

        let report = Delivery::new(&mut server, addr(CLIENT), &mut store, 4, &cfg)
            .run()
            .await
            .unwrap();
        assert_eq!(report.rounds(), 0);
        assert_eq!(report.transmissions, 0);
    }
}
