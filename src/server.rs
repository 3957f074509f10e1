//! Server driver: one session at a time, forever.
//!
//! ```text
//!  run() ──▶ serve_session() ──▶ await Hello (Idle; Ack/Error ignored, rest → Error)
//!   ▲              │
//!   │              ▼
//!   │        Session context (peer, state, ceiling, chunk store)
//!   │              │  Welcome → await RequestData → segment → Delivery → End
//!   │              ▼
//!   └──── Completed / Failed: context dropped, loop builds a fresh one
//! ```
//!
//! Everything a session knows lives in its [`Session`] value, so a reset is
//! simply dropping it. Protocol violations end the session (with `Error` to
//! the peer where appropriate) but never the server. A socket error while
//! idle is logged and [`Server::run`] goes back to listening after
//! [`IDLE_ERROR_BACKOFF`].

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::chunk_store::{ChunkError, ChunkStore};
use crate::config::ServerConfig;
use crate::delivery::{reject_intruder, Delivery, DeliveryError, DeliveryReport};
use crate::message::{ContentError, Message, MessageKind};
use crate::resource::{ResourceError, ResourceProvider};
use crate::socket::{Channel, SocketError};
use crate::state::{SequenceError, SessionState, Step};

/// Pause before listening again after a receive error while idle.
pub const IDLE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Errors / outcomes
// ---------------------------------------------------------------------------

/// A socket failure while waiting for the next `Hello`.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Socket(#[from] SocketError),
}

/// Why a session ended without completing.
#[derive(Error, Debug)]
pub enum SessionFailure {
    #[error("{0}")]
    Sequence(#[from] SequenceError),
    #[error("unexpected {kind} in state {state}")]
    Unexpected {
        kind: MessageKind,
        state: SessionState,
    },
    #[error("{0}")]
    Content(#[from] ContentError),
    #[error("{0}")]
    Resource(#[from] ResourceError),
    #[error("{0}")]
    Chunks(#[from] ChunkError),
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("peer sent Error")]
    PeerAborted,
    #[error("peer silent for too long")]
    TimedOut,
    #[error(transparent)]
    Socket(#[from] SocketError),
}

impl SessionFailure {
    /// `true` when the peer should receive `Error` for this failure.
    pub fn should_notify_peer(&self) -> bool {
        match self {
            SessionFailure::PeerAborted | SessionFailure::Socket(_) => false,
            SessionFailure::Delivery(e) => e.should_notify_peer(),
            _ => true,
        }
    }
}

/// How one session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    Completed {
        peer: SocketAddr,
        resource: String,
        report: DeliveryReport,
    },
    Failed {
        peer: SocketAddr,
        failure: SessionFailure,
    },
}

// ---------------------------------------------------------------------------
// Session context
// ---------------------------------------------------------------------------

/// Per-session state. Built on `Hello`, dropped when the session ends.
#[derive(Debug)]
pub struct Session {
    pub peer: SocketAddr,
    pub state: SessionState,
    pub ceiling: usize,
    pub store: Option<ChunkStore>,
}

impl Session {
    fn new(peer: SocketAddr, ceiling: usize) -> Self {
        Self {
            peer,
            state: SessionState::Idle,
            ceiling,
            store: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct Server<C, R> {
    channel: C,
    resources: R,
    config: ServerConfig,
}

impl<C: Channel, R: ResourceProvider> Server<C, R> {
    /// Zero `chunk_size` or `default_ceiling` are raised to 1.
    pub fn new(channel: C, resources: R, mut config: ServerConfig) -> Self {
        config.chunk_size = config.chunk_size.max(1);
        config.default_ceiling = config.default_ceiling.max(1);
        Self {
            channel,
            resources,
            config,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.channel.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve sessions forever.
    pub async fn run(&mut self) {
        log::info!("[server] listening on {}", self.local_addr());
        loop {
            let outcome = match self.serve_session().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::warn!("[server] {e}; listening again");
                    tokio::time::sleep(IDLE_ERROR_BACKOFF).await;
                    continue;
                }
            };
            match outcome {
                SessionOutcome::Completed {
                    peer,
                    resource,
                    report,
                } => log::info!(
                    "[server] sent {resource:?} to {peer}: {} chunk(s), {} transmission(s)",
                    report.chunks,
                    report.transmissions
                ),
                SessionOutcome::Failed { peer, failure } => {
                    log::warn!("[server] session with {peer} aborted: {failure}")
                }
            }
        }
    }

    /// Wait for the next `Hello` and run that session to its end.
    pub async fn serve_session(&mut self) -> Result<SessionOutcome, ServerError> {
        let (hello, peer) = self.await_hello().await?;
        let mut session = Session::new(peer, self.config.default_ceiling);

        let outcome = match self.drive(&mut session, &hello).await {
            Ok((resource, report)) => SessionOutcome::Completed {
                peer,
                resource,
                report,
            },
            Err(failure) => {
                session.state.fail();
                if failure.should_notify_peer() {
                    if let Err(e) = self.channel.send(&Message::error(), peer).await {
                        log::warn!("[server] could not send Error to {peer}: {e}");
                    }
                }
                SessionOutcome::Failed { peer, failure }
            }
        };
        log::debug!("[server] session with {peer} ended in {}", session.state);
        Ok(outcome)
    }

    /// Block (no timeout) until some peer says `Hello`.
    async fn await_hello(&mut self) -> Result<(Message, SocketAddr), ServerError> {
        loop {
            let (message, from) = match self.channel.recv(None).await {
                Ok(Some(received)) => received,
                Ok(None) => continue,
                Err(e) if e.is_decode() => {
                    log::warn!("[server] dropping undecodable datagram: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            log::debug!("[server] ← {} from {from} while idle", message.kind);
            match message.kind {
                MessageKind::Hello => return Ok((message, from)),
                // Late acks from a finished transfer.
                MessageKind::Error | MessageKind::Ack => {}
                _ => self.channel.send(&Message::error(), from).await?,
            }
        }
    }

    async fn drive(
        &mut self,
        session: &mut Session,
        hello: &Message,
    ) -> Result<(String, DeliveryReport), SessionFailure> {
        let peer = session.peer;

        // Idle → Greeted → Ready
        if let Some(ceiling) = hello.ceiling()? {
            session.ceiling = ceiling;
        }
        session.state.advance(Step::Greet)?;
        self.channel.send(&Message::welcome(), peer).await?;
        session.state.advance(Step::Welcome)?;
        log::info!("[server] greeted {peer}; window ceiling {}", session.ceiling);

        // Ready → Requesting
        let request = self.await_request(session).await?;
        let resource = request.resource()?.to_owned();
        let content = self.resources.open(&resource).await?;
        let store = ChunkStore::segment(&content, self.config.chunk_size)?;
        session.state.advance(Step::Request)?;
        log::info!("[server] {peer} requested {resource:?}: {} chunk(s)", store.len());

        // Requesting → Transferring → Completed
        session.state.advance(Step::Transfer)?;
        let store = session.store.insert(store);
        let report = Delivery::new(
            &mut self.channel,
            peer,
            store,
            session.ceiling,
            &self.config.delivery,
        )
        .run()
        .await?;

        self.channel.send(&Message::end(), peer).await?;
        session.state.advance(Step::Complete)?;
        Ok((resource, report))
    }

    /// While `Ready`, wait for the peer's `RequestData`.
    ///
    /// The peer gets `session_timeout` in total; datagrams from anyone else
    /// do not extend it.
    async fn await_request(&mut self, session: &Session) -> Result<Message, SessionFailure> {
        let deadline = Instant::now() + self.config.session_timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(SessionFailure::TimedOut);
            }
            let (message, from) = match self.channel.recv(Some(left)).await {
                Ok(Some(received)) => received,
                Ok(None) => return Err(SessionFailure::TimedOut),
                Err(e) if e.is_decode() => {
                    log::warn!("[server] dropping undecodable datagram: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if from != session.peer {
                reject_intruder(&mut self.channel, &message, from).await?;
                continue;
            }

            return match message.kind {
                MessageKind::RequestData => {
                    session.state.next(Step::Request)?;
                    Ok(message)
                }
                MessageKind::Error => Err(SessionFailure::PeerAborted),
                kind => Err(SessionFailure::Unexpected {
                    kind,
                    state: session.state,
                }),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_that_are_not_reported_back() {
        assert!(!SessionFailure::PeerAborted.should_notify_peer());
        assert!(!SessionFailure::Delivery(DeliveryError::PeerAborted).should_notify_peer());
        assert!(SessionFailure::TimedOut.should_notify_peer());
        assert!(SessionFailure::Delivery(DeliveryError::Stalled(3)).should_notify_peer());
        assert!(SessionFailure::Resource(ResourceError::NotFound("x".into())).should_notify_peer());
    }
}
