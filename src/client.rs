//! Client driver: fetch one resource and persist it.
//!
//! The client says `Hello`, answers `Welcome` with `RequestData`, acks every
//! `Data` it is sent, and on `End` writes the reassembled content to its
//! [`OutputSink`]. Legality of each inbound message is decided by the
//! shared [`SessionState`] machine; a message the current state does not
//! accept aborts the session with `Error`.

use std::net::SocketAddr;

use thiserror::Error;

use crate::assembly::{Assembly, AssemblyError, Insert};
use crate::config::ClientConfig;
use crate::message::{ContentError, Message, MessageKind};
use crate::resource::OutputSink;
use crate::socket::{Channel, SocketError};
use crate::state::{SequenceError, SessionState, Step};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{0}")]
    Sequence(#[from] SequenceError),
    #[error("server sent {0}, which a client never accepts")]
    Unexpected(MessageKind),
    #[error("{0}")]
    Content(#[from] ContentError),
    #[error("{0}")]
    Assembly(#[from] AssemblyError),
    #[error("server sent Error")]
    PeerAborted,
    #[error("server silent for too long")]
    TimedOut,
    #[error("could not persist output: {0}")]
    Persist(#[source] std::io::Error),
    #[error(transparent)]
    Socket(#[from] SocketError),
}

impl ClientError {
    /// `true` when the server should receive `Error` for this failure.
    pub fn should_notify_peer(&self) -> bool {
        !matches!(
            self,
            ClientError::PeerAborted
                | ClientError::TimedOut
                | ClientError::Persist(_)
                | ClientError::Socket(_)
        )
    }
}

/// Summary of a completed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReport {
    /// Distinct chunks received.
    pub chunks: usize,
    /// `Data` messages that repeated an already stored chunk.
    pub duplicates: u64,
    /// Characters persisted.
    pub chars: usize,
}

pub struct Client<C, S> {
    channel: C,
    server: SocketAddr,
    sink: S,
    config: ClientConfig,
}

impl<C: Channel, S: OutputSink> Client<C, S> {
    pub fn new(channel: C, server: SocketAddr, sink: S, config: ClientConfig) -> Self {
        Self {
            channel,
            server,
            sink,
            config,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run one session that transfers `resource`.
    pub async fn fetch(&mut self, resource: &str) -> Result<ClientReport, ClientError> {
        let mut state = SessionState::default();
        let result = self.session(resource, &mut state).await;
        if let Err(e) = &result {
            state.fail();
            if e.should_notify_peer() {
                if let Err(send_err) = self.channel.send(&Message::error(), self.server).await {
                    log::warn!("[client] could not send Error: {send_err}");
                }
            }
        }
        log::debug!("[client] session ended in {state}");
        result
    }

    async fn session(
        &mut self,
        resource: &str,
        state: &mut SessionState,
    ) -> Result<ClientReport, ClientError> {
        let mut assembly = Assembly::new();
        let mut duplicates = 0u64;

        self.channel
            .send(&Message::hello(self.config.ceiling), self.server)
            .await?;
        state.advance(Step::Greet)?;
        log::info!("[client] → HELLO {} (ceiling {:?})", self.server, self.config.ceiling);

        loop {
            let (message, from) = match self.channel.recv(self.config.idle_timeout).await {
                Ok(Some(received)) => received,
                Ok(None) => return Err(ClientError::TimedOut),
                Err(e) if e.is_decode() => {
                    log::warn!("[client] dropping undecodable datagram: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if from != self.server {
                log::debug!("[client] ignoring {} from stranger {from}", message.kind);
                continue;
            }

            match message.kind {
                MessageKind::Welcome => {
                    state.advance(Step::Welcome)?;
                    self.channel
                        .send(&Message::request_data(resource), self.server)
                        .await?;
                    state.advance(Step::Request)?;
                    log::info!("[client] ← WELCOME; → REQUEST {resource:?}");
                }
                MessageKind::Data => {
                    let next = state.next(Step::Transfer)?;
                    let (seq, payload) = message.data_parts()?;
                    if assembly.insert(seq, payload)? == Insert::Duplicate {
                        duplicates += 1;
                    }
                    *state = next;
                    self.channel.send(&Message::ack(seq), self.server).await?;
                    log::debug!("[client] ← DATA seq={seq}; → ACK");
                }
                MessageKind::End => {
                    state.advance(Step::Complete)?;
                    let content = assembly.assemble()?;
                    self.sink
                        .persist(&content)
                        .await
                        .map_err(ClientError::Persist)?;
                    log::info!(
                        "[client] ← END; wrote {} chunk(s) ({duplicates} duplicate(s))",
                        assembly.len()
                    );
                    return Ok(ClientReport {
                        chunks: assembly.len(),
                        duplicates,
                        chars: content.chars().count(),
                    });
                }
                MessageKind::Error => return Err(ClientError::PeerAborted),
                kind => return Err(ClientError::Unexpected(kind)),
            }
        }
    }
}
