//! Tunable parameters for both peers.
//!
//! Defaults: port 32000, 1024-character chunks, one second per
//! acknowledgment wait, five seconds for a greeted client to send its
//! request, and a client window ceiling of 3. The CLI overrides any of them.

use std::time::Duration;

use crate::message::{CHUNK_SIZE, DEFAULT_CEILING};

/// Well-known server port.
pub const DEFAULT_PORT: u16 = 32000;

/// Ceiling a client asks for when not told otherwise.
pub const DEFAULT_CLIENT_CEILING: usize = 3;

/// Parameters of the delivery loop.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// How long to wait for each chunk's acknowledgment.
    pub ack_timeout: Duration,
    /// Abort the transfer after this many collapsed rounds in a row.
    /// `None` retries forever.
    pub max_consecutive_collapses: Option<u32>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(1000),
            max_consecutive_collapses: None,
        }
    }
}

/// Server parameters.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Payload characters per chunk.
    pub chunk_size: usize,
    /// Ceiling applied when a `Hello` names none.
    pub default_ceiling: usize,
    /// A greeted peer that sends no `RequestData` for this long is dropped.
    pub session_timeout: Duration,
    pub delivery: DeliveryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            default_ceiling: DEFAULT_CEILING,
            session_timeout: Duration::from_secs(5),
            delivery: DeliveryConfig::default(),
        }
    }
}

/// Client parameters.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ceiling sent in `Hello`; `None` lets the server pick its default.
    pub ceiling: Option<usize>,
    /// Give up when the server is silent for this long. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ceiling: Some(DEFAULT_CLIENT_CEILING),
            idle_timeout: Some(Duration::from_secs(10)),
        }
    }
}
