//! `udp-transfer`: reliable, ordered file transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!   Client                                          Server
//!  ┌──────────┐  Hello / RequestData / Ack   ┌──────────────────┐
//!  │ Assembly │─────────────────────────────▶│ Session          │
//!  │ (BTree)  │                              │  ├ SessionState  │
//!  └────┬─────┘◀─────────────────────────────│  ├ ChunkStore    │
//!       │      Welcome / Data / End / Error  │  └ Delivery      │
//!       │                                    │     └ SlowStart  │
//!  ┌────▼─────┐                              └────────┬─────────┘
//!  │ Channel  │◀──────── datagrams (lossy) ──────────▶│ Channel │
//!  └──────────┘                                        └─────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`message`]: message kinds, content rules, JSON codec
//! - [`socket`]: `Channel` trait and the UDP implementation
//! - [`simulator`]: in-process network and fault injection for tests
//! - [`state`]: session state machine shared by both roles
//! - [`chunk_store`]: server-side chunks and acknowledgment flags
//! - [`window`]: slow-start window size
//! - [`delivery`]: windowed send/ack loop
//! - [`assembly`]: client-side reassembly
//! - [`resource`]: resource lookup and output persistence
//! - [`config`]: tunables for both peers
//! - [`server`]: server session loop
//! - [`client`]: client session

pub mod assembly;
pub mod chunk_store;
pub mod client;
pub mod config;
pub mod delivery;
pub mod message;
pub mod resource;
pub mod server;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod window;

pub use client::{Client, ClientError, ClientReport};
pub use config::{ClientConfig, DeliveryConfig, ServerConfig};
pub use message::{Message, MessageKind};
pub use server::{Server, ServerError, SessionFailure, SessionOutcome};
pub use socket::{Channel, Socket, SocketError};
