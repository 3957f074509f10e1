//! Protocol message model and wire codec.
//!
//! Every datagram exchanged between peers carries exactly one [`Message`].
//! This module is responsible for:
//! - Defining the message kinds and the meaning of each kind's content.
//! - Serialising a [`Message`] into a datagram and back (JSON, one object
//!   per datagram, no framing).
//! - Parsing the structured parts of a message's content: the window
//!   ceiling of `Hello`, the sequence number and payload of `Data`, the
//!   sequence number of `Ack`.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! ```text
//! {"Type":"Hello","Content":"5"}
//! {"Type":"Welcome"}
//! {"Type":"RequestData","Content":"notes.txt"}
//! {"Type":"Data","Content":"0001<up to 1024 characters of payload>"}
//! {"Type":"Ack","Content":"0001"}
//! {"Type":"End"}
//! {"Type":"Error"}
//! ```
//!
//! Sequence numbers are 1-based and always written as exactly
//! [`SEQ_WIDTH`] zero-padded decimal digits, which caps a transfer at
//! [`MAX_SEQ`] chunks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of payload characters carried by one `Data` message.
pub const CHUNK_SIZE: usize = 1024;

/// Width of the zero-padded sequence number prefix.
pub const SEQ_WIDTH: usize = 4;

/// Largest sequence number representable in [`SEQ_WIDTH`] digits.
pub const MAX_SEQ: u16 = 9999;

/// Window ceiling used when a `Hello` does not carry one.
pub const DEFAULT_CEILING: usize = 20;

// ---------------------------------------------------------------------------
// Message kinds
// ---------------------------------------------------------------------------

/// The kind of a protocol message.
///
/// Kinds that a peer does not know decode as [`MessageKind::Unrecognized`]
/// rather than failing, so the state machines can answer them with `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Client → server: start a session, optionally naming a window ceiling.
    Hello,
    /// Server → client: handshake accepted.
    Welcome,
    /// Client → server: transfer the named resource.
    RequestData,
    /// Server → client: one chunk.
    Data,
    /// Client → server: one chunk received.
    Ack,
    /// Server → client: every chunk has been acknowledged.
    End,
    /// Either direction: abort the current session.
    Error,
    /// Any kind name not listed above.
    Unrecognized,
}

impl MessageKind {
    fn as_str(self) -> &'static str {
        match self {
            MessageKind::Hello => "Hello",
            MessageKind::Welcome => "Welcome",
            MessageKind::RequestData => "RequestData",
            MessageKind::Data => "Data",
            MessageKind::Ack => "Ack",
            MessageKind::End => "End",
            MessageKind::Error => "Error",
            MessageKind::Unrecognized => "Unrecognized",
        }
    }
}

impl From<String> for MessageKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Hello" => MessageKind::Hello,
            "Welcome" => MessageKind::Welcome,
            "RequestData" => MessageKind::RequestData,
            "Data" => MessageKind::Data,
            "Ack" => MessageKind::Ack,
            "End" => MessageKind::End,
            "Error" => MessageKind::Error,
            _ => MessageKind::Unrecognized,
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_owned()
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A complete protocol message: kind + optional content string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "Type")]
    pub kind: MessageKind,
    #[serde(rename = "Content", default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Message {
    fn bare(kind: MessageKind) -> Self {
        Self { kind, content: None }
    }

    /// `Hello`, carrying the requested window ceiling if any.
    pub fn hello(ceiling: Option<usize>) -> Self {
        Self {
            kind: MessageKind::Hello,
            content: ceiling.map(|c| c.to_string()),
        }
    }

    pub fn welcome() -> Self {
        Self::bare(MessageKind::Welcome)
    }

    /// `RequestData` for the resource named `resource`.
    pub fn request_data(resource: &str) -> Self {
        Self {
            kind: MessageKind::RequestData,
            content: Some(resource.to_owned()),
        }
    }

    /// `Data` carrying chunk `seq`: the padded sequence number followed by
    /// the payload.
    pub fn data(seq: u16, payload: &str) -> Self {
        let mut content = String::with_capacity(SEQ_WIDTH + payload.len());
        content.push_str(&format_seq(seq));
        content.push_str(payload);
        Self {
            kind: MessageKind::Data,
            content: Some(content),
        }
    }

    pub fn ack(seq: u16) -> Self {
        Self {
            kind: MessageKind::Ack,
            content: Some(format_seq(seq)),
        }
    }

    pub fn end() -> Self {
        Self::bare(MessageKind::End)
    }

    pub fn error() -> Self {
        Self::bare(MessageKind::Error)
    }

    /// Window ceiling requested by a `Hello`.
    ///
    /// Absent or blank content yields `Ok(None)` (the receiver applies its
    /// default). Anything other than a positive decimal integer is an error.
    pub fn ceiling(&self) -> Result<Option<usize>, ContentError> {
        let raw = match self.content.as_deref().map(str::trim) {
            None | Some("") => return Ok(None),
            Some(raw) => raw,
        };
        match raw.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(Some(n)),
            _ => Err(ContentError::InvalidCeiling(raw.to_owned())),
        }
    }

    /// Resource identifier named by a `RequestData`.
    pub fn resource(&self) -> Result<&str, ContentError> {
        match self.content.as_deref() {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => Err(ContentError::Missing { kind: self.kind }),
        }
    }

    /// Split a `Data` message's content into `(seq, payload)`.
    pub fn data_parts(&self) -> Result<(u16, &str), ContentError> {
        let content = self
            .content
            .as_deref()
            .ok_or(ContentError::Missing { kind: self.kind })?;
        let prefix = content
            .get(..SEQ_WIDTH)
            .ok_or_else(|| ContentError::InvalidSequence(content.to_owned()))?;
        let seq = parse_seq(prefix)?;
        Ok((seq, &content[SEQ_WIDTH..]))
    }

    /// Sequence number acknowledged by an `Ack`.
    pub fn ack_seq(&self) -> Result<u16, ContentError> {
        let content = self
            .content
            .as_deref()
            .ok_or(ContentError::Missing { kind: self.kind })?;
        parse_seq(content)
    }

    /// Serialise into a single datagram.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse one datagram. Each datagram decodes independently of any other.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(buf)?)
    }
}

/// Render `seq` as exactly [`SEQ_WIDTH`] zero-padded digits.
pub fn format_seq(seq: u16) -> String {
    format!("{seq:0width$}", width = SEQ_WIDTH)
}

/// Parse exactly [`SEQ_WIDTH`] decimal digits into a sequence number in
/// `1..=MAX_SEQ`.
pub fn parse_seq(raw: &str) -> Result<u16, ContentError> {
    if raw.len() != SEQ_WIDTH || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ContentError::InvalidSequence(raw.to_owned()));
    }
    match raw.parse::<u16>() {
        Ok(seq) if seq >= 1 => Ok(seq),
        _ => Err(ContentError::InvalidSequence(raw.to_owned())),
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A datagram that is not a well-formed message.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Message content that does not match what its kind requires.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("{kind} message is missing its content")]
    Missing { kind: MessageKind },
    #[error("invalid window ceiling {0:?}")]
    InvalidCeiling(String),
    #[error("invalid sequence number {0:?}")]
    InvalidSequence(String),
}
