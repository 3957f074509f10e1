//! Server-side chunk store.
//!
//! [`ChunkStore`] holds one transfer's worth of chunks, each a ready-to-send
//! `Data` message tagged with whether the client has acknowledged it.
//!
//! # Layout
//!
//! ```text
//!   seq:    1     2     3     4     5     6     7
//!         [ack] [ack] [   ] [ack] [   ] [   ] [   ]
//!                       ▲           ▲     ▲
//!                       └─ first_available(3) ─┘
//! ```
//!
//! Sequence numbers are dense and 1-based, so record `seq` lives at index
//! `seq - 1`. The acknowledged flag only ever goes from `false` to `true`.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use thiserror::Error;

use crate::message::{Message, MAX_SEQ};

/// A resource that cannot be addressed with four-digit sequence numbers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("resource needs {chunks} chunks but at most {max} are addressable")]
    TooManyChunks { chunks: usize, max: u16 },
}

/// Result of applying one acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The chunk flipped to acknowledged.
    Newly,
    /// The chunk was already acknowledged (duplicate ack).
    Already,
    /// No chunk has this sequence number.
    Unknown,
}

/// One addressable slice of the resource.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub seq: u16,
    /// The `Data` message to (re)transmit for this chunk.
    pub message: Message,
    acknowledged: bool,
}

impl ChunkRecord {
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }
}

/// All chunks of one transfer, in sequence order.
#[derive(Debug, Clone, Default)]
pub struct ChunkStore {
    records: Vec<ChunkRecord>,
}

impl ChunkStore {
    /// Split `content` into blocks of `chunk_size` characters and number
    /// them from 1.
    ///
    /// Empty content yields an empty store. Identical content always yields
    /// an identical store.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    pub fn segment(content: &str, chunk_size: usize) -> Result<Self, ChunkError> {
        assert!(chunk_size >= 1, "chunk_size must be at least 1");

        let blocks = split_chars(content, chunk_size);
        if blocks.len() > usize::from(MAX_SEQ) {
            return Err(ChunkError::TooManyChunks {
                chunks: blocks.len(),
                max: MAX_SEQ,
            });
        }

        let records = blocks
            .into_iter()
            .zip(1u16..)
            .map(|(block, seq)| ChunkRecord {
                seq,
                message: Message::data(seq, block),
                acknowledged: false,
            })
            .collect();
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, seq: u16) -> Option<&ChunkRecord> {
        let idx = usize::from(seq).checked_sub(1)?;
        self.records.get(idx)
    }

    fn get_mut(&mut self, seq: u16) -> Option<&mut ChunkRecord> {
        let idx = usize::from(seq).checked_sub(1)?;
        self.records.get_mut(idx)
    }

    /// Iterate over all records from seq 1 upwards.
    pub fn records(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.records.iter()
    }

    /// Mark chunk `seq` as acknowledged.
    pub fn acknowledge(&mut self, seq: u16) -> AckOutcome {
        match self.get_mut(seq) {
            None => AckOutcome::Unknown,
            Some(record) if record.acknowledged => AckOutcome::Already,
            Some(record) => {
                record.acknowledged = true;
                AckOutcome::Newly
            }
        }
    }

    pub fn is_acknowledged(&self, seq: u16) -> bool {
        self.get(seq).is_some_and(ChunkRecord::is_acknowledged)
    }

    /// Number of chunks still waiting for an acknowledgment.
    pub fn remaining(&self) -> usize {
        self.records.iter().filter(|r| !r.acknowledged).count()
    }

    pub fn has_unacknowledged(&self) -> bool {
        self.records.iter().any(|r| !r.acknowledged)
    }

    /// Up to `n` unacknowledged sequence numbers, lowest first.
    pub fn first_available(&self, n: usize) -> Vec<u16> {
        self.records
            .iter()
            .filter(|r| !r.acknowledged)
            .map(|r| r.seq)
            .take(n)
            .collect()
    }

    /// `true` when every chunk numbered `1..=last` is acknowledged.
    ///
    /// Because rounds always pick the lowest unacknowledged chunks, this is
    /// the same as "every chunk of the round's window is acknowledged".
    pub fn prefix_acknowledged(&self, last: u16) -> bool {
        self.records
            .iter()
            .take(usize::from(last))
            .all(|r| r.acknowledged)
    }
}

/// Split `text` into consecutive slices of at most `size` characters.
fn split_chars(text: &str, size: usize) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == size {
            blocks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if count > 0 {
        blocks.push(&text[start..]);
    }
    blocks
}
