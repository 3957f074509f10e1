//! Client-side chunk reassembly.
//!
//! [`Assembly`] collects `Data` payloads keyed by sequence number as they
//! arrive, in whatever order the network delivers them, and produces the
//! original content once the server signals completion.
//!
//! - A key is written at most once. Rewriting it with the same payload (a
//!   duplicated or retransmitted datagram) is accepted silently; rewriting
//!   it with a *different* payload is a [`AssemblyError::Conflict`].
//! - [`Assembly::assemble`] concatenates payloads in ascending order and
//!   refuses to paper over a gap in `1..=highest`.
//!
//! This module only manages state; sending ACKs is the caller's job.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("chunk {0} received twice with different payloads")]
    Conflict(u16),
    #[error("chunk {0} never arrived")]
    Gap(u16),
}

/// Whether an inbound chunk was new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    New,
    Duplicate,
}

#[derive(Debug, Default)]
pub struct Assembly {
    chunks: BTreeMap<u16, String>,
}

impl Assembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record chunk `seq`.
    pub fn insert(&mut self, seq: u16, payload: &str) -> Result<Insert, AssemblyError> {
        match self.chunks.get(&seq) {
            Some(existing) if existing == payload => Ok(Insert::Duplicate),
            Some(_) => Err(AssemblyError::Conflict(seq)),
            None => {
                self.chunks.insert(seq, payload.to_owned());
                Ok(Insert::New)
            }
        }
    }

    /// Number of distinct chunks held.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Concatenate every payload in sequence order.
    pub fn assemble(&self) -> Result<String, AssemblyError> {
        let mut out = String::with_capacity(self.chunks.values().map(String::len).sum());
        for (expected, (&seq, payload)) in (1u16..).zip(&self.chunks) {
            if seq != expected {
                return Err(AssemblyError::Gap(expected));
            }
            out.push_str(payload);
        }
        Ok(out)
    }
}
