//! Slow-start send window.
//!
//! The window is the number of chunks transmitted per delivery round. It
//! starts at 1, doubles after a round in which every chunk was acknowledged
//! (capped at the client's ceiling), and drops back to 1 after any round
//! with a miss. There is no congestion-avoidance phase and no fast
//! retransmit.

/// Window size state for one transfer.
#[derive(Debug, Clone)]
pub struct SlowStart {
    size: usize,
    ceiling: usize,
    /// Collapses since the last successful round.
    consecutive_collapses: u32,
}

impl SlowStart {
    /// A window of 1 that may grow up to `ceiling` (treated as at least 1).
    pub fn new(ceiling: usize) -> Self {
        Self {
            size: 1,
            ceiling: ceiling.max(1),
            consecutive_collapses: 0,
        }
    }

    /// Current window size; always within `1..=ceiling`.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn consecutive_collapses(&self) -> u32 {
        self.consecutive_collapses
    }

    /// Full-window success: `size = min(size * 2, ceiling)`.
    pub fn grow(&mut self) {
        self.size = self.size.saturating_mul(2).min(self.ceiling);
        self.consecutive_collapses = 0;
    }

    /// Any miss: `size = 1`.
    pub fn collapse(&mut self) {
        self.size = 1;
        self.consecutive_collapses = self.consecutive_collapses.saturating_add(1);
    }
}
