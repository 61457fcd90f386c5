//! Reorg Manager (C5, spec §4.5).
//!
//! Maintains a small in-memory ring of recently seen `(number, hash,
//! parent_hash)` triples and decides, for each incoming block, whether to
//! advance the canonical chain or roll back to the nearest matching
//! ancestor. Ancestor search never guesses past `REORG_WINDOW`: the caller
//! gets `ReorgError::TooDeep` and must surface it to the operator.

use crate::error::ReorgError;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
}

/// The decision the manager reaches for an incoming block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestDecision {
    /// The block extends the current tip; dispatch it directly.
    Advance,
    /// The block forks from an ancestor still in the window; the caller
    /// must call `rollback_above(ancestor.number, ancestor.hash)` on the
    /// store before dispatching this block and anything after it.
    Reorg { ancestor: BlockHeader },
}

/// Ring buffer of recently seen headers, bounded to `REORG_WINDOW` entries
/// (spec §4.5). Oldest entries are dropped as new ones are pushed.
pub struct ReorgManager {
    window: usize,
    ring: VecDeque<BlockHeader>,
}

impl ReorgManager {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            ring: VecDeque::with_capacity(window),
        }
    }

    pub fn tip(&self) -> Option<&BlockHeader> {
        self.ring.back()
    }

    /// Decides how to handle an incoming block header without mutating
    /// internal state; the caller applies the decision (including any
    /// store rollback) and then calls [`Self::record`] to commit the new
    /// header into the ring.
    pub fn decide(&self, incoming: &BlockHeader) -> Result<IngestDecision, ReorgError> {
        match self.tip() {
            None => Ok(IngestDecision::Advance),
            Some(tip) if incoming.parent_hash == tip.hash => Ok(IngestDecision::Advance),
            Some(_) => {
                let ancestor = self
                    .ring
                    .iter()
                    .rev()
                    .find(|h| h.hash == incoming.parent_hash)
                    .cloned();
                match ancestor {
                    Some(ancestor) => Ok(IngestDecision::Reorg { ancestor }),
                    None => Err(ReorgError::TooDeep {
                        from: incoming.number,
                        window: self.window as u64,
                    }),
                }
            }
        }
    }

    /// Commits `incoming` as the new tip. If the prior ingest decided on a
    /// `Reorg`, the caller must first drop ring entries above the chosen
    /// ancestor via [`Self::forget_above`].
    pub fn record(&mut self, incoming: BlockHeader) {
        if self.ring.len() == self.window {
            self.ring.pop_front();
        }
        self.ring.push_back(incoming);
    }

    /// Forgets ring entries with `number > ancestor_number`, matching the
    /// store's own `rollback_above` so the two stay consistent (spec
    /// §4.5 step 2).
    pub fn forget_above(&mut self, ancestor_number: u64) {
        self.ring.retain(|h| h.number <= ancestor_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(number: u64, hash: &str, parent: &str) -> BlockHeader {
        BlockHeader {
            number,
            hash: hash.to_string(),
            parent_hash: parent.to_string(),
        }
    }

    #[test]
    fn first_block_always_advances() {
        let manager = ReorgManager::new(10);
        let decision = manager.decide(&header(1, "h1", "h0")).unwrap();
        assert_eq!(decision, IngestDecision::Advance);
    }

    #[test]
    fn advancing_block_follows_tip() {
        let mut manager = ReorgManager::new(10);
        manager.record(header(1, "h1", "h0"));
        let decision = manager.decide(&header(2, "h2", "h1")).unwrap();
        assert_eq!(decision, IngestDecision::Advance);
    }

    #[test]
    fn fork_within_window_finds_ancestor() {
        let mut manager = ReorgManager::new(10);
        manager.record(header(1, "h1", "h0"));
        manager.record(header(2, "h2", "h1"));
        manager.record(header(3, "h3", "h2"));

        // competing block 2' whose parent is h1 (the ancestor), not h2
        let decision = manager.decide(&header(2, "h2prime", "h1")).unwrap();
        match decision {
            IngestDecision::Reorg { ancestor } => assert_eq!(ancestor.hash, "h1"),
            other => panic!("expected reorg, got {:?}", other),
        }
    }

    #[test]
    fn ancestor_outside_window_is_too_deep() {
        let mut manager = ReorgManager::new(2);
        manager.record(header(1, "h1", "h0"));
        manager.record(header(2, "h2", "h1"));
        manager.record(header(3, "h3", "h2")); // h1 falls out of the window

        let err = manager.decide(&header(2, "h2prime", "h1")).unwrap_err();
        assert!(matches!(err, ReorgError::TooDeep { .. }));
    }

    #[test]
    fn forget_above_trims_ring() {
        let mut manager = ReorgManager::new(10);
        manager.record(header(1, "h1", "h0"));
        manager.record(header(2, "h2", "h1"));
        manager.record(header(3, "h3", "h2"));
        manager.forget_above(1);
        assert_eq!(manager.tip().unwrap().number, 1);
    }
}
