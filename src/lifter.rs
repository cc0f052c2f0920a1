//! Interface to the external IR lifter.
//!
//! The lifter is a stateful, block-oriented translator: handed a byte view
//! and a virtual address it produces one [`IrSb`] covering at most the
//! requested number of machine instructions, together with the address one
//! past the last instruction it actually consumed. Its own boundary
//! heuristics may disagree with the function catalog: it can stop early at
//! an intra-block call, or run past an interior branch target. Both cases
//! are what the block processor corrects for.
//!
//! Implementations are treated as not re-entrant and not thread-safe; the
//! translator drives a lifter from at most one thread at a time.

use crate::{ir::IrSb, Result};

/// One lifted super-block, borrowed from the lifter's scratch storage.
///
/// The borrow is only valid until the next [`Lifter::lift`] call; callers
/// that keep the IR must clone it onto the heap first.
#[derive(Debug)]
pub struct LiftedBlock<'a> {
    /// The lifted super-block.
    pub irsb: &'a IrSb,
    /// Address one past the last machine instruction that was consumed.
    pub real_end: u64,
}

/// A block-oriented machine-code-to-IR lifter.
pub trait Lifter: Send {
    /// Lifts up to `max_insns` machine instructions starting at `address`.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Byte view beginning at `address`, at least one basic block long
    /// * `address` - Virtual address of the first instruction
    /// * `max_insns` - Upper bound on the number of instructions to translate
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be decoded at all. Partial
    /// translation is not an error: the lifter reports how far it came
    /// through [`LiftedBlock::real_end`].
    fn lift(&mut self, bytes: &[u8], address: u64, max_insns: u32) -> Result<LiftedBlock<'_>>;
}
