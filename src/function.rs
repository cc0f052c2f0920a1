//! Translated functions, their blocks and terminators.
//!
//! A [`Function`] is built privately by the translator: blocks are attached
//! in catalog order, the tail-jump pass patches terminators, and only then
//! is the value frozen by wrapping it in an [`Arc`] and publishing it
//! through the registry. After that point the structure is immutable; the
//! xref sets stay appendable because downstream analyses discover
//! references long after translation.

use std::{collections::BTreeMap, sync::Arc};

use crossbeam_skiplist::SkipSet;

use crate::ir::IrSb;

/// Shared handle to a translated, frozen function.
pub type FunctionRc = Arc<Function>;

/// How a basic block transfers control when it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminatorKind {
    /// Call with a known constant target.
    Call,
    /// Call whose target could not be resolved statically.
    CallUnresolved,
    /// Direct jump with a known constant target.
    Jump,
    /// Conditional branch with a taken target and a fall-through.
    Jcc,
    /// Return to the caller.
    Return,
    /// Plain fall-through into the next sequential block.
    Fallthrough,
    /// Call or jump to a function known not to return.
    NoReturn,
    /// Control transfer that could not be classified.
    Unresolved,
}

/// Classified exit of one basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminator {
    /// The classification.
    pub kind: TerminatorKind,
    /// Address of the primary successor, 0 if not applicable.
    pub target: u64,
    /// Address of the sequential successor, 0 if not applicable.
    pub fall_through: u64,
    /// Set when a [`TerminatorKind::Jump`] leaves its function's block set.
    pub is_tail: bool,
}

impl Terminator {
    /// An unclassified terminator with both successors cleared.
    #[must_use]
    pub fn unresolved() -> Terminator {
        Terminator {
            kind: TerminatorKind::Unresolved,
            target: 0,
            fall_through: 0,
            is_tail: false,
        }
    }
}

/// One translated basic block: address, owned IR and classified exit.
#[derive(Debug)]
pub struct Block {
    address: u64,
    irsb: Arc<IrSb>,
    terminator: Terminator,
}

impl Block {
    pub(crate) fn new(address: u64, irsb: Arc<IrSb>, terminator: Terminator) -> Block {
        Block {
            address,
            irsb,
            terminator,
        }
    }

    /// Virtual address of the block's first instruction.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// The owned IR super-block.
    #[must_use]
    pub fn irsb(&self) -> &Arc<IrSb> {
        &self.irsb
    }

    /// The classified terminator.
    #[must_use]
    pub fn terminator(&self) -> &Terminator {
        &self.terminator
    }

    pub(crate) fn terminator_mut(&mut self) -> &mut Terminator {
        &mut self.terminator
    }

    /// Exclusive end address, derived from the last instruction mark.
    ///
    /// A block whose IR carries no instruction mark reports its own start
    /// address, i.e. a zero-length range.
    #[must_use]
    pub fn end_address(&self) -> u64 {
        self.irsb
            .last_imark()
            .map_or(self.address, |(addr, len)| addr + u64::from(len))
    }
}

/// A translated function: entry address, block map and xref annotations.
#[derive(Debug)]
pub struct Function {
    entry: u64,
    blocks: BTreeMap<u64, Block>,
    xrefs: SkipSet<u64>,
    vfunc_xrefs: SkipSet<u64>,
}

impl Function {
    pub(crate) fn new(entry: u64) -> Function {
        Function {
            entry,
            blocks: BTreeMap::new(),
            xrefs: SkipSet::new(),
            vfunc_xrefs: SkipSet::new(),
        }
    }

    /// The function's entry address.
    #[must_use]
    pub fn entry(&self) -> u64 {
        self.entry
    }

    /// All blocks of the function, ordered by address.
    #[must_use]
    pub fn get_blocks(&self) -> &BTreeMap<u64, Block> {
        &self.blocks
    }

    /// The block at the function's entry address, if translated.
    #[must_use]
    pub fn entry_block(&self) -> Option<&Block> {
        self.blocks.get(&self.entry)
    }

    /// Returns `true` if `address` lies within one of the function's blocks.
    #[must_use]
    pub fn contains_address(&self, address: u64) -> bool {
        self.blocks
            .range(..=address)
            .next_back()
            .is_some_and(|(_, block)| address < block.end_address())
    }

    pub(crate) fn add_block(&mut self, block: Block) {
        debug_assert!(
            !self.blocks.contains_key(&block.address()),
            "duplicate block {:#x} in function {:#x}",
            block.address(),
            self.entry
        );
        self.blocks.insert(block.address(), block);
    }

    pub(crate) fn blocks_mut(&mut self) -> impl Iterator<Item = &mut Block> {
        self.blocks.values_mut()
    }

    /// Records the address of a site referencing this function.
    ///
    /// Append-only; available on frozen functions.
    pub fn add_xref(&self, address: u64) {
        self.xrefs.insert(address);
    }

    /// Records a virtual-table slot referencing this function.
    ///
    /// Append-only; available on frozen functions.
    pub fn add_vfunc_xref(&self, address: u64) {
        self.vfunc_xrefs.insert(address);
    }

    /// Sites referencing this function.
    #[must_use]
    pub fn get_xrefs(&self) -> &SkipSet<u64> {
        &self.xrefs
    }

    /// Virtual-table slots referencing this function.
    #[must_use]
    pub fn get_vfunc_xrefs(&self) -> &SkipSet<u64> {
        &self.vfunc_xrefs
    }
}
