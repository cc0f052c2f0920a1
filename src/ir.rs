//! Owned representation of lifted IR super-blocks.
//!
//! A super-block is the lifter's unit of translation: an ordered statement
//! list, a terminal `next` expression and a jump-kind hint. The translator
//! inspects only a small part of this vocabulary ([`IrStmt::IMark`],
//! [`IrStmt::Exit`] and constant `next` expressions); everything else is
//! carried through untouched for downstream consumers.
//!
//! Lifters hand out super-blocks borrowed from their internal scratch
//! storage; such a borrow is only valid until the next lift call. The
//! translator therefore takes an owning [`Clone`] of every super-block it
//! keeps. All later edits (truncation, re-pointing `next`) happen on that
//! owned copy.
//!
//! # Key Types
//! - [`IrSb`] - An IR super-block
//! - [`IrStmt`] - A single IR statement
//! - [`IrExpr`] - An IR expression
//! - [`JumpKind`] - The super-block's exit hint

use std::sync::Arc;

/// Shared handle to an owned super-block.
pub type IrSbRc = Arc<IrSb>;

/// Classification of how a super-block leaves its last instruction.
///
/// Only `Boring`, `Call` and `Return` are produced by lifters for regular
/// code. [`JumpKind::NoDecode`] is a synthetic marker written by the block
/// processor when it truncates an over-translated block; lifters never
/// emit it themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    /// A generic jump: direct, indirect or plain fall-through.
    Boring,
    /// A call instruction.
    Call,
    /// A return instruction.
    Return,
    /// A system call.
    Syscall,
    /// A yield to the scheduler (e.g. `pause` spin-loop hints).
    Yield,
    /// Synthetic marker: the block was truncated at a catalog boundary.
    NoDecode,
}

/// An IR expression.
///
/// The translator only ever inspects [`IrExpr::Const`]; the remaining
/// variants exist so that lifted code survives the round-trip through the
/// translator unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrExpr {
    /// A 64-bit constant, e.g. a direct jump or call target.
    Const(u64),
    /// Read of a temporary.
    RdTmp(u32),
    /// Read of a guest register at the given state offset.
    Get {
        /// Byte offset into the guest state.
        offset: u32,
        /// Width of the read in bytes.
        size: u8,
    },
    /// A memory load.
    Load {
        /// Address expression of the load.
        addr: Box<IrExpr>,
        /// Width of the load in bytes.
        size: u8,
    },
}

impl IrExpr {
    /// Returns the constant value if this is a [`IrExpr::Const`].
    #[must_use]
    pub fn as_const(&self) -> Option<u64> {
        match self {
            IrExpr::Const(value) => Some(*value),
            _ => None,
        }
    }
}

/// A single IR statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrStmt {
    /// No-op padding statement.
    NoOp,
    /// Marks the start of one machine instruction.
    IMark {
        /// Virtual address of the instruction.
        addr: u64,
        /// Length of the instruction in bytes.
        len: u8,
    },
    /// Write to a temporary.
    WrTmp {
        /// The temporary being defined.
        tmp: u32,
        /// The defining expression.
        value: IrExpr,
    },
    /// Write to a guest register at the given state offset.
    Put {
        /// Byte offset into the guest state.
        offset: u32,
        /// The value being written.
        value: IrExpr,
    },
    /// A memory store.
    Store {
        /// Address expression of the store.
        addr: IrExpr,
        /// The value being stored.
        value: IrExpr,
    },
    /// A conditional side-exit with a constant destination.
    ///
    /// For a conditional branch the lifter places the `Exit` after the
    /// final [`IrStmt::IMark`] of the block; the `next` expression then
    /// carries the untaken successor.
    Exit {
        /// Guard expression; the exit is taken when it is nonzero.
        guard: IrExpr,
        /// Constant destination address of the taken side.
        dst: u64,
        /// Jump kind of the side-exit.
        jumpkind: JumpKind,
    },
}

/// An IR super-block: the lifter's unit of translation.
///
/// Statement storage is a plain owned `Vec`, which doubles as the
/// per-super-block arena: truncating a block drops the statement tail in
/// one step, without per-statement bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrSb {
    /// The ordered statement list.
    pub stmts: Vec<IrStmt>,
    /// Where execution continues when no side-exit is taken.
    pub next: IrExpr,
    /// Hint describing how the block exits.
    pub jumpkind: JumpKind,
}

impl IrSb {
    /// Creates an empty super-block with the given exit.
    #[must_use]
    pub fn new(next: IrExpr, jumpkind: JumpKind) -> Self {
        IrSb {
            stmts: Vec::new(),
            next,
            jumpkind,
        }
    }

    /// Number of machine instructions covered by this super-block.
    #[must_use]
    pub fn imark_count(&self) -> usize {
        self.stmts
            .iter()
            .filter(|stmt| matches!(stmt, IrStmt::IMark { .. }))
            .count()
    }

    /// Address and length of the last machine instruction, if any.
    #[must_use]
    pub fn last_imark(&self) -> Option<(u64, u8)> {
        self.stmts.iter().rev().find_map(|stmt| match stmt {
            IrStmt::IMark { addr, len } => Some((*addr, *len)),
            _ => None,
        })
    }

    /// Truncates the block to its first `count` machine instructions.
    ///
    /// Walks the statement list; on encountering the `(count + 1)`-th
    /// [`IrStmt::IMark`] all statements from that mark onwards are
    /// dropped, the jump kind becomes [`JumpKind::NoDecode`] and `next`
    /// is re-pointed at the truncated instruction's address. Blocks with
    /// at most `count` instructions are left untouched.
    ///
    /// # Returns
    ///
    /// The address the block now falls through to, or `None` if nothing
    /// was truncated.
    pub fn truncate_to_insns(&mut self, count: u32) -> Option<u64> {
        let mut remaining = count + 1;
        for (index, stmt) in self.stmts.iter().enumerate() {
            if let IrStmt::IMark { addr, .. } = stmt {
                remaining -= 1;
                if remaining == 0 {
                    let addr = *addr;
                    self.stmts.truncate(index);
                    self.jumpkind = JumpKind::NoDecode;
                    self.next = IrExpr::Const(addr);
                    return Some(addr);
                }
            }
        }

        None
    }
}
