//! Terminator classification for lifted super-blocks.
//!
//! Classification is a pure function of the owned IR and the block's start
//! address. It fuses several weak signals: the lifter's jump-kind hint, the
//! fall-through address derived from the last instruction mark, a constant
//! `next` expression, and conditional side-exits. None of the signals is
//! trustworthy on its own (lifters emit exits for predicated instructions
//! that never leave the block, and report `rep`-prefixed instructions as
//! jumps to themselves), so a handful of corrections run before the final
//! dispatch.

use crate::{
    function::{Terminator, TerminatorKind},
    ir::{IrSb, IrStmt, JumpKind},
};

/// Classifies the exit of `block`, which starts at `block_start`.
///
/// The non-returning overlay (promotion of calls and jumps into known
/// non-returning functions) is applied by the caller.
pub(crate) fn classify(block: &IrSb, block_start: u64) -> Terminator {
    let mut result = Terminator::unresolved();

    let mut last_addr = 0_u64;
    if let Some((addr, len)) = block.last_imark() {
        result.fall_through = addr + u64::from(len);
        last_addr = addr;
    }

    let jmp_call_target = block.next.as_const().unwrap_or(0);

    // When the next-expression constant equals the linear successor the
    // last instruction is not actually a jmp/call.
    let is_jmp_call = result.fall_through != jmp_call_target;

    let mut jcc_target = 0_u64;
    let mut is_conditional = false;
    for stmt in block.stmts.iter().rev() {
        if jcc_target != 0 {
            break;
        }

        // Exits belonging to the final instruction appear after its mark.
        if matches!(stmt, IrStmt::IMark { .. }) {
            break;
        }

        if let IrStmt::Exit { dst, .. } = stmt {
            jcc_target = *dst;
            is_conditional = true;

            if jcc_target == jmp_call_target && result.fall_through == jcc_target {
                // Degenerate exit: both sides land on the linear successor.
                jcc_target = 0;
            }

            // An exit aimed inside the block (start excluded, loops may
            // target it) comes from a predicated instruction the lifter
            // mis-classified, not from a real conditional terminator.
            if jcc_target > block_start && jcc_target <= last_addr {
                jcc_target = 0;
                is_conditional = false;
            }
        }
    }

    // A conditional whose exit lands on the linear successor encodes the
    // taken side in the next-expression constant instead.
    if is_conditional && is_jmp_call && jcc_target == result.fall_through {
        jcc_target = jmp_call_target;
    }

    match block.jumpkind {
        JumpKind::NoDecode => {
            // Synthetic truncation marker: the block continues at the
            // address the next-expression was re-pointed to.
            result.kind = TerminatorKind::Fallthrough;
            result.fall_through = jmp_call_target;
        }

        JumpKind::Return => {
            result.kind = TerminatorKind::Return;
            result.fall_through = 0;
        }

        JumpKind::Call => {
            if jmp_call_target != 0 {
                result.kind = TerminatorKind::Call;
                result.target = jmp_call_target;
            } else {
                result.kind = TerminatorKind::CallUnresolved;
                result.target = 0;
            }
        }

        JumpKind::Boring => {
            if jcc_target != 0 {
                result.kind = TerminatorKind::Jcc;
                result.target = jcc_target;
            } else if jmp_call_target == last_addr {
                // Instructions like "rep movsq" report a jump target of
                // their own address; the block simply falls through.
                result.kind = TerminatorKind::Fallthrough;
            } else if jmp_call_target != 0 {
                // Covers the real direct jump as well as a jump to the
                // linear successor, which is kept canonicalized as Jump.
                result.kind = TerminatorKind::Jump;
                result.target = jmp_call_target;
                result.fall_through = 0;
            } else {
                result.kind = TerminatorKind::Unresolved;
                result.target = 0;
                result.fall_through = 0;
            }
        }

        _ => {
            result.fall_through = 0;
        }
    }

    result
}
