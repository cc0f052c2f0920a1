//! Shared fixtures for unit tests: a scripted lifter, IR builders and a
//! minimal ELF64 image builder.

use rustc_hash::FxHashMap;

use crate::{
    ir::{IrSb, IrStmt},
    lifter::{LiftedBlock, Lifter},
    Error, Result,
};

/// Instruction-mark shorthand for building test super-blocks.
pub fn imark(addr: u64, len: u8) -> IrStmt {
    IrStmt::IMark { addr, len }
}

/// A lifter replaying pre-scripted super-blocks by address.
///
/// Mimics a real lifter's transient buffer: each lift overwrites the
/// scratch super-block, so callers must deep-copy what they keep.
#[derive(Default)]
pub struct ScriptedLifter {
    script: FxHashMap<u64, (IrSb, u64)>,
    scratch: Option<IrSb>,
}

impl ScriptedLifter {
    /// Creates a lifter with an empty script.
    pub fn new() -> ScriptedLifter {
        ScriptedLifter::default()
    }

    /// Scripts the result for lifting at `address`.
    pub fn add(&mut self, address: u64, irsb: IrSb, real_end: u64) -> &mut ScriptedLifter {
        self.script.insert(address, (irsb, real_end));
        self
    }
}

impl Lifter for ScriptedLifter {
    fn lift(&mut self, _bytes: &[u8], address: u64, _max_insns: u32) -> Result<LiftedBlock<'_>> {
        let (irsb, real_end) = self
            .script
            .get(&address)
            .cloned()
            .ok_or(Error::LiftFailure(address))?;

        self.scratch = Some(irsb);
        Ok(LiftedBlock {
            irsb: self.scratch.as_ref().expect("scratch was just set"),
            real_end,
        })
    }
}

/// Builds a minimal but valid ELF64 image: one executable `PT_LOAD`
/// segment mapping `code` at `vaddr`, code starting at file offset 0x78.
pub fn build_elf64(vaddr: u64, code: &[u8]) -> Vec<u8> {
    let code_offset = 0x78_u64; // ELF header (64) + one program header (56)

    let mut image = Vec::with_capacity(code_offset as usize + code.len());
    image.extend_from_slice(&[
        0x7F, b'E', b'L', b'F', 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ]);
    image.extend_from_slice(&2_u16.to_le_bytes()); // e_type = ET_EXEC
    image.extend_from_slice(&62_u16.to_le_bytes()); // e_machine = EM_X86_64
    image.extend_from_slice(&1_u32.to_le_bytes()); // e_version
    image.extend_from_slice(&vaddr.to_le_bytes()); // e_entry
    image.extend_from_slice(&64_u64.to_le_bytes()); // e_phoff
    image.extend_from_slice(&0_u64.to_le_bytes()); // e_shoff
    image.extend_from_slice(&0_u32.to_le_bytes()); // e_flags
    image.extend_from_slice(&64_u16.to_le_bytes()); // e_ehsize
    image.extend_from_slice(&56_u16.to_le_bytes()); // e_phentsize
    image.extend_from_slice(&1_u16.to_le_bytes()); // e_phnum
    image.extend_from_slice(&64_u16.to_le_bytes()); // e_shentsize
    image.extend_from_slice(&0_u16.to_le_bytes()); // e_shnum
    image.extend_from_slice(&0_u16.to_le_bytes()); // e_shstrndx

    image.extend_from_slice(&1_u32.to_le_bytes()); // p_type = PT_LOAD
    image.extend_from_slice(&5_u32.to_le_bytes()); // p_flags = R + X
    image.extend_from_slice(&code_offset.to_le_bytes()); // p_offset
    image.extend_from_slice(&vaddr.to_le_bytes()); // p_vaddr
    image.extend_from_slice(&vaddr.to_le_bytes()); // p_paddr
    image.extend_from_slice(&(code.len() as u64).to_le_bytes()); // p_filesz
    image.extend_from_slice(&(code.len() as u64).to_le_bytes()); // p_memsz
    image.extend_from_slice(&0x1000_u64.to_le_bytes()); // p_align

    image.extend_from_slice(code);
    image
}
