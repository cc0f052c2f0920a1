//! End-to-end translation tests.
//!
//! These tests build a synthetic ELF64 image on disk together with its
//! `.dmp` / `.dmp.no-return` siblings, then drive the full pipeline
//! through [`Translator::new`] with a scripted lifter:
//!
//! 1. Load image and catalog from the filesystem
//! 2. Translate catalog functions (eagerly and on demand)
//! 3. Verify terminator classification, the non-returning overlay and
//!    tail-jump detection across function boundaries
//! 4. Verify registry semantics: identity, finalization, xref annotation

use std::{fs, path::PathBuf, sync::Arc};

use tempfile::TempDir;

use vexscope::{
    image::FileFormat,
    ir::{IrExpr, IrSb, IrStmt, JumpKind},
    lifter::{LiftedBlock, Lifter},
    prelude::TerminatorKind,
    Error, Result, Translator,
};

/// A lifter replaying pre-scripted super-blocks by address, overwriting
/// its scratch buffer on every call like a real block lifter would.
#[derive(Default)]
struct ScriptedLifter {
    script: std::collections::HashMap<u64, (IrSb, u64)>,
    scratch: Option<IrSb>,
}

impl ScriptedLifter {
    fn add(&mut self, address: u64, irsb: IrSb, real_end: u64) -> &mut Self {
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

fn imark(addr: u64, len: u8) -> IrStmt {
    IrStmt::IMark { addr, len }
}

/// Minimal valid ELF64: one executable PT_LOAD segment mapping `code` at
/// `vaddr`, code at file offset 0x78.
fn build_elf64(vaddr: u64, code: &[u8]) -> Vec<u8> {
    let mut image = Vec::new();
    image.extend_from_slice(&[
        0x7F, b'E', b'L', b'F', 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ]);
    image.extend_from_slice(&2_u16.to_le_bytes()); // e_type
    image.extend_from_slice(&62_u16.to_le_bytes()); // e_machine
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
    image.extend_from_slice(&0x78_u64.to_le_bytes()); // p_offset
    image.extend_from_slice(&vaddr.to_le_bytes()); // p_vaddr
    image.extend_from_slice(&vaddr.to_le_bytes()); // p_paddr
    image.extend_from_slice(&(code.len() as u64).to_le_bytes()); // p_filesz
    image.extend_from_slice(&(code.len() as u64).to_le_bytes()); // p_memsz
    image.extend_from_slice(&0x1000_u64.to_le_bytes()); // p_align

    image.extend_from_slice(code);
    image
}

const BASE: u64 = 0x400000;

/// Writes the binary and its dump siblings into `dir`.
fn write_fixture(dir: &TempDir, dmp: &str, no_return: &str) -> PathBuf {
    let binary = dir.path().join("app.bin");
    fs::write(&binary, build_elf64(BASE, &[0x90; 0x8000])).unwrap();
    fs::write(dir.path().join("app.bin.dmp"), dmp).unwrap();
    fs::write(dir.path().join("app.bin.dmp.no-return"), no_return).unwrap();
    binary
}

/// Script for a small two-function program:
///
/// - `0x401000`: a conditional over two blocks, the second tail-jumping
///   into `0x402000`
/// - `0x402000`: a single block calling the non-returning `0x403000`
fn program_lifter() -> Box<dyn Lifter> {
    let mut lifter = ScriptedLifter::default();

    // cmp + jne 0x401010; falls through to 0x401008
    lifter.add(
        0x401000,
        IrSb {
            stmts: vec![
                imark(0x401000, 4),
                imark(0x401004, 4),
                IrStmt::Exit {
                    guard: IrExpr::RdTmp(1),
                    dst: 0x401010,
                    jumpkind: JumpKind::Boring,
                },
            ],
            next: IrExpr::Const(0x401008),
            jumpkind: JumpKind::Boring,
        },
        0x401008,
    );
    // jmp 0x402000 (leaves the function)
    lifter.add(
        0x401008,
        IrSb {
            stmts: vec![imark(0x401008, 5)],
            next: IrExpr::Const(0x402000),
            jumpkind: JumpKind::Boring,
        },
        0x40100D,
    );
    // ret
    lifter.add(
        0x401010,
        IrSb {
            stmts: vec![imark(0x401010, 1)],
            next: IrExpr::Get { offset: 64, size: 8 },
            jumpkind: JumpKind::Return,
        },
        0x401011,
    );
    // call 0x403000 (non-returning)
    lifter.add(
        0x402000,
        IrSb {
            stmts: vec![imark(0x402000, 5)],
            next: IrExpr::Const(0x403000),
            jumpkind: JumpKind::Call,
        },
        0x402005,
    );

    Box::new(lifter)
}

const PROGRAM_DMP: &str = "\
function 401000
401000 401008 2
401008 40100D 1
401010 401011 1

function 402000
402000 402005 1
";

#[test]
fn eager_translation_of_known_functions() {
    let dir = TempDir::new().unwrap();
    let binary = write_fixture(&dir, PROGRAM_DMP, "403000\n");

    let translator =
        Translator::new(program_lifter(), &binary, FileFormat::Elf64, false).unwrap();

    // Both catalog functions were translated at construction.
    let caller = translator.cget_function(0x401000).unwrap();
    let callee = translator.cget_function(0x402000).unwrap();

    assert_eq!(caller.get_blocks().len(), 3);
    assert_eq!(caller.entry_block().unwrap().address(), 0x401000);

    // Conditional entry block keeps both sides.
    let entry = caller.entry_block().unwrap().terminator();
    assert_eq!(entry.kind, TerminatorKind::Jcc);
    assert_eq!(entry.target, 0x401010);
    assert_eq!(entry.fall_through, 0x401008);
    assert!(!entry.is_tail);

    // The jump into the other function is a tail jump.
    let tail = caller.get_blocks()[&0x401008].terminator();
    assert_eq!(tail.kind, TerminatorKind::Jump);
    assert_eq!(tail.target, 0x402000);
    assert_eq!(tail.fall_through, 0);
    assert!(tail.is_tail);

    // The return block.
    let ret = caller.get_blocks()[&0x401010].terminator();
    assert_eq!(ret.kind, TerminatorKind::Return);
    assert_eq!((ret.target, ret.fall_through), (0, 0));

    // The callee's call was promoted by the non-returning overlay.
    let noreturn = callee.entry_block().unwrap().terminator();
    assert_eq!(noreturn.kind, TerminatorKind::NoReturn);
    assert_eq!(noreturn.target, 0x403000);

    // Every translated block is memoized globally, exactly once.
    assert_eq!(translator.get_blocks().len(), 4);
}

#[test]
fn on_demand_translation_and_identity() {
    let dir = TempDir::new().unwrap();
    let binary = write_fixture(&dir, PROGRAM_DMP, "403000\n");

    let translator =
        Translator::new(program_lifter(), &binary, FileFormat::Elf64, true).unwrap();

    // Nothing translated yet.
    assert!(matches!(
        translator.cget_function(0x401000),
        Err(Error::NotFound(_))
    ));

    let first = translator.get_function(0x401000).unwrap();
    let second = translator.get_function(0x401000).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // The other function is still untranslated until queried.
    assert!(translator.cget_function(0x402000).is_err());
    assert!(translator.maybe_get_function(0x402000).is_some());

    // Unknown addresses stay unknown.
    assert!(translator.maybe_get_function(0xDEAD).is_none());
    assert!(matches!(
        translator.get_function(0xDEAD),
        Err(Error::NotFound(0xDEAD))
    ));
}

#[test]
fn containing_function_and_annotation() {
    let dir = TempDir::new().unwrap();
    let binary = write_fixture(&dir, PROGRAM_DMP, "403000\n");

    let translator =
        Translator::new(program_lifter(), &binary, FileFormat::Elf64, false).unwrap();

    // 0x401004 lies inside the caller's entry block.
    let containing = translator.get_containing_function(0x401004).unwrap();
    assert_eq!(containing.entry(), 0x401000);
    assert!(translator.get_containing_function(0x500000).is_err());

    // Bulk access works until finalization, annotation keeps working after.
    assert!(translator.get_functions_mutable().is_ok());
    translator.finalize();
    translator.finalize(); // idempotent
    assert!(matches!(
        translator.get_functions_mutable(),
        Err(Error::Finalized)
    ));

    translator.add_function_xref(0x402000, 0x401008).unwrap();
    let callee = translator.cget_function(0x402000).unwrap();
    assert!(callee.get_xrefs().contains(&0x401008));

    assert!(matches!(
        translator.add_function_xref(0x1234, 0),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn concurrent_lookups_share_identity() {
    let dir = TempDir::new().unwrap();
    let binary = write_fixture(&dir, PROGRAM_DMP, "403000\n");

    let translator = Arc::new(
        Translator::new(program_lifter(), &binary, FileFormat::Elf64, true).unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let translator = Arc::clone(&translator);
            std::thread::spawn(move || translator.get_function(0x401000).unwrap())
        })
        .collect();

    let functions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for function in &functions[1..] {
        assert!(Arc::ptr_eq(&functions[0], function));
    }
}

#[test]
fn missing_dump_siblings_fail_construction() {
    let dir = TempDir::new().unwrap();
    let binary = dir.path().join("app.bin");
    fs::write(&binary, build_elf64(BASE, &[0x90; 16])).unwrap();

    let result = Translator::new(
        Box::new(ScriptedLifter::default()),
        &binary,
        FileFormat::Elf64,
        true,
    );
    assert!(matches!(result, Err(Error::FileError(_))));
}

#[test]
fn wrong_format_tag_fails_construction() {
    let dir = TempDir::new().unwrap();
    let binary = write_fixture(&dir, "", "");

    let result = Translator::new(
        Box::new(ScriptedLifter::default()),
        &binary,
        FileFormat::Pe64,
        true,
    );
    assert!(result.is_err());
}
