//! The translator: drives the external lifter over catalog functions and
//! produces IR-annotated control-flow graphs.
//!
//! For every catalog entry the translator walks the recorded blocks in
//! order and hands each one to the lifter. The lifter's own boundary
//! heuristics can disagree with the catalog in both directions, and both
//! disagreements are repaired here:
//!
//! - **Under-translation**: the lifter stopped early, typically at an
//!   intra-block call it chose to split on. The remainder is re-driven
//!   recursively with adjusted boundaries before the head is finalized.
//! - **Over-translation**: the lifter ran past an interior branch target
//!   the catalog knows about. The owned IR is truncated in place at the
//!   catalog boundary and marked with the synthetic
//!   [`JumpKind::NoDecode`](crate::ir::JumpKind::NoDecode).
//!
//! Every finalized block gets a classified
//! [`Terminator`](crate::function::Terminator); after all blocks of a
//! function are attached, jumps leaving the function's own block set are
//! flagged as tail jumps, and the function is frozen into the registry.
//!
//! # Concurrency
//!
//! The registries are lock-free ordered maps and safe to read from any
//! thread. The lifter itself is stateful and not re-entrant, so the whole
//! lift path (byte fetch, lifting, IR copy, classification) runs behind
//! one mutex and is driven by at most one thread at a time. Lookups
//! double-check the registry under that mutex, so concurrent callers
//! observe the same function identity and nothing is lifted twice.

mod terminator;

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use crossbeam_skiplist::SkipMap;
use log::{debug, warn};
use rustc_hash::FxHashSet;

use crate::{
    catalog::{BlockDescriptor, DumpCatalog},
    function::{Block, Function, FunctionRc, TerminatorKind},
    image::{FileFormat, Image},
    ir::{IrSb, IrSbRc},
    lifter::Lifter,
    Error::{Finalized, NotFound},
    Result,
};
use terminator::classify;

/// Ordered registry of translated functions, keyed by entry address.
pub type FunctionMap = SkipMap<u64, FunctionRc>;

/// Global memo of owned super-blocks, keyed by block address.
pub type BlockMap = SkipMap<u64, IrSbRc>;

/// Mutable part of the lift path, serialized behind the translator mutex.
struct LiftState {
    lifter: Box<dyn Lifter>,
    seen_blocks: FxHashSet<u64>,
}

/// Translates catalog functions into IR-annotated control-flow graphs.
///
/// The translator exclusively owns the memory image, every translated
/// [`Function`] and every owned super-block; callers receive shared
/// read-only handles.
///
/// # Examples
///
/// ```rust,ignore
/// use vexscope::{image::FileFormat, Translator};
///
/// let translator = Translator::new(lifter, "app.bin".as_ref(), FileFormat::Elf64, true)?;
/// let function = translator.get_function(0x400100)?;
/// for (address, block) in function.get_blocks() {
///     println!("{address:#x}: {:?}", block.terminator());
/// }
/// ```
pub struct Translator {
    image: Image,
    catalog: DumpCatalog,
    functions: FunctionMap,
    blocks: BlockMap,
    state: Mutex<LiftState>,
    is_finalized: AtomicBool,
}

impl Translator {
    /// Constructs a translator for the binary at `file`.
    ///
    /// Requires the exported dump files `<file>.dmp` and
    /// `<file>.dmp.no-return` next to the input binary; these are produced
    /// out-of-band by the disassembler export scripts.
    ///
    /// # Arguments
    ///
    /// * `lifter` - The external IR lifter to drive
    /// * `file` - The binary to operate on
    /// * `file_format` - Container format of the binary
    /// * `parse_on_demand` - `true` to translate functions as they are
    ///   queried, `false` to translate all known functions at once
    ///
    /// # Errors
    ///
    /// Image or catalog loading errors; see [`Image::from_path`] and
    /// [`DumpCatalog::load`].
    pub fn new(
        lifter: Box<dyn Lifter>,
        file: &Path,
        file_format: FileFormat,
        parse_on_demand: bool,
    ) -> Result<Translator> {
        let image = Image::from_path(file, file_format)?;
        let catalog = DumpCatalog::load(file)?;
        Ok(Self::with_parts(lifter, image, catalog, parse_on_demand))
    }

    /// Constructs a translator from already-loaded collaborators.
    ///
    /// # Arguments
    ///
    /// * `lifter` - The external IR lifter to drive
    /// * `image` - The mapped binary image
    /// * `catalog` - The function-boundary catalog
    /// * `parse_on_demand` - As in [`Translator::new`]
    pub fn with_parts(
        lifter: Box<dyn Lifter>,
        image: Image,
        catalog: DumpCatalog,
        parse_on_demand: bool,
    ) -> Translator {
        let translator = Translator {
            image,
            catalog,
            functions: SkipMap::new(),
            blocks: SkipMap::new(),
            state: Mutex::new(LiftState {
                lifter,
                seen_blocks: FxHashSet::default(),
            }),
            is_finalized: AtomicBool::new(false),
        };

        if !parse_on_demand {
            translator.parse_known_functions();
        }

        translator
    }

    /// Eagerly translates every catalog entry.
    ///
    /// Functions that fail to translate are skipped; earlier successes are
    /// retained.
    pub fn parse_known_functions(&self) {
        let mut state = lock!(self.state);

        for (address, blocks) in self.catalog.get_functions() {
            if self.functions.contains_key(address) {
                continue;
            }
            self.translate_function(&mut state, *address, blocks);
        }
    }

    /// Returns the function at `address`, translating it on demand.
    ///
    /// # Errors
    ///
    /// [`NotFound`] if the catalog has no entry at `address` or its
    /// translation was discarded.
    pub fn get_function(&self, address: u64) -> Result<FunctionRc> {
        self.maybe_get_function(address).ok_or(NotFound(address))
    }

    /// Returns the function at `address` without translating on demand.
    ///
    /// # Errors
    ///
    /// [`NotFound`] if the function has not been translated yet.
    pub fn cget_function(&self, address: u64) -> Result<FunctionRc> {
        self.functions
            .get(&address)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(NotFound(address))
    }

    /// Returns the function at `address`, translating it on demand, or
    /// `None` if the catalog does not know it.
    pub fn maybe_get_function(&self, address: u64) -> Option<FunctionRc> {
        // Fast path for the common case of an already-translated function;
        // re-checked below with the lift mutex held.
        if let Some(entry) = self.functions.get(&address) {
            return Some(Arc::clone(entry.value()));
        }

        let mut state = lock!(self.state);
        self.maybe_translate_function(&mut state, address)
    }

    /// Returns the translated function whose block range spans `address`.
    ///
    /// # Errors
    ///
    /// [`NotFound`] if no translated function contains the address.
    pub fn get_containing_function(&self, address: u64) -> Result<FunctionRc> {
        for entry in self.functions.iter() {
            if entry.value().contains_address(address) {
                return Ok(Arc::clone(entry.value()));
            }
        }

        Err(NotFound(address))
    }

    /// Returns the whole function registry for bulk access.
    ///
    /// # Errors
    ///
    /// [`Finalized`] once [`Translator::finalize`] has been called.
    pub fn get_functions_mutable(&self) -> Result<&FunctionMap> {
        if self.is_finalized.load(Ordering::Acquire) {
            return Err(Finalized);
        }
        Ok(&self.functions)
    }

    /// The global memo of owned super-blocks, keyed by block address.
    ///
    /// Blocks shared between functions appear here exactly once; only the
    /// function that first encountered a shared block carries it in its
    /// own block map. Downstream code that traces across function
    /// boundaries goes through this map.
    #[must_use]
    pub fn get_blocks(&self) -> &BlockMap {
        &self.blocks
    }

    /// The mapped binary image.
    #[must_use]
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Records the address of a site referencing the function at `fct_addr`.
    ///
    /// # Errors
    ///
    /// [`NotFound`] if no translated function exists at `fct_addr`.
    pub fn add_function_xref(&self, fct_addr: u64, xref_addr: u64) -> Result<()> {
        let entry = self.functions.get(&fct_addr).ok_or(NotFound(fct_addr))?;
        entry.value().add_xref(xref_addr);
        Ok(())
    }

    /// Records a virtual-table slot referencing the function at `fct_addr`.
    ///
    /// # Errors
    ///
    /// [`NotFound`] if no translated function exists at `fct_addr`.
    pub fn add_function_vfunc_xref(&self, fct_addr: u64, xref_addr: u64) -> Result<()> {
        let entry = self.functions.get(&fct_addr).ok_or(NotFound(fct_addr))?;
        entry.value().add_vfunc_xref(xref_addr);
        Ok(())
    }

    /// Freezes the translator; idempotent.
    ///
    /// Afterwards [`Translator::get_functions_mutable`] refuses with
    /// [`Finalized`]; read access and xref annotation remain available.
    pub fn finalize(&self) {
        self.is_finalized.store(true, Ordering::Release);
    }

    /// Returns `true` once [`Translator::finalize`] has been called.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.is_finalized.load(Ordering::Acquire)
    }

    fn maybe_translate_function(
        &self,
        state: &mut LiftState,
        address: u64,
    ) -> Option<FunctionRc> {
        if let Some(entry) = self.functions.get(&address) {
            return Some(Arc::clone(entry.value()));
        }

        let blocks = self.catalog.get_functions().get(&address)?;
        self.translate_function(state, address, blocks)
    }

    fn translate_function(
        &self,
        state: &mut LiftState,
        address: u64,
        blocks: &[BlockDescriptor],
    ) -> Option<FunctionRc> {
        let mut function = Function::new(address);

        for descriptor in blocks {
            let ok = match self.process_block(state, &mut function, descriptor) {
                Ok(ok) => ok,
                Err(error) => {
                    warn!("lift error in function {address:#x}: {error}");
                    false
                }
            };

            if !ok {
                warn!("discarding partially translated function {address:#x}");
                return None;
            }
        }

        detect_tail_jumps(&mut function);

        let function = Arc::new(function);
        self.functions.insert(address, Arc::clone(&function));
        Some(function)
    }

    fn process_block(
        &self,
        state: &mut LiftState,
        function: &mut Function,
        block: &BlockDescriptor,
    ) -> Result<bool> {
        if block.is_empty() {
            return Ok(true);
        }

        if state.seen_blocks.contains(&block.block_start) {
            return Ok(true);
        }

        let bytes = self.image.bytes_at(block.block_start)?;
        if let Some(segment) = self.image.segment_at(block.block_start) {
            if !segment.is_executable() {
                warn!(
                    "lifting block {:#x} from a non-executable segment",
                    block.block_start
                );
            }
        }

        let lifted = state
            .lifter
            .lift(bytes, block.block_start, block.instruction_count)?;
        let real_end = lifted.real_end;

        // The lifter's buffer is transient; take an owning copy before
        // anything else touches it.
        let mut owned = lifted.irsb.clone();

        state.seen_blocks.insert(block.block_start);

        let head_instructions = u32::try_from(owned.imark_count()).unwrap_or(u32::MAX);

        if head_instructions < block.instruction_count {
            // The lifter stopped early, typically at an intra-block call
            // it split on. Re-drive the remainder, then finalize the head.
            if real_end == block.block_start {
                warn!("lifter made no progress at {:#x}", block.block_start);
                return Ok(false);
            }

            debug!(
                "split block {:#x}: {head_instructions}/{} instructions, tail at {real_end:#x}",
                block.block_start, block.instruction_count
            );

            let split = BlockDescriptor {
                block_start: real_end,
                block_end: block.block_end,
                instruction_count: block.instruction_count - head_instructions,
            };

            let result = self.process_block(state, function, &split)?;
            self.finalize_block(function, block, owned);
            return Ok(result);
        }

        // The lifter ran past the catalog boundary; one of the interior
        // instructions is a branch target the lifter does not know about.
        if let Some(addr) = owned.truncate_to_insns(block.instruction_count) {
            debug!(
                "truncated over-translated block {:#x} at {addr:#x}",
                block.block_start
            );
        }

        self.finalize_block(function, block, owned);
        Ok(true)
    }

    fn finalize_block(&self, function: &mut Function, block: &BlockDescriptor, owned: IrSb) {
        let mut terminator = classify(&owned, block.block_start);

        // Calls and jumps into functions known not to return lose their
        // fall-through edge.
        if matches!(terminator.kind, TerminatorKind::Call | TerminatorKind::Jump)
            && self.catalog.get_non_returning().contains(&terminator.target)
        {
            terminator.kind = TerminatorKind::NoReturn;
        }

        let irsb = Arc::new(owned);
        function.add_block(Block::new(block.block_start, Arc::clone(&irsb), terminator));
        self.blocks.insert(block.block_start, irsb);
    }
}

/// Flags every jump whose target is not a block of `function` as a tail
/// jump, and clears the flag everywhere else.
///
/// Runs exactly once per function, after all blocks are attached and
/// before the function is frozen. Only resolvable jumps are considered:
/// calls into non-returning functions were already promoted during block
/// finalization, and fall-throughs never leave the function.
fn detect_tail_jumps(function: &mut Function) {
    let addresses: Vec<u64> = function.get_blocks().keys().copied().collect();

    for block in function.blocks_mut() {
        let terminator = block.terminator_mut();
        terminator.is_tail = false;

        if terminator.kind == TerminatorKind::Jump {
            terminator.is_tail = addresses.binary_search(&terminator.target).is_err();
        }
    }
}
