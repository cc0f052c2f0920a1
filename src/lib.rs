// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]

//! # vexscope
//!
//! A framework for lifting machine code out of ELF64 and PE64 binaries
//! into a normalized, per-function intermediate representation suitable
//! for static analysis. Built in pure Rust, `vexscope` drives an external
//! VEX-style block lifter over an externally produced function-boundary
//! catalog and emits one IR-annotated control-flow graph per function,
//! with every block terminator classified.
//!
//! # Architecture
//!
//! The crate is organized into a small set of layers:
//!
//! - **Image layer** ([`image`]): memory-mapped binary access with byte
//!   views by virtual address, format-dispatched over ELF64 and PE64.
//! - **Catalog layer** ([`catalog`]): function and block boundaries plus
//!   the set of known non-returning targets, loaded from the `.dmp` dump
//!   files exported by a disassembler plugin.
//! - **IR layer** ([`ir`], [`lifter`]): the super-block vocabulary shared
//!   with the external lifter, and the lifter trait itself.
//! - **Translation layer** ([`translator`], [`function`]): the core. It
//!   repairs boundary disagreements between lifter and catalog, fuses the
//!   terminator signals, detects tail jumps, and owns the resulting
//!   [`function::Function`] registry.
//!
//! # Usage
//!
//! ```rust,ignore
//! use vexscope::{image::FileFormat, Translator};
//!
//! // `lifter` is any Box<dyn Lifter>; app.bin.dmp and app.bin.dmp.no-return
//! // must sit next to the binary.
//! let translator = Translator::new(lifter, "app.bin".as_ref(), FileFormat::Elf64, true)?;
//!
//! let function = translator.get_function(0x400100)?;
//! for (address, block) in function.get_blocks() {
//!     println!("{address:#x} -> {:?}", block.terminator());
//! }
//! ```
//!
//! # Thread Safety
//!
//! A [`Translator`] is safe to share across threads: the registries are
//! lock-free ordered maps, and the non-reentrant external lifter is
//! driven from at most one thread at a time behind an internal mutex.
//! Translated functions are handed out as immutable shared handles whose
//! xref sets remain appendable.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

pub mod catalog;
pub mod function;
pub mod image;
pub mod ir;
pub mod lifter;
pub mod prelude;
pub mod translator;

/// Shorthand result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

pub use error::Error;
pub use translator::Translator;
