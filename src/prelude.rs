//! Convenient re-exports of the most commonly used types.
//!
//! ```rust,ignore
//! use vexscope::prelude::*;
//!
//! let translator = Translator::new(lifter, path, FileFormat::Elf64, true)?;
//! ```

pub use crate::catalog::{BlockDescriptor, DumpCatalog, FunctionBlocks};
pub use crate::function::{Block, Function, FunctionRc, Terminator, TerminatorKind};
pub use crate::image::{FileFormat, Image, Segment, SegmentFlags};
pub use crate::ir::{IrExpr, IrSb, IrSbRc, IrStmt, JumpKind};
pub use crate::lifter::{LiftedBlock, Lifter};
pub use crate::translator::{BlockMap, FunctionMap, Translator};
pub use crate::{Error, Result};
