//! Function-boundary catalog loaded from disassembler dump files.
//!
//! The catalog is produced out-of-band by a disassembler export script and
//! ships as two sibling files of the input binary: `<binary>.dmp` holds the
//! function list with per-block boundaries, `<binary>.dmp.no-return` the
//! addresses of functions known a priori not to return.
//!
//! The `.dmp` file is line based. A `function <entry>` line opens a
//! function; every following `<start> <end> <count>` line appends one block
//! descriptor to it. Addresses are bare hexadecimal, the instruction count
//! is decimal. Blank lines and `#` comments are ignored:
//!
//! ```text
//! # exported from app.bin
//! function 400100
//! 400100 400110 1
//! 400110 400130 4
//!
//! function 400200
//! 400200 400210 2
//! ```
//!
//! The `.dmp.no-return` sibling is one bare hexadecimal address per line,
//! same comment rules.

use std::{collections::BTreeMap, fs, path::Path};

use log::debug;
use rustc_hash::FxHashSet;

use crate::Result;

/// Boundaries of one basic block as recorded by the exporting disassembler.
///
/// `block_end` is an exclusive upper bound; a descriptor with
/// `block_start == block_end` is the empty sentinel and translates to
/// nothing. `instruction_count` is the number of machine instructions the
/// exporter counted in the block; the lifter may disagree, which the block
/// processor corrects for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    /// Virtual address of the first instruction.
    pub block_start: u64,
    /// Exclusive virtual end address.
    pub block_end: u64,
    /// Expected number of machine instructions.
    pub instruction_count: u32,
}

impl BlockDescriptor {
    /// Returns `true` for the `block_start == block_end` sentinel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block_start == self.block_end
    }
}

/// The ordered blocks of one catalog function.
pub type FunctionBlocks = Vec<BlockDescriptor>;

/// Parsed dump catalog: function boundaries plus the no-return set.
#[derive(Debug, Default)]
pub struct DumpCatalog {
    functions: BTreeMap<u64, FunctionBlocks>,
    non_returning: FxHashSet<u64>,
}

impl DumpCatalog {
    /// Loads the catalog belonging to the binary at `binary_path`.
    ///
    /// Reads `<binary_path>.dmp` and `<binary_path>.dmp.no-return`; both
    /// siblings are required.
    ///
    /// # Errors
    ///
    /// I/O errors if either sibling is missing, [`crate::Error::Malformed`]
    /// on syntax errors.
    pub fn load(binary_path: &Path) -> Result<DumpCatalog> {
        let mut dmp_path = binary_path.as_os_str().to_os_string();
        dmp_path.push(".dmp");
        let mut no_return_path = dmp_path.clone();
        no_return_path.push(".no-return");

        let dmp = fs::read_to_string(&dmp_path)?;
        let no_return = fs::read_to_string(&no_return_path)?;

        Self::parse(&dmp, &no_return)
    }

    /// Parses catalog text without touching the filesystem.
    ///
    /// # Arguments
    ///
    /// * `dmp` - Contents of the `.dmp` file
    /// * `no_return` - Contents of the `.dmp.no-return` file
    ///
    /// # Errors
    ///
    /// [`crate::Error::Malformed`] on syntax errors: a block line outside a
    /// function, a re-declared function, unparsable fields.
    pub fn parse(dmp: &str, no_return: &str) -> Result<DumpCatalog> {
        let mut functions: BTreeMap<u64, FunctionBlocks> = BTreeMap::new();
        let mut current: Option<u64> = None;

        for line in dmp.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(entry) = line.strip_prefix("function ") {
                let entry = parse_hex(entry.trim())?;
                if functions.contains_key(&entry) {
                    return Err(malformed_error!(
                        "Function {:#x} declared twice in dump file",
                        entry
                    ));
                }
                functions.insert(entry, Vec::new());
                current = Some(entry);
                continue;
            }

            let Some(entry) = current else {
                return Err(malformed_error!(
                    "Block descriptor before any function line: {:?}",
                    line
                ));
            };

            let fields: Vec<&str> = line.split_whitespace().collect();
            let [start, end, count] = fields.as_slice() else {
                return Err(malformed_error!(
                    "Expected `start end count`, got {:?}",
                    line
                ));
            };

            let descriptor = BlockDescriptor {
                block_start: parse_hex(start)?,
                block_end: parse_hex(end)?,
                instruction_count: count
                    .parse()
                    .map_err(|_| malformed_error!("Invalid instruction count {:?}", count))?,
            };

            if descriptor.block_end < descriptor.block_start {
                return Err(malformed_error!(
                    "Block end {:#x} precedes start {:#x}",
                    descriptor.block_end,
                    descriptor.block_start
                ));
            }

            functions
                .get_mut(&entry)
                .expect("current function must exist")
                .push(descriptor);
        }

        let mut non_returning = FxHashSet::default();
        for line in no_return.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            non_returning.insert(parse_hex(line)?);
        }

        debug!(
            "dump catalog: {} functions, {} non-returning targets",
            functions.len(),
            non_returning.len()
        );

        Ok(DumpCatalog {
            functions,
            non_returning,
        })
    }

    /// All catalog functions, ordered by entry address.
    #[must_use]
    pub fn get_functions(&self) -> &BTreeMap<u64, FunctionBlocks> {
        &self.functions
    }

    /// Addresses known a priori not to return.
    #[must_use]
    pub fn get_non_returning(&self) -> &FxHashSet<u64> {
        &self.non_returning
    }
}

fn parse_hex(field: &str) -> Result<u64> {
    let digits = field.strip_prefix("0x").unwrap_or(field);
    u64::from_str_radix(digits, 16)
        .map_err(|_| malformed_error!("Invalid hex address {:?}", field))
}
