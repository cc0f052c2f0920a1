use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Image and Catalog Loading
/// - [`Error::UnsupportedFormat`] - File format tag not supported for translation
/// - [`Error::Malformed`] - Corrupted or invalid input structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the mapped image
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinError`] - ELF/PE parsing errors from the goblin crate
///
/// ## Translation
/// - [`Error::NotFound`] - Address lookup failed in the registry or catalog
/// - [`Error::Finalized`] - Mutable accessor invoked after finalization
/// - [`Error::LiftFailure`] - The external lifter failed to make progress
///
/// # Examples
///
/// ```rust,ignore
/// use vexscope::{image::FileFormat, Error, Translator};
///
/// match Translator::new(my_lifter, "app.bin".as_ref(), FileFormat::Elf64, true) {
///     Ok(translator) => println!("ready"),
///     Err(Error::UnsupportedFormat) => eprintln!("not a 64-bit image"),
///     Err(Error::FileError(io_err)) => eprintln!("I/O error: {}", io_err),
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// This file format is not supported.
    ///
    /// Raised at construction when the format tag does not match the image,
    /// e.g. a 32-bit ELF class or a PE32 (non-PE32+) optional header.
    #[error("This file format is not supported")]
    UnsupportedFormat,

    /// An address lookup failed.
    ///
    /// The registry, the dump catalog, or the image segment table has no
    /// entry covering the requested address.
    #[error("No entry for address {0:#x}")]
    NotFound(u64),

    /// A mutable accessor was invoked after `finalize()`.
    ///
    /// Once the translator is finalized only read access and append-only
    /// xref annotation remain available.
    #[error("Translator object is already finalized")]
    Finalized,

    /// The external lifter failed to make progress on a block.
    ///
    /// Reserved for lifters that report success without consuming bytes;
    /// the enclosing function is discarded rather than surfacing this to
    /// callers of the lookup API.
    #[error("Lifter made no progress at address {0:#x}")]
    LiftFailure(u64),

    /// The input is damaged and could not be parsed.
    ///
    /// Covers dump catalog syntax errors and inconsistent block
    /// descriptors. Includes the source location where the malformation
    /// was detected for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted on the mapped image.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during ELF/PE parsing.
    #[error("{0}")]
    GoblinError(#[from] goblin::error::Error),
}
