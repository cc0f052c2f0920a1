//! Memory image abstraction over executable binaries.
//!
//! This module maps ELF64 and PE64 binaries and provides byte access by
//! virtual address, which is what the lifter driver consumes. It abstracts
//! over different data sources (files, memory) and keeps an owned segment
//! table extracted from the container headers, so no parse state outlives
//! construction.
//!
//! # Key Types
//! - [`Image`] - A loaded binary with virtual-address byte access
//! - [`FileFormat`] - Supported container formats
//! - [`Segment`] - One mapped region of the image
//! - [`Backend`] - Trait for different data sources (disk files, memory buffers)
//!
//! # Examples
//!
//! ```rust,no_run
//! use vexscope::image::{FileFormat, Image};
//! use std::path::Path;
//!
//! let image = Image::from_path(Path::new("app.bin"), FileFormat::Elf64)?;
//! let code = image.bytes_at(0x401000)?;
//! println!("{} bytes mapped at the entry block", code.len());
//! # Ok::<(), vexscope::Error>(())
//! ```

mod memory;
mod physical;

use std::path::Path;

use bitflags::bitflags;
use goblin::{
    elf::{program_header::PT_LOAD, Elf},
    pe::PE,
};

use crate::{
    Error::{NotFound, OutOfBounds, UnsupportedFormat},
    Result,
};
use memory::Memory;
use physical::Physical;

/// Container formats the translator can operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// 64-bit ELF executables and shared objects.
    Elf64,
    /// 64-bit PE (PE32+) executables and DLLs.
    Pe64,
}

bitflags! {
    /// Access permissions of a mapped segment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u8 {
        /// Segment is readable.
        const READ = 0b001;
        /// Segment is writable.
        const WRITE = 0b010;
        /// Segment is executable.
        const EXECUTE = 0b100;
    }
}

/// One file-backed region of the loaded image.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    /// Virtual address the region is mapped at.
    pub vaddr: u64,
    /// Number of file-backed bytes in the region.
    pub size: u64,
    /// Offset of the region within the input file.
    pub offset: usize,
    /// Access permissions.
    pub flags: SegmentFlags,
}

impl Segment {
    /// Returns `true` if `va` lies within this segment's file-backed bytes.
    #[must_use]
    pub fn contains(&self, va: u64) -> bool {
        va >= self.vaddr && va - self.vaddr < self.size
    }

    /// Returns `true` if the segment is mapped executable.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.flags.contains(SegmentFlags::EXECUTE)
    }
}

/// Backend trait for image data sources.
///
/// This trait abstracts over the source of binary data, allowing for both
/// in-memory and on-disk representations. All implementations must be
/// thread-safe.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Arguments
    ///
    /// * `offset` - The starting offset within the data.
    /// * `len` - The length of the slice in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

/// A loaded executable image with byte access by virtual address.
///
/// The segment table is extracted from the container headers at
/// construction time; afterwards the image is immutable and shareable
/// across threads. Byte views handed out by [`Image::bytes_at`] live as
/// long as the image itself.
pub struct Image {
    backend: Box<dyn Backend>,
    segments: Vec<Segment>,
    format: FileFormat,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("format", &self.format)
            .field("len", &self.backend.len())
            .field("segments", &self.segments)
            .finish()
    }
}

impl Image {
    /// Loads an image from a file on disk.
    ///
    /// The file is memory-mapped; the image borrows no other resources.
    ///
    /// # Arguments
    ///
    /// * `path` - The file to map
    /// * `format` - Expected container format
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedFormat`] if the container is not the 64-bit
    /// variant of `format`, a goblin error if the container is malformed,
    /// or an I/O error if the file cannot be mapped.
    pub fn from_path(path: &Path, format: FileFormat) -> Result<Image> {
        Self::with_backend(Box::new(Physical::new(path)?), format)
    }

    /// Loads an image from an in-memory buffer.
    ///
    /// # Arguments
    ///
    /// * `data` - The raw container bytes to consume
    /// * `format` - Expected container format
    ///
    /// # Errors
    ///
    /// Same conditions as [`Image::from_path`], minus the I/O.
    pub fn from_mem(data: Vec<u8>, format: FileFormat) -> Result<Image> {
        Self::with_backend(Box::new(Memory::new(data)), format)
    }

    fn with_backend(backend: Box<dyn Backend>, format: FileFormat) -> Result<Image> {
        let mut segments = match format {
            FileFormat::Elf64 => Self::parse_elf64(backend.data())?,
            FileFormat::Pe64 => Self::parse_pe64(backend.data())?,
        };

        segments.sort_by_key(|segment| segment.vaddr);

        Ok(Image {
            backend,
            segments,
            format,
        })
    }

    fn parse_elf64(data: &[u8]) -> Result<Vec<Segment>> {
        let elf = Elf::parse(data)?;
        if !elf.is_64 {
            return Err(UnsupportedFormat);
        }

        let mut segments = Vec::new();
        for header in &elf.program_headers {
            if header.p_type != PT_LOAD || header.p_filesz == 0 {
                continue;
            }

            let mut flags = SegmentFlags::empty();
            if header.p_flags & goblin::elf::program_header::PF_R != 0 {
                flags |= SegmentFlags::READ;
            }
            if header.p_flags & goblin::elf::program_header::PF_W != 0 {
                flags |= SegmentFlags::WRITE;
            }
            if header.p_flags & goblin::elf::program_header::PF_X != 0 {
                flags |= SegmentFlags::EXECUTE;
            }

            segments.push(Segment {
                vaddr: header.p_vaddr,
                size: header.p_filesz,
                offset: usize::try_from(header.p_offset).map_err(|_| OutOfBounds)?,
                flags,
            });
        }

        Ok(segments)
    }

    fn parse_pe64(data: &[u8]) -> Result<Vec<Segment>> {
        use goblin::pe::section_table::{
            IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_READ, IMAGE_SCN_MEM_WRITE,
        };

        let pe = PE::parse(data)?;
        if !pe.is_64 {
            return Err(UnsupportedFormat);
        }

        let image_base = pe.image_base as u64;
        let mut segments = Vec::new();
        for section in &pe.sections {
            if section.size_of_raw_data == 0 {
                continue;
            }

            let mut flags = SegmentFlags::empty();
            if section.characteristics & IMAGE_SCN_MEM_READ != 0 {
                flags |= SegmentFlags::READ;
            }
            if section.characteristics & IMAGE_SCN_MEM_WRITE != 0 {
                flags |= SegmentFlags::WRITE;
            }
            if section.characteristics & IMAGE_SCN_MEM_EXECUTE != 0 {
                flags |= SegmentFlags::EXECUTE;
            }

            segments.push(Segment {
                vaddr: image_base + u64::from(section.virtual_address),
                size: u64::from(section.size_of_raw_data),
                offset: section.pointer_to_raw_data as usize,
                flags,
            });
        }

        Ok(segments)
    }

    /// The container format this image was loaded with.
    #[must_use]
    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// The mapped segments, ordered by virtual address.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The segment containing `va`, if any.
    #[must_use]
    pub fn segment_at(&self, va: u64) -> Option<&Segment> {
        let index = self.segments.partition_point(|segment| segment.vaddr <= va);
        let candidate = self.segments[..index].last()?;
        candidate.contains(va).then_some(candidate)
    }

    /// Byte view starting at virtual address `va`.
    ///
    /// The slice extends to the end of the containing segment's
    /// file-backed data, which covers at least one basic block for any
    /// address a catalog descriptor points at.
    ///
    /// # Errors
    ///
    /// [`NotFound`] if no segment maps `va`; [`OutOfBounds`] if the
    /// segment table points outside the file.
    pub fn bytes_at(&self, va: u64) -> Result<&[u8]> {
        let segment = self.segment_at(va).ok_or(NotFound(va))?;
        let into_segment = va - segment.vaddr;
        let len = usize::try_from(segment.size - into_segment).map_err(|_| OutOfBounds)?;
        self.backend
            .data_slice(segment.offset + into_segment as usize, len)
    }

    /// Translates a virtual address to its offset within the input file.
    ///
    /// # Errors
    ///
    /// [`NotFound`] if no segment maps `va`.
    pub fn va_to_offset(&self, va: u64) -> Result<usize> {
        let segment = self.segment_at(va).ok_or(NotFound(va))?;
        Ok(segment.offset + (va - segment.vaddr) as usize)
    }
}
