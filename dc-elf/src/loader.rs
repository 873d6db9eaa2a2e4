//! Segment Loader
//!
//! Loading happens in two steps. [`plan`] parses the image and validates every
//! loadable segment against it; nothing is written until the whole image has
//! been checked. [`LoadPlan::apply`] then copies each segment's file data to
//! its physical destination and zero-fills the rest of its memory size.
//!
//! A structurally malformed program header (table outside the image, file
//! data outside the image, memory size below file size) rejects the image.
//! Segments that are not `PT_LOAD` are skipped.

use core::ptr;

use elf_rs::{Elf, ElfFile};
use heapless::Vec;

use crate::error::ElfError;
use crate::header::{ElfClass, PT_LOAD, PhdrTable};

/// Maximum number of loadable segments in one image.
pub const MAX_SEGMENTS: usize = 16;

/// A validated loadable segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Offset of the segment's data in the image
    pub file_offset: usize,
    /// Bytes copied from the image
    pub file_size: usize,
    /// Bytes occupied in memory; the tail past `file_size` is zeroed
    pub mem_size: usize,
    /// Physical destination address
    pub dest: u64,
}

impl Segment {
    #[must_use]
    pub const fn dest_end(&self) -> u64 {
        self.dest + self.mem_size as u64
    }

    fn validate(offset: u64, filesz: u64, memsz: u64, paddr: u64, image_len: usize) -> Result<Self, ElfError> {
        if memsz < filesz {
            log::warn!("Segment memory size {:#x} below file size {:#x}", memsz, filesz);
            return Err(ElfError::MalformedProgramHeader);
        }

        let file_size = usize::try_from(filesz).map_err(|_| ElfError::SegmentOutOfBounds)?;
        let file_offset = if file_size == 0 {
            0
        } else {
            usize::try_from(offset).map_err(|_| ElfError::SegmentOutOfBounds)?
        };
        match file_offset.checked_add(file_size) {
            Some(end) if end <= image_len => {}
            _ => {
                log::warn!("Segment data {:#x}+{:#x} outside image", offset, filesz);
                return Err(ElfError::SegmentOutOfBounds);
            }
        }

        if paddr == 0 {
            log::warn!("Segment has no physical destination");
            return Err(ElfError::MalformedProgramHeader);
        }
        let mem_size = usize::try_from(memsz).map_err(|_| ElfError::MalformedProgramHeader)?;
        paddr
            .checked_add(memsz)
            .and_then(|end| usize::try_from(end).ok())
            .ok_or(ElfError::MalformedProgramHeader)?;

        Ok(Self {
            file_offset,
            file_size,
            mem_size,
            dest: paddr,
        })
    }
}

/// Validated segments and entry point of an image.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    entry: u64,
    segments: Vec<Segment, MAX_SEGMENTS>,
}

impl LoadPlan {
    /// Entry point address from the ELF header.
    #[must_use]
    pub const fn entry(&self) -> u64 {
        self.entry
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn source<'i>(image: &'i [u8], seg: &Segment) -> Result<&'i [u8], ElfError> {
        image
            .get(seg.file_offset..seg.file_offset + seg.file_size)
            .ok_or(ElfError::SegmentOutOfBounds)
    }

    /// Copy every segment to its physical destination.
    ///
    /// # Safety
    /// Each segment's `[dest, dest + mem_size)` must be writable memory that
    /// overlaps neither the running code nor anything still in use.
    pub unsafe fn apply(&self, image: &[u8]) -> Result<(), ElfError> {
        for seg in &self.segments {
            Self::source(image, seg)?;
        }

        for seg in &self.segments {
            let src = Self::source(image, seg)?;
            let dest = seg.dest as usize as *mut u8;

            log::debug!(
                "Loading segment: file offset {:#x}, size {:#x} -> {:#x} ({:#x} bytes)",
                seg.file_offset,
                seg.file_size,
                seg.dest,
                seg.mem_size
            );

            // SAFETY: Caller guarantees the destination range is writable;
            // src is a checked slice of the image
            unsafe {
                ptr::copy(src.as_ptr(), dest, seg.file_size);
                ptr::write_bytes(dest.add(seg.file_size), 0, seg.mem_size - seg.file_size);
            }
        }
        Ok(())
    }

    /// The only loadable segment of the image.
    pub fn single_segment(&self) -> Result<Segment, ElfError> {
        match self.segments.as_slice() {
            [seg] => Ok(*seg),
            [] => Err(ElfError::NoLoadableSegment),
            _ => Err(ElfError::TooManySegments),
        }
    }

    /// Place the single loadable segment in `dest` instead of at its physical
    /// address, returning the entry point's offset within `dest`.
    pub fn load_single_into(&self, image: &[u8], dest: &mut [u8]) -> Result<usize, ElfError> {
        let seg = self.single_segment()?;
        if dest.len() < seg.mem_size {
            return Err(ElfError::DestinationTooSmall);
        }

        let entry_offset = self
            .entry
            .checked_sub(seg.dest)
            .filter(|&offset| offset < seg.mem_size as u64)
            .ok_or(ElfError::EntryOutsideSegment)? as usize;

        let src = Self::source(image, &seg)?;
        dest[..seg.file_size].copy_from_slice(src);
        dest[seg.file_size..seg.mem_size].fill(0);

        log::debug!(
            "Loaded single segment: {:#x} bytes, entry at offset {:#x}",
            seg.mem_size,
            entry_offset
        );
        Ok(entry_offset)
    }
}

/// Parse `image` and validate every loadable segment.
pub fn plan(image: &[u8], class: ElfClass) -> Result<LoadPlan, ElfError> {
    let table = PhdrTable::read(image, class)?;

    let elf = Elf::from_bytes(image).map_err(|e| {
        log::warn!("Failed to parse ELF file: {:?}", e);
        ElfError::Parse
    })?;
    let entry = match elf {
        Elf::Elf32(elf) => elf.elf_header().entry_point(),
        Elf::Elf64(elf) => elf.elf_header().entry_point(),
    };

    // elf_rs steps through the table by the class's entry size, so padded
    // entries are walked here instead
    let mut segments = Vec::new();
    for phdr in table.iter(image) {
        let phdr = phdr?;
        if phdr.p_type != PT_LOAD {
            continue;
        }
        let seg = Segment::validate(phdr.offset, phdr.filesz, phdr.memsz, phdr.paddr, image.len())?;
        segments.push(seg).map_err(|_| ElfError::TooManySegments)?;
    }

    log::info!("ELF entry point: {:#x}, {} loadable segment(s)", entry, segments.len());
    Ok(LoadPlan { entry, segments })
}

/// Validate `image` and copy its loadable segments into place.
///
/// # Safety
/// See [`LoadPlan::apply`].
pub unsafe fn load(image: &[u8], class: ElfClass) -> Result<LoadPlan, ElfError> {
    let plan = plan(image, class)?;
    // SAFETY: Forwarded from the caller
    unsafe { plan.apply(image)? };
    Ok(plan)
}

/// Validate `image` and place its single loadable segment in `dest`.
pub fn load_single_segment_into(
    image: &[u8],
    class: ElfClass,
    dest: &mut [u8],
) -> Result<usize, ElfError> {
    plan(image, class)?.load_single_into(image, dest)
}
