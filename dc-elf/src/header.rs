//! ELF Identification
//!
//! The file header and program headers are read here as little-endian wire
//! structs. The program header table is walked at the stride the file header
//! states, so producers that pad their entries are handled.

use zerocopy::byteorder::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::ElfError;

/// `\x7fELF`
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_NIDENT: usize = 16;
/// Two's complement, little-endian
const ELFDATA2LSB: u8 = 1;

/// `PT_LOAD`
pub const PT_LOAD: u32 = 1;

/// ELF address-width class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElfClass {
    Elf32 = 1,
    Elf64 = 2,
}

impl ElfClass {
    /// Class matching the pointer width of this build.
    #[cfg(target_pointer_width = "64")]
    pub const NATIVE: Self = Self::Elf64;
    #[cfg(not(target_pointer_width = "64"))]
    pub const NATIVE: Self = Self::Elf32;

    /// Size of the ELF file header for this class.
    #[must_use]
    pub const fn header_size(self) -> usize {
        match self {
            Self::Elf32 => size_of::<Elf32Ehdr>(),
            Self::Elf64 => size_of::<Elf64Ehdr>(),
        }
    }

    /// Size of one program header entry for this class.
    #[must_use]
    pub const fn phdr_size(self) -> usize {
        match self {
            Self::Elf32 => size_of::<Elf32Phdr>(),
            Self::Elf64 => size_of::<Elf64Phdr>(),
        }
    }

    const fn from_ident(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Elf32),
            2 => Some(Self::Elf64),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[allow(dead_code)]
struct Elf32Ehdr {
    e_ident: [u8; EI_NIDENT],
    e_type: U16,
    e_machine: U16,
    e_version: U32,
    e_entry: U32,
    e_phoff: U32,
    e_shoff: U32,
    e_flags: U32,
    e_ehsize: U16,
    e_phentsize: U16,
    e_phnum: U16,
    e_shentsize: U16,
    e_shnum: U16,
    e_shstrndx: U16,
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[allow(dead_code)]
struct Elf64Ehdr {
    e_ident: [u8; EI_NIDENT],
    e_type: U16,
    e_machine: U16,
    e_version: U32,
    e_entry: U64,
    e_phoff: U64,
    e_shoff: U64,
    e_flags: U32,
    e_ehsize: U16,
    e_phentsize: U16,
    e_phnum: U16,
    e_shentsize: U16,
    e_shnum: U16,
    e_shstrndx: U16,
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[allow(dead_code)]
struct Elf32Phdr {
    p_type: U32,
    p_offset: U32,
    p_vaddr: U32,
    p_paddr: U32,
    p_filesz: U32,
    p_memsz: U32,
    p_flags: U32,
    p_align: U32,
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[allow(dead_code)]
struct Elf64Phdr {
    p_type: U32,
    p_flags: U32,
    p_offset: U64,
    p_vaddr: U64,
    p_paddr: U64,
    p_filesz: U64,
    p_memsz: U64,
    p_align: U64,
}

const _: () = assert!(size_of::<Elf32Ehdr>() == 52);
const _: () = assert!(size_of::<Elf64Ehdr>() == 64);
const _: () = assert!(size_of::<Elf32Phdr>() == 32);
const _: () = assert!(size_of::<Elf64Phdr>() == 56);

/// Check the magic bytes, the byte order and the address-width class of
/// `image`.
///
/// Never aborts: callers decide whether an unrecognised image is fatal.
pub fn check_header(image: &[u8], class: ElfClass) -> Result<(), ElfError> {
    if image.len() < EI_NIDENT {
        return Err(ElfError::TooSmall);
    }
    if image[..4] != ELF_MAGIC {
        log::warn!("Bad ELF magic value");
        return Err(ElfError::BadMagic);
    }
    if ElfClass::from_ident(image[EI_CLASS]) != Some(class) {
        log::warn!("Only {:?} files are supported", class);
        return Err(ElfError::WrongClass);
    }
    if image[EI_DATA] != ELFDATA2LSB {
        log::warn!("Only little-endian ELF files are supported");
        return Err(ElfError::UnsupportedEncoding);
    }
    if image.len() < class.header_size() {
        return Err(ElfError::TooSmall);
    }
    Ok(())
}

/// Fields of one program header, widened to 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub offset: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
}

impl From<Elf32Phdr> for ProgramHeader {
    fn from(ph: Elf32Phdr) -> Self {
        Self {
            p_type: ph.p_type.get(),
            offset: ph.p_offset.get().into(),
            paddr: ph.p_paddr.get().into(),
            filesz: ph.p_filesz.get().into(),
            memsz: ph.p_memsz.get().into(),
        }
    }
}

impl From<Elf64Phdr> for ProgramHeader {
    fn from(ph: Elf64Phdr) -> Self {
        Self {
            p_type: ph.p_type.get(),
            offset: ph.p_offset.get(),
            paddr: ph.p_paddr.get(),
            filesz: ph.p_filesz.get(),
            memsz: ph.p_memsz.get(),
        }
    }
}

/// Program header table geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhdrTable {
    pub class: ElfClass,
    pub offset: usize,
    pub entry_size: usize,
    pub count: usize,
}

impl PhdrTable {
    /// Read the table geometry of `image`.
    ///
    /// The table must lie inside the image and its entries must be at least
    /// as large as the class's program header.
    pub fn read(image: &[u8], class: ElfClass) -> Result<Self, ElfError> {
        check_header(image, class)?;

        let (offset, entry_size, count) = match class {
            ElfClass::Elf32 => {
                let (ehdr, _) = Elf32Ehdr::read_from_prefix(image).map_err(|_| ElfError::TooSmall)?;
                (u64::from(ehdr.e_phoff.get()), ehdr.e_phentsize.get(), ehdr.e_phnum.get())
            }
            ElfClass::Elf64 => {
                let (ehdr, _) = Elf64Ehdr::read_from_prefix(image).map_err(|_| ElfError::TooSmall)?;
                (ehdr.e_phoff.get(), ehdr.e_phentsize.get(), ehdr.e_phnum.get())
            }
        };
        let offset = usize::try_from(offset).map_err(|_| ElfError::MalformedProgramHeader)?;
        let entry_size = usize::from(entry_size);
        let count = usize::from(count);

        if count > 0 && entry_size < class.phdr_size() {
            log::warn!("Program header entries of {} bytes are too small", entry_size);
            return Err(ElfError::MalformedProgramHeader);
        }
        let end = entry_size
            .checked_mul(count)
            .and_then(|len| len.checked_add(offset))
            .ok_or(ElfError::MalformedProgramHeader)?;
        if end > image.len() {
            log::warn!("Program header table ends at {:#x}, image is {:#x} bytes", end, image.len());
            return Err(ElfError::MalformedProgramHeader);
        }

        Ok(Self {
            class,
            offset,
            entry_size,
            count,
        })
    }

    /// Program header `index`, read at `offset + index * entry_size`.
    pub fn get(&self, image: &[u8], index: usize) -> Result<ProgramHeader, ElfError> {
        if index >= self.count {
            return Err(ElfError::MalformedProgramHeader);
        }
        let bytes = index
            .checked_mul(self.entry_size)
            .and_then(|at| at.checked_add(self.offset))
            .and_then(|at| image.get(at..))
            .ok_or(ElfError::MalformedProgramHeader)?;
        let ph: Result<ProgramHeader, ()> = match self.class {
            ElfClass::Elf32 => Elf32Phdr::read_from_prefix(bytes).map(|(ph, _)| ph.into()).map_err(|_| ()),
            ElfClass::Elf64 => Elf64Phdr::read_from_prefix(bytes).map(|(ph, _)| ph.into()).map_err(|_| ()),
        };
        ph.map_err(|_| ElfError::MalformedProgramHeader)
    }

    /// Every program header in table order.
    pub fn iter(self, image: &[u8]) -> impl Iterator<Item = Result<ProgramHeader, ElfError>> + '_ {
        (0..self.count).map(move |i| self.get(image, i))
    }
}
