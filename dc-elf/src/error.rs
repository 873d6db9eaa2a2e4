//! Error types for ELF loading

use core::fmt;

/// Errors that can occur while checking or loading an ELF image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// Image shorter than its ELF header
    TooSmall,
    /// Missing `\x7fELF` magic
    BadMagic,
    /// Address-width class differs from the one expected
    WrongClass,
    /// Fields are not little-endian
    UnsupportedEncoding,
    /// Header could not be parsed
    Parse,
    /// Program header table or a loadable segment is inconsistent
    MalformedProgramHeader,
    /// Loadable segment's file data lies outside the image
    SegmentOutOfBounds,
    /// More loadable segments than can be handled
    TooManySegments,
    /// Image has no loadable segment
    NoLoadableSegment,
    /// Entry point is not inside the loaded segment
    EntryOutsideSegment,
    /// Destination buffer shorter than the segment's memory size
    DestinationTooSmall,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall => write!(f, "image too small for an ELF header"),
            Self::BadMagic => write!(f, "bad ELF magic value"),
            Self::WrongClass => write!(f, "unsupported ELF class"),
            Self::UnsupportedEncoding => write!(f, "unsupported ELF data encoding"),
            Self::Parse => write!(f, "failed to parse ELF header"),
            Self::MalformedProgramHeader => write!(f, "malformed program header"),
            Self::SegmentOutOfBounds => write!(f, "segment data outside of image"),
            Self::TooManySegments => write!(f, "too many loadable segments"),
            Self::NoLoadableSegment => write!(f, "no loadable segment"),
            Self::EntryOutsideSegment => write!(f, "entry point outside of segment"),
            Self::DestinationTooSmall => write!(f, "destination too small for segment"),
        }
    }
}
