//! Error types for the firmware database

use core::fmt;

/// Errors that can occur while creating or accessing a firmware database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwdbError {
    /// Region too small for the header and the list terminator
    InsufficientSpace,
    /// Appending the entry would run past the database capacity
    DatabaseFull,
    /// Create intent for a name that is already present
    NameAlreadyExists,
    /// Read intent for a name that is not present
    EntryNotFound,
    /// Stored (or supplied) length differs from the expected length
    SizeMismatch { expected: usize, actual: usize },
    /// Name is empty, too long or contains a NUL byte
    InvalidName,
    /// Access within an entry runs past its end
    OutOfBounds,
    /// No database has been created or adopted in this stage
    NoActiveDatabase,
    /// A database is already active in this stage
    AlreadyActive,
    /// Structural check failed
    Corrupted,
}

impl fmt::Display for FwdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientSpace => write!(f, "region too small for a firmware database"),
            Self::DatabaseFull => write!(f, "not enough room left in the firmware database"),
            Self::NameAlreadyExists => write!(f, "entry already exists"),
            Self::EntryNotFound => write!(f, "entry not found"),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "entry size mismatch: expected {} bytes, found {}", expected, actual)
            }
            Self::InvalidName => write!(f, "invalid entry name"),
            Self::OutOfBounds => write!(f, "access beyond the bounds of the entry"),
            Self::NoActiveDatabase => write!(f, "no firmware database has been set up"),
            Self::AlreadyActive => write!(f, "a firmware database is already active"),
            Self::Corrupted => write!(f, "firmware database is damaged"),
        }
    }
}
