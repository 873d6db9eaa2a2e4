//! Handoff Errors

use core::fmt;

use dc_common::LedgerError;
use dc_elf::ElfError;
use dc_fwdb::FwdbError;

use crate::lzma::LzmaError;

/// Errors raised while establishing the database or launching the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffError {
    /// Boot services refused the page allocation
    AllocationFailed,
    /// The handoff parameter does not point at a database
    MissingDatabase,
    /// Database operation failed
    Fwdb(FwdbError),
    /// Payload image was rejected
    Elf(ElfError),
    /// Compressed payload could not be expanded
    Decompress(LzmaError),
    /// Memory ledger could not record a range
    Ledger(LedgerError),
}

impl fmt::Display for HandoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationFailed => write!(f, "page allocation failed"),
            Self::MissingDatabase => write!(f, "no database at handoff parameter"),
            Self::Fwdb(e) => write!(f, "fwdb: {}", e),
            Self::Elf(e) => write!(f, "payload: {}", e),
            Self::Decompress(e) => write!(f, "payload: {}", e),
            Self::Ledger(e) => write!(f, "memory ledger: {}", e),
        }
    }
}

impl From<FwdbError> for HandoffError {
    fn from(e: FwdbError) -> Self {
        Self::Fwdb(e)
    }
}

impl From<ElfError> for HandoffError {
    fn from(e: ElfError) -> Self {
        Self::Elf(e)
    }
}

impl From<LedgerError> for HandoffError {
    fn from(e: LedgerError) -> Self {
        Self::Ledger(e)
    }
}

impl From<LzmaError> for HandoffError {
    fn from(e: LzmaError) -> Self {
        Self::Decompress(e)
    }
}
