//! Legacy Producer
//!
//! The x86 payload started directly by coreboot has no allocator to ask, so it
//! builds its database at a fixed address and then reads the coreboot tables.

use core::ptr::NonNull;

use dc_common::PlatformMemory;
use dc_fwdb::Fwdb;

use crate::config;
use crate::error::HandoffError;

/// Fixed placement of the legacy database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyRegion {
    /// Database base address
    pub base: u64,
    /// Database capacity
    pub size: u32,
    /// End of the block marked used, starting at `base`
    pub used_end: u64,
}

impl LegacyRegion {
    pub const DEFAULT: Self = Self {
        base: config::LEGACY_FWDB_BASE,
        size: config::LEGACY_FWDB_SIZE,
        used_end: config::LEGACY_USED_END,
    };
}

impl Default for LegacyRegion {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Create the database described by `region` and mark the block used.
///
/// # Safety
/// `[region.base, region.base + region.size)` must be identity mapped,
/// writable and owned by this stage.
pub unsafe fn create_database<M: PlatformMemory>(
    region: LegacyRegion,
    memory: &mut M,
) -> Result<Fwdb<'static>, HandoffError> {
    let base = NonNull::new(region.base as usize as *mut u8).ok_or(HandoffError::MissingDatabase)?;
    // SAFETY: Caller guarantees the region is ours to write
    let db = unsafe { Fwdb::create_at(base, region.size)? };
    memory.mark_used(region.base, region.used_end)?;
    Ok(db)
}
