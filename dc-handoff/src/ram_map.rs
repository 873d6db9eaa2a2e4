//! RAM Map Entry
//!
//! Producers publish the RAM map they gathered as one fixed-size entry, so the
//! next stage can reserve memory without asking firmware or rescanning the
//! tables. The layout is a count followed by a fixed array of E820-style
//! ranges, all in native byte order.

use dc_common::memory::{MAX_RAM_RANGES, MemoryRange, RangeType};
use dc_fwdb::{Fwdb, FwdbError};
use heapless::Vec;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::config::names;

#[repr(C)]
#[derive(Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct RawRange {
    base: u64,
    size: u64,
    kind: u32,
    handoff_tag: u32,
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct RawRanges {
    num_ranges: u64,
    ranges: [RawRange; MAX_RAM_RANGES],
}

/// Size of the published entry
pub const ENTRY_SIZE: usize = size_of::<RawRanges>();

const _: () = assert!(size_of::<RawRange>() == 24);
const _: () = assert!(ENTRY_SIZE == 8 + 24 * MAX_RAM_RANGES);

/// Write `ranges` to the RAM map entry, creating it if needed.
///
/// Ranges past [`MAX_RAM_RANGES`] are dropped.
pub fn publish(db: &mut Fwdb<'_>, ranges: &[MemoryRange]) -> Result<(), FwdbError> {
    let mut raw = RawRanges::new_zeroed();
    let count = ranges.len().min(MAX_RAM_RANGES);
    raw.num_ranges = count as u64;
    for (slot, range) in raw.ranges.iter_mut().zip(&ranges[..count]) {
        *slot = RawRange {
            base: range.base,
            size: range.size,
            kind: range.range_type as u32,
            handoff_tag: range.handoff_tag,
        };
    }

    let entry = db.read_or_create(names::RAM_MAP, ENTRY_SIZE, None)?;
    entry.write_at(0, raw.as_bytes())?;
    log::debug!("Published {} RAM map ranges", count);
    Ok(())
}

/// Read the RAM map entry.
///
/// The entry must be exactly [`ENTRY_SIZE`] bytes. Type numbers outside the
/// E820 set are read as reserved.
pub fn read(db: &Fwdb<'_>) -> Result<Vec<MemoryRange, MAX_RAM_RANGES>, FwdbError> {
    let entry = db.read(names::RAM_MAP, Some(ENTRY_SIZE))?;
    let mut raw = RawRanges::new_zeroed();
    entry.copy_to(raw.as_mut_bytes())?;

    let count = usize::try_from(raw.num_ranges).map_err(|_| FwdbError::Corrupted)?;
    let Some(stored) = raw.ranges.get(..count) else {
        log::warn!("RAM map claims {} ranges", raw.num_ranges);
        return Err(FwdbError::Corrupted);
    };

    let mut ranges = Vec::new();
    for range in stored {
        let range_type = RangeType::from_e820(range.kind).unwrap_or_else(|| {
            log::warn!("RAM map range {:#x} has type {}", range.base, range.kind);
            RangeType::Reserved
        });
        // The count was bounded by the array above
        let _ = ranges.push(MemoryRange {
            base: range.base,
            size: range.size,
            range_type,
            handoff_tag: range.handoff_tag,
        });
    }
    Ok(ranges)
}
