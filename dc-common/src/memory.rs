//! Memory Ledger
//!
//! Tracks the physical memory facts a boot stage accumulates while it runs:
//!
//! - ranges the stage (or its predecessor) has claimed and that later general
//!   purpose allocation must leave alone, such as the firmware database
//! - DMA-capable windows announced by the previous stage
//! - the RAM map reported by the previous stage, using E820-style types
//!
//! Adapters only see the [`PlatformMemory`] trait so they can be exercised
//! against any backing store.

use core::fmt;

use heapless::Vec;

/// Maximum number of disjoint used ranges tracked.
pub const MAX_USED_RANGES: usize = 32;
/// Maximum number of DMA windows tracked.
pub const MAX_DMA_RANGES: usize = 8;
/// Maximum number of RAM map entries tracked.
pub const MAX_RAM_RANGES: usize = 64;

/// Memory range classification (E820 numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RangeType {
    /// Usable RAM
    Ram = 1,
    /// Reserved by firmware or hardware
    Reserved = 2,
    /// ACPI tables, reclaimable after parsing
    Acpi = 3,
    /// ACPI non-volatile storage
    Nvs = 4,
    /// Unusable (e.g. bad RAM)
    Unusable = 5,
}

impl RangeType {
    /// Decode an E820 type number.
    #[must_use]
    pub const fn from_e820(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Ram),
            2 => Some(Self::Reserved),
            3 => Some(Self::Acpi),
            4 => Some(Self::Nvs),
            5 => Some(Self::Unusable),
            _ => None,
        }
    }

    /// Classify a coreboot memory range type.
    ///
    /// Types 1-5 share the E820 numbering. The coreboot table area (16) must be
    /// kept, so it is reported as reserved. Anything else is unusable.
    #[must_use]
    pub const fn from_coreboot(value: u32) -> Self {
        match value {
            16 => Self::Reserved,
            _ => match Self::from_e820(value) {
                Some(kind) => kind,
                None => Self::Unusable,
            },
        }
    }
}

/// A half-open physical range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

impl Span {
    /// Overlapping or directly adjacent.
    const fn touches(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// A single RAM map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    /// Physical start address
    pub base: u64,
    /// Size in bytes
    pub size: u64,
    /// Classification
    pub range_type: RangeType,
    /// Type value as reported by the previous stage
    pub handoff_tag: u32,
}

impl MemoryRange {
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }
}

/// Errors raised while recording memory facts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerError {
    /// The fixed-capacity table has no room left
    Full,
    /// The range is empty or inverted
    InvalidRange,
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "memory ledger full"),
            Self::InvalidRange => write!(f, "empty or inverted memory range"),
        }
    }
}

/// Sink for the memory facts gathered by platform adapters.
pub trait PlatformMemory {
    /// Exclude `[start, end)` from later general purpose allocation.
    fn mark_used(&mut self, start: u64, end: u64) -> Result<(), LedgerError>;

    /// Register a DMA-capable window.
    fn add_dma_range(&mut self, base: u64, size: u64) -> Result<(), LedgerError>;

    /// Replace the RAM map with the ranges reported by the previous stage.
    fn set_ram_map(&mut self, ranges: &[MemoryRange]) -> Result<(), LedgerError>;
}

/// Fixed-capacity [`PlatformMemory`] implementation.
#[derive(Debug)]
pub struct MemoryLedger {
    used: Vec<Span, MAX_USED_RANGES>,
    dma: Vec<Span, MAX_DMA_RANGES>,
    ram: Vec<MemoryRange, MAX_RAM_RANGES>,
}

impl MemoryLedger {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            used: Vec::new(),
            dma: Vec::new(),
            ram: Vec::new(),
        }
    }

    /// Used ranges, sorted and coalesced.
    #[must_use]
    pub fn used(&self) -> &[Span] {
        &self.used
    }

    #[must_use]
    pub fn dma_ranges(&self) -> &[Span] {
        &self.dma
    }

    #[must_use]
    pub fn ram_map(&self) -> &[MemoryRange] {
        &self.ram
    }

    /// Check whether any byte of `[start, end)` has been marked used.
    #[must_use]
    pub fn overlaps_used(&self, start: u64, end: u64) -> bool {
        self.used.iter().any(|s| s.start < end && start < s.end)
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformMemory for MemoryLedger {
    fn mark_used(&mut self, start: u64, end: u64) -> Result<(), LedgerError> {
        if end <= start {
            return Err(LedgerError::InvalidRange);
        }

        // Absorb every range the new one overlaps or touches
        let mut merged = Span { start, end };
        let mut i = 0;
        while i < self.used.len() {
            if self.used[i].touches(&merged) {
                let old = self.used.remove(i);
                merged.start = merged.start.min(old.start);
                merged.end = merged.end.max(old.end);
            } else {
                i += 1;
            }
        }

        let pos = self
            .used
            .iter()
            .position(|s| s.start > merged.start)
            .unwrap_or(self.used.len());
        self.used.insert(pos, merged).map_err(|_| LedgerError::Full)?;

        log::debug!("Marked used: {:#x} - {:#x}", merged.start, merged.end);
        Ok(())
    }

    fn add_dma_range(&mut self, base: u64, size: u64) -> Result<(), LedgerError> {
        let end = base.checked_add(size).ok_or(LedgerError::InvalidRange)?;
        if size == 0 {
            return Err(LedgerError::InvalidRange);
        }
        self.dma
            .push(Span { start: base, end })
            .map_err(|_| LedgerError::Full)?;
        log::debug!("DMA window: {:#x} - {:#x}", base, end);
        Ok(())
    }

    fn set_ram_map(&mut self, ranges: &[MemoryRange]) -> Result<(), LedgerError> {
        self.ram.clear();
        let mut result = Ok(());
        for range in ranges {
            if self.ram.push(*range).is_err() {
                log::warn!("RAM map truncated: too many ranges");
                result = Err(LedgerError::Full);
                break;
            }
        }
        result
    }
}

/// Page size constants
pub mod page {
    /// 4KB page size
    pub const SIZE_4K: usize = 4096;

    const _: () = assert!(SIZE_4K.is_power_of_two(), "SIZE_4K must be a power of two");

    #[must_use]
    pub const fn pages_for(bytes: usize) -> usize {
        bytes.div_ceil(SIZE_4K)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_used_coalesces_overlapping_and_adjacent() {
        let mut ledger = MemoryLedger::new();
        ledger.mark_used(0x3000, 0x4000).unwrap();
        ledger.mark_used(0x1000, 0x2000).unwrap();
        ledger.mark_used(0x2000, 0x3000).unwrap();
        assert_eq!(ledger.used(), &[Span { start: 0x1000, end: 0x4000 }]);

        ledger.mark_used(0x8000, 0x9000).unwrap();
        ledger.mark_used(0x3800, 0x8800).unwrap();
        assert_eq!(ledger.used(), &[Span { start: 0x1000, end: 0x9000 }]);
    }

    #[test]
    fn test_mark_used_keeps_disjoint_ranges_sorted() {
        let mut ledger = MemoryLedger::new();
        ledger.mark_used(0x9000, 0xA000).unwrap();
        ledger.mark_used(0x1000, 0x2000).unwrap();
        ledger.mark_used(0x5000, 0x6000).unwrap();
        let starts: [u64; 3] = [0x1000, 0x5000, 0x9000];
        for (span, start) in ledger.used().iter().zip(starts) {
            assert_eq!(span.start, start);
        }
        assert!(ledger.overlaps_used(0x5800, 0x5900));
        assert!(!ledger.overlaps_used(0x2000, 0x5000));
    }

    #[test]
    fn test_mark_used_rejects_empty_range() {
        let mut ledger = MemoryLedger::new();
        assert_eq!(ledger.mark_used(0x2000, 0x2000), Err(LedgerError::InvalidRange));
        assert_eq!(ledger.mark_used(0x3000, 0x2000), Err(LedgerError::InvalidRange));
        assert!(ledger.used().is_empty());
    }

    #[test]
    fn test_mark_used_reports_full() {
        let mut ledger = MemoryLedger::new();
        for i in 0..MAX_USED_RANGES as u64 {
            ledger.mark_used(i * 0x2000, i * 0x2000 + 0x1000).unwrap();
        }
        let far = MAX_USED_RANGES as u64 * 0x2000 + 0x1000;
        assert_eq!(ledger.mark_used(far, far + 0x10), Err(LedgerError::Full));
    }

    #[test]
    fn test_dma_ranges() {
        let mut ledger = MemoryLedger::new();
        ledger.add_dma_range(0x4000_0000, 0x10_0000).unwrap();
        assert_eq!(
            ledger.dma_ranges(),
            &[Span { start: 0x4000_0000, end: 0x4010_0000 }]
        );
        assert_eq!(ledger.add_dma_range(0x1000, 0), Err(LedgerError::InvalidRange));
    }

    #[test]
    fn test_coreboot_type_mapping() {
        assert_eq!(RangeType::from_coreboot(1), RangeType::Ram);
        assert_eq!(RangeType::from_coreboot(16), RangeType::Reserved);
        assert_eq!(RangeType::from_coreboot(4), RangeType::Nvs);
        assert_eq!(RangeType::from_coreboot(0x99), RangeType::Unusable);
    }

    #[test]
    fn test_e820_type_numbers() {
        assert_eq!(RangeType::from_e820(RangeType::Acpi as u32), Some(RangeType::Acpi));
        assert_eq!(RangeType::from_e820(5), Some(RangeType::Unusable));
        assert_eq!(RangeType::from_e820(0), None);
        assert_eq!(RangeType::from_e820(16), None);
    }

    #[test]
    fn test_ram_map_replaced() {
        let mut ledger = MemoryLedger::new();
        let ranges = [
            MemoryRange { base: 0, size: 0xA0000, range_type: RangeType::Ram, handoff_tag: 1 },
            MemoryRange { base: 0xA0000, size: 0x60000, range_type: RangeType::Reserved, handoff_tag: 2 },
            MemoryRange { base: 0x10_0000, size: 0x100_0000, range_type: RangeType::Ram, handoff_tag: 1 },
        ];
        ledger.set_ram_map(&ranges).unwrap();
        assert_eq!(ledger.ram_map().len(), 3);
        assert_eq!(ledger.ram_map()[2].end(), 0x110_0000);

        ledger.set_ram_map(&ranges[..1]).unwrap();
        assert_eq!(ledger.ram_map(), &ranges[..1]);
    }
}
