//! Module Consumer
//!
//! A stage started by a previous stage receives the address of that stage's
//! database as its handoff parameter. It adopts the database as is and keeps
//! the region away from later allocators.

use core::ptr::NonNull;

use dc_common::{HandoffParameter, LedgerError, PhysAddr, PlatformMemory};
use dc_fwdb::{Fwdb, FwdbError};

use crate::error::HandoffError;
use crate::ram_map;

/// Adopt the database named by `param`, mark its region used and load the
/// RAM map the producer published.
///
/// The database is not validated before adoption. A failed
/// [`Fwdb::verify`] is only reported, as is a RAM map entry that cannot be
/// read. A database without one leaves the ledger's map alone.
///
/// # Safety
/// `param` must hold the address of a database created by the previous stage,
/// and its whole region must remain reserved for the rest of the boot.
pub unsafe fn adopt_database<M: PlatformMemory>(
    param: HandoffParameter,
    memory: &mut M,
) -> Result<Fwdb<'static>, HandoffError> {
    let addr = param.as_phys();
    let Some(base) = NonNull::new(param.raw() as *mut u8) else {
        log::error!("Handoff parameter does not name a database");
        return Err(HandoffError::MissingDatabase);
    };

    // SAFETY: Caller guarantees param points at a database header
    let db = unsafe { Fwdb::adopt(base) };
    if let Err(e) = db.verify() {
        log::warn!("Adopted fwdb at {:#x} does not verify: {}", addr, e);
    }

    reserve(&db, memory)?;
    match ram_map::read(&db) {
        Ok(ranges) => memory.set_ram_map(&ranges)?,
        Err(FwdbError::EntryNotFound) => log::debug!("No RAM map in the adopted fwdb"),
        Err(e) => log::warn!("Could not read the RAM map: {}", e),
    }
    Ok(db)
}

/// Mark `[base, base + capacity)` of `db` used. Empty databases reserve nothing.
pub fn reserve<M: PlatformMemory>(db: &Fwdb<'_>, memory: &mut M) -> Result<(), HandoffError> {
    reserve_region(PhysAddr::from_ptr(db.base_pointer().as_ptr()), db.capacity(), memory)
}

fn reserve_region<M: PlatformMemory>(start: PhysAddr, capacity: u32, memory: &mut M) -> Result<(), HandoffError> {
    let Some(end) = start.checked_add(u64::from(capacity)) else {
        log::error!("Database at {:#x} runs past the top of memory", start);
        return Err(LedgerError::InvalidRange.into());
    };
    if start != end {
        memory.mark_used(start.as_u64(), end.as_u64())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use dc_common::MemoryLedger;
    use dc_common::memory::{MemoryRange, RangeType, Span};
    use dc_fwdb::Access;
    use std::boxed::Box;
    use std::vec;

    #[test]
    fn test_adopt_sees_producer_entries() {
        let region: &'static mut [u8] = Box::leak(vec![0u8; 1024].into_boxed_slice());

        let mut producer = Fwdb::create(region).unwrap();
        producer.access("gpio.lid", Access::create_from(&[1])).unwrap();
        producer
            .access("board.name", Access::create_from(b"samus"))
            .unwrap();
        let param = HandoffParameter::database(producer.base_pointer().as_ptr());
        drop(producer);

        let mut ledger = MemoryLedger::new();
        // SAFETY: param points at the database created above, which is leaked
        let consumer = unsafe { adopt_database(param, &mut ledger).unwrap() };

        assert_eq!(consumer.read("gpio.lid", Some(1)).unwrap().read_u8(), Ok(1));
        let mut name = [0u8; 5];
        consumer.read("board.name", Some(5)).unwrap().copy_to(&mut name).unwrap();
        assert_eq!(&name, b"samus");
        assert_eq!(consumer.read("gpio.power", None).err(), Some(FwdbError::EntryNotFound));

        let start = param.raw() as u64;
        assert_eq!(ledger.used(), &[Span { start, end: start + 1024 }]);
    }

    #[test]
    fn test_adopt_loads_published_ram_map() {
        let region: &'static mut [u8] = Box::leak(vec![0u8; 4096].into_boxed_slice());
        let ranges = [
            MemoryRange { base: 0, size: 0x9F000, range_type: RangeType::Ram, handoff_tag: 1 },
            MemoryRange { base: 0x10_0000, size: 0x10_0000, range_type: RangeType::Acpi, handoff_tag: 3 },
        ];

        let mut producer = Fwdb::create(region).unwrap();
        ram_map::publish(&mut producer, &ranges).unwrap();
        let param = HandoffParameter::database(producer.base_pointer().as_ptr());
        drop(producer);

        let mut ledger = MemoryLedger::new();
        // SAFETY: param points at the database created above, which is leaked
        unsafe { adopt_database(param, &mut ledger).unwrap() };

        assert_eq!(ledger.ram_map(), &ranges);
    }

    #[test]
    fn test_reserve_rejects_region_past_top_of_memory() {
        let mut ledger = MemoryLedger::new();
        assert_eq!(
            reserve_region(PhysAddr::new(u64::MAX - 4), 1024, &mut ledger),
            Err(HandoffError::Ledger(LedgerError::InvalidRange))
        );
        assert!(ledger.used().is_empty());

        reserve_region(PhysAddr::new(u64::MAX - 1024), 1024, &mut ledger).unwrap();
        assert_eq!(ledger.used(), &[Span { start: u64::MAX - 1024, end: u64::MAX }]);
    }

    #[test]
    fn test_missing_parameter() {
        let mut ledger = MemoryLedger::new();
        // SAFETY: a null parameter is rejected before any access
        let result = unsafe { adopt_database(HandoffParameter::UNUSED, &mut ledger) };
        assert_eq!(result.err(), Some(HandoffError::MissingDatabase));
        assert!(ledger.used().is_empty());
    }
}
