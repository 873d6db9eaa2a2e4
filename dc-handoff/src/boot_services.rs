//! UEFI Boot Services Producer
//!
//! A stage hosted by UEFI gets its database pages from boot services and
//! republishes the two handles the next stage needs to keep using them.
//! Failing to get the pages happens before anything can report an error, so
//! it halts.

use core::ptr::NonNull;

use dc_common::memory::{MAX_RAM_RANGES, MemoryRange, RangeType, page};
use dc_common::PlatformMemory;
use dc_fwdb::{Access, Fwdb};
use heapless::Vec;
use uefi::boot::{self, AllocateType, MemoryType};
use uefi::mem::memory_map::MemoryDescriptor;

use crate::config::{self, names};
use crate::error::HandoffError;
use crate::ram_map;

/// The boot services the producer relies on.
pub trait BootServices {
    /// Allocate `count` zeroed-or-not pages of loader data.
    fn allocate_pages(&self, count: usize) -> Result<NonNull<u8>, HandoffError>;

    /// Address of the firmware system table.
    fn system_table(&self) -> usize;

    /// Handle of the running image.
    fn image_handle(&self) -> usize;
}

/// [`BootServices`] backed by the running firmware.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirmwareServices;

impl BootServices for FirmwareServices {
    fn allocate_pages(&self, count: usize) -> Result<NonNull<u8>, HandoffError> {
        boot::allocate_pages(AllocateType::AnyPages, MemoryType::LOADER_DATA, count)
            .map_err(|_| HandoffError::AllocationFailed)
    }

    fn system_table(&self) -> usize {
        uefi::table::system_table_raw().map_or(0, |table| table.as_ptr() as usize)
    }

    fn image_handle(&self) -> usize {
        boot::image_handle().as_ptr() as usize
    }
}

/// Allocate the database pages and create an empty database in them.
///
/// Halts if boot services cannot provide the pages.
pub fn allocate_database<B: BootServices>(services: &B) -> Fwdb<'static> {
    let Ok(base) = services.allocate_pages(config::FWDB_PAGES) else {
        dc_arch::halt();
    };
    // SAFETY: The pages were just allocated for us and hold FWDB_SIZE bytes
    match unsafe { Fwdb::create_at(base, config::FWDB_SIZE) } {
        Ok(db) => db,
        Err(_) => dc_arch::halt(),
    }
}

/// Publish the system table and image handle as pointer-width entries.
pub fn publish_handles<B: BootServices>(db: &mut Fwdb<'_>, services: &B) -> Result<(), HandoffError> {
    let system_table = services.system_table().to_ne_bytes();
    let image_handle = services.image_handle().to_ne_bytes();
    db.access(names::UEFI_SYSTEM_TABLE, Access::create_from(&system_table))?;
    db.access(names::UEFI_IMAGE_HANDLE, Access::create_from(&image_handle))?;
    log::info!(
        "Published system table {:#x} and image handle {:#x}",
        services.system_table(),
        services.image_handle()
    );
    Ok(())
}

/// RAM map classification of a UEFI memory type, and whether the range is in
/// use by firmware or loaded images while boot services run.
#[must_use]
pub fn classify(ty: MemoryType) -> (RangeType, bool) {
    match ty {
        MemoryType::LOADER_CODE
        | MemoryType::LOADER_DATA
        | MemoryType::BOOT_SERVICES_CODE
        | MemoryType::BOOT_SERVICES_DATA => (RangeType::Ram, true),
        MemoryType::CONVENTIONAL => (RangeType::Ram, false),
        MemoryType::ACPI_RECLAIM => (RangeType::Acpi, false),
        MemoryType::PERSISTENT_MEMORY => (RangeType::Nvs, false),
        MemoryType::UNUSABLE => (RangeType::Unusable, false),
        _ => (RangeType::Reserved, false),
    }
}

/// Translate the firmware memory map into the RAM map, mark every range
/// firmware still uses and publish the map to `db`.
///
/// Adjacent descriptors of the same type are merged. Descriptors whose end
/// lies past the top of the address space are skipped. Returns the number of
/// RAM map ranges recorded.
pub fn record_memory_map<'d, M: PlatformMemory>(
    descriptors: impl IntoIterator<Item = &'d MemoryDescriptor>,
    db: &mut Fwdb<'_>,
    memory: &mut M,
) -> Result<usize, HandoffError> {
    let mut ranges: Vec<MemoryRange, MAX_RAM_RANGES> = Vec::new();

    for desc in descriptors {
        let (range_type, used) = classify(desc.ty);
        let base = desc.phys_start;
        let Some((size, end)) = desc
            .page_count
            .checked_mul(page::SIZE_4K as u64)
            .and_then(|size| Some((size, base.checked_add(size)?)))
        else {
            log::warn!("Skipping memory descriptor at {:#x}: {} pages", base, desc.page_count);
            continue;
        };
        if size == 0 {
            continue;
        }

        if used && let Err(e) = memory.mark_used(base, end) {
            log::warn!("Could not mark {:#x} - {:#x} used: {}", base, end, e);
        }

        if let Some(prev) = ranges.last_mut()
            && prev.range_type == range_type
            && prev.handoff_tag == desc.ty.0
            && prev.end() == base
        {
            prev.size += size;
            continue;
        }

        let range = MemoryRange {
            base,
            size,
            range_type,
            handoff_tag: desc.ty.0,
        };
        if ranges.push(range).is_err() {
            log::warn!("Memory map truncated at {} ranges", MAX_RAM_RANGES);
            break;
        }
    }

    memory.set_ram_map(&ranges)?;
    ram_map::publish(db, &ranges)?;
    Ok(ranges.len())
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::consumers::UefiHandles;
    use dc_common::MemoryLedger;
    use dc_common::memory::Span;
    use std::boxed::Box;
    use std::vec;

    struct FakeServices;

    impl BootServices for FakeServices {
        fn allocate_pages(&self, count: usize) -> Result<NonNull<u8>, HandoffError> {
            let pages: &'static mut [u8] = Box::leak(vec![0u8; count * page::SIZE_4K].into_boxed_slice());
            NonNull::new(pages.as_mut_ptr()).ok_or(HandoffError::AllocationFailed)
        }

        fn system_table(&self) -> usize {
            0x7F00_1000
        }

        fn image_handle(&self) -> usize {
            0x7E00_2000
        }
    }

    #[test]
    fn test_produce_publishes_handles() {
        let mut db = allocate_database(&FakeServices);
        assert_eq!(db.capacity(), config::FWDB_SIZE);

        publish_handles(&mut db, &FakeServices).unwrap();

        let handles = UefiHandles::read(&db).unwrap();
        assert_eq!(handles.system_table, 0x7F00_1000);
        assert_eq!(handles.image_handle, 0x7E00_2000);
        assert_eq!(
            db.read(names::UEFI_SYSTEM_TABLE, None).unwrap().len(),
            core::mem::size_of::<usize>()
        );
    }

    #[test]
    fn test_publishing_twice_fails() {
        let mut db = allocate_database(&FakeServices);
        publish_handles(&mut db, &FakeServices).unwrap();
        assert_eq!(
            publish_handles(&mut db, &FakeServices),
            Err(HandoffError::Fwdb(dc_fwdb::FwdbError::NameAlreadyExists))
        );
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(MemoryType::LOADER_DATA), (RangeType::Ram, true));
        assert_eq!(classify(MemoryType::BOOT_SERVICES_CODE), (RangeType::Ram, true));
        assert_eq!(classify(MemoryType::CONVENTIONAL), (RangeType::Ram, false));
        assert_eq!(classify(MemoryType::ACPI_RECLAIM), (RangeType::Acpi, false));
        assert_eq!(classify(MemoryType::ACPI_NON_VOLATILE), (RangeType::Reserved, false));
        assert_eq!(classify(MemoryType::RUNTIME_SERVICES_DATA), (RangeType::Reserved, false));
        assert_eq!(classify(MemoryType::PERSISTENT_MEMORY), (RangeType::Nvs, false));
        assert_eq!(classify(MemoryType::UNUSABLE), (RangeType::Unusable, false));
        assert_eq!(classify(MemoryType::MMIO), (RangeType::Reserved, false));
    }

    fn descriptor(ty: MemoryType, phys_start: u64, page_count: u64) -> MemoryDescriptor {
        MemoryDescriptor {
            ty,
            phys_start,
            page_count,
            ..MemoryDescriptor::default()
        }
    }

    #[test]
    fn test_record_memory_map() {
        let map = [
            descriptor(MemoryType::CONVENTIONAL, 0, 0x9F),
            descriptor(MemoryType::CONVENTIONAL, 0x9F000, 1),
            descriptor(MemoryType::LOADER_CODE, 0x10_0000, 0x10),
            descriptor(MemoryType::LOADER_DATA, 0x11_0000, 0x10),
            descriptor(MemoryType::RESERVED, 0x12_0000, 0),
            descriptor(MemoryType::ACPI_RECLAIM, 0x20_0000, 2),
        ];
        let mut ledger = MemoryLedger::new();
        let mut db = allocate_database(&FakeServices);

        let count = record_memory_map(&map, &mut db, &mut ledger).unwrap();

        assert_eq!(count, 4);
        let ram = ledger.ram_map();
        assert_eq!(ram[0].base, 0);
        assert_eq!(ram[0].size, 0xA0_000);
        assert_eq!(ram[1].handoff_tag, MemoryType::LOADER_CODE.0);
        assert_eq!(ram[3].range_type, RangeType::Acpi);
        assert_eq!(
            ledger.used(),
            &[Span {
                start: 0x10_0000,
                end: 0x12_0000
            }]
        );
        assert_eq!(ram_map::read(&db).unwrap().as_slice(), ram);
    }

    #[test]
    fn test_wrapping_descriptor_is_skipped() {
        let map = [
            descriptor(MemoryType::LOADER_DATA, u64::MAX - 0xFFF, 2),
            descriptor(MemoryType::CONVENTIONAL, 0x1000, u64::MAX),
            descriptor(MemoryType::CONVENTIONAL, 0x10_0000, 0x10),
        ];
        let mut ledger = MemoryLedger::new();
        let mut db = allocate_database(&FakeServices);

        let count = record_memory_map(&map, &mut db, &mut ledger).unwrap();

        assert_eq!(count, 1);
        assert_eq!(ledger.ram_map()[0].base, 0x10_0000);
        assert!(ledger.used().is_empty());
    }
}
