//! UEFI Stage Entry Point
//!
//! Creates the firmware database for the next stage, publishes the firmware
//! handles, the memory map and the firmware images, then starts the payload
//! from the EFI system partition with the database address as its parameter.
//! Compressed payloads are expanded first.

#![no_std]
#![no_main]
#![deny(unsafe_op_in_unsafe_fn)]

use dc_common::MemoryLedger;
use dc_common::memory::page;
use dc_elf::ElfClass;
use dc_handoff::boot_services::{self, BootServices, FirmwareServices};
use dc_handoff::config::PAYLOAD_PATH;
use dc_handoff::efi_file::read_file;
use dc_handoff::hooks::{DebugHooks, hooks};
use dc_handoff::logging::{self, FirmwareConsole};
use dc_handoff::{Stage, lzma, storage};
use log::LevelFilter;
use uefi::boot::{self, MemoryType};
use uefi::mem::memory_map::MemoryMap;
use uefi::prelude::*;
use uefi::system;

#[entry]
fn efi_main() -> Status {
    logging::init(&FirmwareConsole, LevelFilter::Info);

    log::info!("Handoff stage starting");
    log::info!("UEFI Firmware Vendor: {}", system::firmware_vendor());
    log::info!("UEFI Firmware Revision: {:#x}", system::firmware_revision());

    let services = FirmwareServices;

    let stage = match Stage::new(MemoryLedger::new()).create_with_boot_services(&services) {
        Ok(stage) => stage,
        Err(e) => {
            log::error!("Failed to establish fwdb: {}", e);
            return Status::ABORTED;
        }
    };

    let published = stage.publish(|db, memory| {
        boot_services::publish_handles(db, &services)?;
        match boot::memory_map(MemoryType::LOADER_DATA) {
            Ok(map) => {
                let ranges = boot_services::record_memory_map(map.entries(), db, memory)?;
                log::info!("Recorded {} memory ranges", ranges);
            }
            Err(e) => log::warn!("Memory map unavailable: {:?}", e.status()),
        }
        let images = storage::publish_images(db, read_file);
        log::info!("Published {} firmware images", images);
        Ok(())
    });
    let stage = match published {
        Ok(stage) => stage,
        Err(e) => {
            log::error!("Failed to publish handoff facts: {}", e);
            return Status::ABORTED;
        }
    };

    let Some(image) = read_file(PAYLOAD_PATH) else {
        log::error!("Payload {} not found", PAYLOAD_PATH);
        hooks().dev_netboot();
        return Status::NOT_FOUND;
    };
    let image = match lzma::unpack_payload(image) {
        Ok(image) => image,
        Err(e) => {
            log::error!("Payload could not be expanded: {}", e);
            hooks().gdb_enter();
            return Status::LOAD_ERROR;
        }
    };

    let segment = match dc_elf::plan(&image, ElfClass::NATIVE).and_then(|plan| plan.single_segment()) {
        Ok(segment) => segment,
        Err(e) => {
            log::error!("Payload rejected: {}", e);
            hooks().gdb_enter();
            return Status::LOAD_ERROR;
        }
    };

    let pages = page::pages_for(segment.mem_size);
    let dest = match services.allocate_pages(pages) {
        Ok(ptr) => ptr,
        Err(e) => {
            log::error!("Failed to allocate {} pages for the payload: {}", pages, e);
            return Status::OUT_OF_RESOURCES;
        }
    };
    // SAFETY: The pages were just allocated for the payload and are not
    // referenced anywhere else
    let dest = unsafe { core::slice::from_raw_parts_mut(dest.as_ptr(), pages * page::SIZE_4K) };

    // SAFETY: Loader data pages are executable under UEFI's identity map and
    // the payload comes from our own boot partition
    match unsafe { stage.handoff_into(&image, dest) } {
        Ok(launched) => match launched {},
        Err(e) => {
            log::error!("Failed to start payload: {}", e);
            Status::LOAD_ERROR
        }
    }
}
