//! Boot Stage Lifecycle
//!
//! ```text
//! NotStarted ──create / adopt──▶ DatabaseEstablished ──publish──▶ FactsPublished ──┐
//!                                                     └─consume──▶ FactsConsumed ───┴─handoff──▶ (gone)
//! ```
//!
//! Each state is a type parameter of [`Stage`], so facts cannot be published
//! before a database exists and nothing can run after the handoff: its
//! success type, [`Launched`], has no values.

use core::marker::PhantomData;

use dc_common::{HandoffParameter, MemoryLedger, PlatformMemory};
use dc_elf::reloc::RelocReport;
use dc_elf::ElfClass;
use dc_fwdb::{Fwdb, active};

use crate::boot_services::{self, BootServices};
use crate::coreboot::{self, PhysWindow, ScanSummary};
use crate::error::HandoffError;
use crate::hooks::{DebugHooks, hooks};
use crate::legacy::{self, LegacyRegion};
use crate::module;

/// Stage entered, no database yet.
pub struct NotStarted;
/// A database is active for this stage.
pub struct DatabaseEstablished;
/// This stage produced facts for the next one.
pub struct FactsPublished;
/// This stage read the facts the previous one left.
pub struct FactsConsumed;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::FactsPublished {}
    impl Sealed for super::FactsConsumed {}
}

/// States from which the next stage may be started.
pub trait Launchable: sealed::Sealed {}
impl Launchable for FactsPublished {}
impl Launchable for FactsConsumed {}

/// Outcome of a successful handoff. It has no values: control never comes
/// back.
#[derive(Debug)]
pub enum Launched {}

/// One boot stage.
pub struct Stage<S, M = MemoryLedger> {
    memory: M,
    param: HandoffParameter,
    _state: PhantomData<S>,
}

impl<S, M> Stage<S, M> {
    fn into_state<T>(self) -> Stage<T, M> {
        Stage {
            memory: self.memory,
            param: self.param,
            _state: PhantomData,
        }
    }

    #[must_use]
    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    /// Word the next stage will receive.
    #[must_use]
    pub fn parameter(&self) -> HandoffParameter {
        self.param
    }
}

impl<M: PlatformMemory> Stage<NotStarted, M> {
    pub const fn new(memory: M) -> Self {
        Self {
            memory,
            param: HandoffParameter::UNUSED,
            _state: PhantomData,
        }
    }

    /// Refuse to continue if self-relocation met a kind it cannot apply.
    ///
    /// Relocation runs before logging works, so this is the first point where
    /// the failure can be reported.
    pub fn check_relocation(self, report: &RelocReport) -> Self {
        if let Some(kind) = report.first_unhandled {
            log::error!("Unhandled relocation type {}", kind);
            dc_arch::halt();
        }
        log::debug!("Applied {} relocations, skipped {}", report.applied, report.skipped);
        self
    }

    /// Make a freshly created database the stage's database.
    ///
    /// Its region is marked used and its address becomes the handoff
    /// parameter.
    pub fn create(mut self, db: Fwdb<'static>) -> Result<Stage<DatabaseEstablished, M>, HandoffError> {
        module::reserve(&db, &mut self.memory)?;
        let param = HandoffParameter::database(db.base_pointer().as_ptr());
        active::install(db)?;

        let mut next = self.into_state();
        next.param = param;
        Ok(next)
    }

    /// Create the database at the legacy fixed address.
    ///
    /// # Safety
    /// See [`legacy::create_database`].
    pub unsafe fn create_legacy(
        mut self,
        region: LegacyRegion,
    ) -> Result<Stage<DatabaseEstablished, M>, HandoffError> {
        // SAFETY: Forwarded from the caller
        let db = unsafe { legacy::create_database(region, &mut self.memory)? };
        self.create(db)
    }

    /// Create the database in pages from boot services. Halts if none are
    /// available.
    pub fn create_with_boot_services<B: BootServices>(
        self,
        services: &B,
    ) -> Result<Stage<DatabaseEstablished, M>, HandoffError> {
        let db = boot_services::allocate_database(services);
        self.create(db)
    }

    /// Adopt the database the previous stage passed in `param`.
    ///
    /// # Safety
    /// See [`module::adopt_database`].
    pub unsafe fn adopt(
        mut self,
        param: HandoffParameter,
    ) -> Result<Stage<DatabaseEstablished, M>, HandoffError> {
        // SAFETY: Forwarded from the caller
        let db = unsafe { module::adopt_database(param, &mut self.memory)? };
        active::install(db)?;

        let mut next = self.into_state();
        next.param = param;
        Ok(next)
    }
}

impl<M: PlatformMemory> Stage<DatabaseEstablished, M> {
    /// Read the coreboot tables into the memory ledger and the database.
    pub fn scan_legacy_tables<W: PhysWindow>(&mut self, window: &W) -> ScanSummary {
        let memory = &mut self.memory;
        match active::with(|db| coreboot::scan(window, &mut *memory, Some(db))) {
            Ok(summary) => summary,
            Err(_) => coreboot::scan(window, memory, None),
        }
    }

    /// Add the facts the next stage needs.
    pub fn publish(
        mut self,
        f: impl FnOnce(&mut Fwdb<'static>, &mut M) -> Result<(), HandoffError>,
    ) -> Result<Stage<FactsPublished, M>, HandoffError> {
        active::with(|db| f(db, &mut self.memory))??;
        Ok(self.into_state())
    }

    /// Read the facts the previous stage left.
    pub fn consume(
        mut self,
        f: impl FnOnce(&Fwdb<'static>, &mut M) -> Result<(), HandoffError>,
    ) -> Result<Stage<FactsConsumed, M>, HandoffError> {
        active::with(|db| f(db, &mut self.memory))??;
        Ok(self.into_state())
    }
}

impl<S: Launchable, M: PlatformMemory> Stage<S, M> {
    /// Copy the payload to its linked physical addresses and start it with
    /// the stage's handoff parameter.
    ///
    /// Returns only if the image is rejected.
    ///
    /// # Safety
    /// The payload's segments must land in memory this stage owns and that
    /// holds nothing still needed, and the image must be trusted code.
    pub unsafe fn handoff(self, image: &[u8]) -> Result<Launched, HandoffError> {
        // SAFETY: Forwarded from the caller
        let plan = unsafe { dc_elf::load(image, ElfClass::NATIVE)? };
        hooks().gdb_exit(1);
        // SAFETY: The plan was applied above
        unsafe { dc_elf::start(&plan, self.param.raw()) }
    }

    /// Place a single-segment payload in `dest` and start it there.
    ///
    /// Returns only if the image is rejected.
    ///
    /// # Safety
    /// `dest` must be executable memory and the image must be trusted code
    /// that runs from wherever it is placed.
    pub unsafe fn handoff_into(self, image: &[u8], dest: &mut [u8]) -> Result<Launched, HandoffError> {
        let entry_offset = dc_elf::load_single_segment_into(image, ElfClass::NATIVE, dest)?;
        hooks().gdb_exit(1);
        // SAFETY: dest now holds the image and entry_offset lies inside it
        unsafe {
            dc_elf::launch::start_relocated(dest.as_ptr(), dest.len(), entry_offset, self.param.raw())
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::config::names;
    use crate::consumers::{FwdbGpio, UefiHandles};
    use dc_fwdb::{Access, FwdbError};
    use std::boxed::Box;
    use std::vec;

    // The active database is process-wide, so the whole lifecycle runs in
    // one test.
    #[test]
    fn test_stage_lifecycle() {
        let region: &'static mut [u8] = Box::leak(vec![0u8; 1024].into_boxed_slice());
        let mut producer = Fwdb::create(region).unwrap();
        producer
            .access(names::UEFI_SYSTEM_TABLE, Access::create_from(&0x1000usize.to_ne_bytes()))
            .unwrap();
        producer
            .access(names::UEFI_IMAGE_HANDLE, Access::create_from(&0x2000usize.to_ne_bytes()))
            .unwrap();
        producer
            .access(names::GPIO_LID, Access::create_from(&[1]))
            .unwrap();
        let param = HandoffParameter::database(producer.base_pointer().as_ptr());
        drop(producer);

        let stage = Stage::new(MemoryLedger::new()).check_relocation(&RelocReport::default());
        // SAFETY: param names the leaked database above
        let stage = unsafe { stage.adopt(param) }.unwrap();
        assert_eq!(stage.parameter(), param);

        let mut handles = None;
        let stage = stage
            .consume(|db, _| {
                handles = Some(UefiHandles::read(db)?);
                Ok(())
            })
            .unwrap();
        assert_eq!(
            handles,
            Some(UefiHandles {
                system_table: 0x1000,
                image_handle: 0x2000
            })
        );

        let mut lid = FwdbGpio::new(names::GPIO_LID);
        assert_eq!(lid.get(), Ok(true));
        assert_eq!(UefiHandles::read_active().map(|h| h.image_handle), Ok(0x2000));

        let base = param.raw() as u64;
        assert!(stage.memory().overlaps_used(base, base + 1));
        assert!(stage.memory().overlaps_used(base + 1023, base + 1024));

        // A stage installs its database once
        // SAFETY: same leaked database
        let again = unsafe { Stage::new(MemoryLedger::new()).adopt(param) };
        assert!(matches!(again, Err(HandoffError::Fwdb(FwdbError::AlreadyActive))));
    }
}
