//! Database Consumers
//!
//! Typed readers for the facts producers publish. Every read states the exact
//! length it expects, so a producer and consumer built from different sources
//! fail with [`FwdbError::SizeMismatch`] instead of reading garbage.

use dc_fwdb::{Fwdb, FwdbError, active};

use crate::config::names;

/// A sampled hardware line published as a one-byte entry.
///
/// The value is read once and cached; the entry never changes after it is
/// written.
#[derive(Debug, Clone)]
pub struct FwdbGpio {
    name: &'static str,
    cached: Option<bool>,
}

impl FwdbGpio {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name, cached: None }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Line state from `db`.
    pub fn get_from(&mut self, db: &Fwdb<'_>) -> Result<bool, FwdbError> {
        if let Some(value) = self.cached {
            return Ok(value);
        }
        let value = db.read(self.name, Some(1))?.read_u8()? != 0;
        self.cached = Some(value);
        Ok(value)
    }

    /// Line state from the active database.
    pub fn get(&mut self) -> Result<bool, FwdbError> {
        if let Some(value) = self.cached {
            return Ok(value);
        }
        active::with(|db| self.get_from(db))?
    }
}

/// Handles the UEFI producer leaves for the next stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UefiHandles {
    pub system_table: usize,
    pub image_handle: usize,
}

impl UefiHandles {
    const WORD: usize = core::mem::size_of::<usize>();

    /// Read both handles from `db`.
    pub fn read(db: &Fwdb<'_>) -> Result<Self, FwdbError> {
        Ok(Self {
            system_table: db.read(names::UEFI_SYSTEM_TABLE, Some(Self::WORD))?.read_usize()?,
            image_handle: db.read(names::UEFI_IMAGE_HANDLE, Some(Self::WORD))?.read_usize()?,
        })
    }

    /// Read both handles from the active database.
    pub fn read_active() -> Result<Self, FwdbError> {
        active::with(|db| Self::read(db))?
    }
}
