//! Handoff Parameter
//!
//! The single machine word one stage passes to the entry point of the next.
//! Its meaning is agreed per platform: module stages read it as the address of
//! a firmware database created by their producer, legacy-table platforms leave
//! it unused and scan fixed addresses instead.

use crate::addr::PhysAddr;

/// Word handed to the next stage's entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct HandoffParameter(usize);

impl HandoffParameter {
    /// Parameter value for platforms that do not use it.
    pub const UNUSED: Self = Self(0);

    /// Wrap the raw word received in the entry register.
    #[inline]
    #[must_use]
    pub const fn from_raw(word: usize) -> Self {
        Self(word)
    }

    /// Parameter that points the next stage at a database.
    #[inline]
    #[must_use]
    pub fn database(base: *const u8) -> Self {
        Self(base as usize)
    }

    /// The raw word.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Interpret the word as a physical address.
    #[inline]
    #[must_use]
    pub const fn as_phys(self) -> PhysAddr {
        PhysAddr::new(self.0 as u64)
    }

    /// Whether the producer left the parameter empty.
    #[inline]
    #[must_use]
    pub const fn is_unused(self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_parameter_carries_address() {
        let region = [0u8; 16];
        let param = HandoffParameter::database(region.as_ptr());
        assert_eq!(param.raw(), region.as_ptr() as usize);
        assert_eq!(param.as_phys(), PhysAddr::from_ptr(region.as_ptr()));
        assert!(!param.is_unused());
        assert!(HandoffParameter::UNUSED.is_unused());
    }
}
