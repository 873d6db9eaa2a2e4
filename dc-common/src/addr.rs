//! Physical Address Type
//!
//! Boot stages run with an identity mapping (or none at all), so every address
//! that crosses a stage boundary is physical. [`PhysAddr`] keeps those values
//! apart from plain lengths and offsets in signatures.
//!
//! The type is a `#[repr(transparent)]` wrapper around `u64`, so it can sit in
//! `#[repr(C)]` handoff structures and be passed through registers unchanged.

use core::fmt;

/// Physical memory address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    /// Create a new physical address.
    #[inline]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Build an address from a pointer into identity-mapped memory.
    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u64)
    }

    /// Get the raw address value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Address `len` bytes further on, or `None` past the top of the address
    /// space.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, len: u64) -> Option<Self> {
        match self.0.checked_add(len) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#018x})", self.0)
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_add() {
        assert_eq!(PhysAddr::new(0x1000).checked_add(0x234), Some(PhysAddr::new(0x1234)));
        assert_eq!(PhysAddr::new(u64::MAX - 4).checked_add(4), Some(PhysAddr::new(u64::MAX)));
        assert_eq!(PhysAddr::new(u64::MAX - 4).checked_add(5), None);
    }

    #[test]
    fn test_from_pointer() {
        let word = 0u64;
        let addr = PhysAddr::from_ptr(&word);
        assert_eq!(addr.as_u64(), &word as *const u64 as usize as u64);
        assert_eq!(PhysAddr::default(), PhysAddr::new(0));
    }
}
