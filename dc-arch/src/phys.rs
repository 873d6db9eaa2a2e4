//! Physical Memory Reads
//!
//! Stages run identity mapped, so a physical address is also a pointer. The
//! legacy tables start at address 0, which Rust pointers cannot name, so byte
//! reads go through a single load instruction instead of a dereference.

/// Read the byte at physical address `addr`.
///
/// # Safety
/// `addr` must be identity mapped and readable.
#[inline]
pub unsafe fn read_u8(addr: usize) -> u8 {
    #[cfg(target_arch = "x86_64")]
    {
        let value: u8;
        // SAFETY: Caller guarantees addr is mapped and readable
        unsafe {
            core::arch::asm!(
                "mov {0}, byte ptr [{1}]",
                out(reg_byte) value,
                in(reg) addr,
                options(nostack, readonly, preserves_flags)
            );
        }
        value
    }

    #[cfg(target_arch = "aarch64")]
    {
        let value: u32;
        // SAFETY: Caller guarantees addr is mapped and readable
        unsafe {
            core::arch::asm!(
                "ldrb {0:w}, [{1}]",
                out(reg) value,
                in(reg) addr,
                options(nostack, readonly, preserves_flags)
            );
        }
        value as u8
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        // SAFETY: Caller guarantees addr is mapped and readable
        unsafe { core::ptr::read_volatile(addr as *const u8) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u8_matches_memory() {
        let bytes = [0x12u8, 0x34, 0x56];
        // SAFETY: reading our own stack array
        let value = unsafe { read_u8(bytes.as_ptr() as usize + 1) };
        assert_eq!(value, 0x34);
    }
}
