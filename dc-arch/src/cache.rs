//! Instruction Cache Synchronisation
//!
//! A loaded image is written through the data path. Before jumping into it the
//! instruction side must observe those writes.
//!
//! On AArch64 the data cache lines covering the range are cleaned to the Point
//! of Unification (DC CVAU) and the matching instruction cache lines are
//! invalidated (IC IVAU), with the barriers the architecture requires between
//! the two. Line sizes come from `CTR_EL0` and are cached after the first read.
//!
//! x86 keeps instruction fetch coherent with stores, so only a compiler fence
//! is needed there.

#[cfg(target_arch = "aarch64")]
use core::sync::atomic::AtomicU64;
use core::sync::atomic::{Ordering, compiler_fence};

/// Cached `CTR_EL0` value. Zero means not yet read.
#[cfg(target_arch = "aarch64")]
static CTR_EL0_CACHE: AtomicU64 = AtomicU64::new(0);

#[cfg(target_arch = "aarch64")]
fn cache_type() -> u64 {
    let cached = CTR_EL0_CACHE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }

    let ctr: u64;
    // SAFETY: Reading CTR_EL0 has no side effects
    unsafe {
        core::arch::asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack, preserves_flags));
    }
    CTR_EL0_CACHE.store(ctr, Ordering::Relaxed);
    ctr
}

/// Data cache minimum line size in bytes (`CTR_EL0.DminLine`).
#[cfg(target_arch = "aarch64")]
fn dcache_line_size() -> usize {
    4 << ((cache_type() >> 16) & 0xF)
}

/// Instruction cache minimum line size in bytes (`CTR_EL0.IminLine`).
#[cfg(target_arch = "aarch64")]
fn icache_line_size() -> usize {
    4 << (cache_type() & 0xF)
}

/// Make `[start, start + len)` safe to execute after it was written as data.
pub fn sync_instructions(start: usize, len: usize) {
    if len == 0 {
        return;
    }
    compiler_fence(Ordering::SeqCst);

    #[cfg(target_arch = "aarch64")]
    {
        use aarch64_cpu::asm::barrier;

        let end = start.saturating_add(len);

        let line = dcache_line_size();
        let mut addr = start & !(line - 1);
        while addr < end {
            // SAFETY: DC CVAU only affects cache state for a mapped address
            unsafe {
                core::arch::asm!("dc cvau, {addr}", addr = in(reg) addr, options(nostack));
            }
            addr += line;
        }
        barrier::dsb(barrier::ISH);

        let line = icache_line_size();
        let mut addr = start & !(line - 1);
        while addr < end {
            // SAFETY: IC IVAU only affects cache state for a mapped address
            unsafe {
                core::arch::asm!("ic ivau, {addr}", addr = in(reg) addr, options(nostack));
            }
            addr += line;
        }
        barrier::dsb(barrier::ISH);
        barrier::isb(barrier::SY);
    }

    #[cfg(not(target_arch = "aarch64"))]
    let _ = start;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_instructions_on_data_buffer() {
        let buffer = [0u8; 256];
        sync_instructions(buffer.as_ptr() as usize, buffer.len());
        sync_instructions(buffer.as_ptr() as usize, 0);
    }
}
