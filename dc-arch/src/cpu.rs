//! CPU Control
//!
//! Terminal halt used when a failure happens before any error sink exists.

/// Stop this CPU for good.
///
/// Interrupts are masked first where the architecture allows it from the
/// current privilege level, so nothing can resume the stage.
#[inline]
pub fn halt() -> ! {
    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: Masking DAIF only affects this CPU and we never return
        unsafe {
            core::arch::asm!("msr daifset, #0xf", options(nomem, nostack));
        }
        loop {
            aarch64_cpu::asm::wfi();
        }
    }

    #[cfg(target_arch = "x86_64")]
    {
        x86_64::instructions::interrupts::disable();
        loop {
            x86_64::instructions::hlt();
        }
    }

    #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
    loop {
        core::hint::spin_loop();
    }
}
