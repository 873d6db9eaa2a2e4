//! Payload Launch
//!
//! Control transfer into a loaded image is terminal: the functions here return
//! `!`, so nothing after a launch can be written.

use crate::loader::LoadPlan;

/// Payload entry point. Receives the handoff parameter and never returns.
pub type EntryPoint = extern "C" fn(usize) -> !;

/// Synchronise the instruction cache over every loaded segment and jump to
/// the image's entry point with `param` as its only argument.
///
/// # Safety
/// `plan` must have been applied, and its entry point must be code that
/// follows the [`EntryPoint`] calling convention.
pub unsafe fn start(plan: &LoadPlan, param: usize) -> ! {
    for seg in plan.segments() {
        dc_arch::sync_instructions(seg.dest as usize, seg.mem_size);
    }
    // SAFETY: Forwarded from the caller
    unsafe { jump(plan.entry() as usize, param) }
}

/// Start an image that was placed at `base` (see
/// [`LoadPlan::load_single_into`]), entering at `base + entry_offset`.
///
/// # Safety
/// `[base, base + len)` must hold the loaded image and `entry_offset` must be
/// its entry point.
pub unsafe fn start_relocated(base: *const u8, len: usize, entry_offset: usize, param: usize) -> ! {
    dc_arch::sync_instructions(base as usize, len);
    // SAFETY: Forwarded from the caller
    unsafe { jump(base as usize + entry_offset, param) }
}

/// Jump to `entry` with `param`.
///
/// # Safety
/// `entry` must be the address of code following the [`EntryPoint`] calling
/// convention, visible to instruction fetch.
pub unsafe fn jump(entry: usize, param: usize) -> ! {
    log::info!("Starting payload at {:#x} (parameter {:#x})", entry, param);
    // SAFETY: Caller guarantees entry is a valid EntryPoint
    let entry: EntryPoint = unsafe { core::mem::transmute::<usize, EntryPoint>(entry) };
    entry(param)
}
