//! AArch64 Exception Frame and Vector Dispatch
//!
//! The vector table has sixteen 128-byte slots: four exception kinds
//! (synchronous, IRQ, FIQ, SError) for each of four origins (current EL on
//! SP_EL0, current EL on SP_ELx, lower EL in AArch64, lower EL in AArch32).
//!
//! Every slot saves the interrupted state as an [`ExceptionState`] on the
//! stack and calls the dispatcher with its slot index. Handlers may edit the
//! saved state; the return path restores it (including ELR) before `eret`.
//!
//! The frame layout and the slot index space are the contract with the vector
//! code. They are plain data, so the types and the [`Dispatcher`] are
//! available on every target. The vector table itself only exists on AArch64.

use core::fmt;
use core::sync::atomic::{AtomicPtr, Ordering};

/// Saved state at exception entry.
///
/// Layout: `elr` at offset 0, `esr` at offset 8, `x0..x30` from offset 16.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionState {
    /// Exception Link Register (return address)
    pub elr: u64,
    /// Exception Syndrome Register
    pub esr: u64,
    /// General purpose registers x0-x30
    pub regs: [u64; 31],
}

const _: () = assert!(core::mem::size_of::<ExceptionState>() == 33 * 8);
const _: () = assert!(core::mem::offset_of!(ExceptionState, regs) == 16);

/// Bytes reserved on the stack per frame, rounded up to keep SP 16-byte aligned.
pub const FRAME_SIZE: usize = (core::mem::size_of::<ExceptionState>() + 15) & !15;

impl ExceptionState {
    /// A zeroed frame.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            elr: 0,
            esr: 0,
            regs: [0; 31],
        }
    }

    /// Exception class (ESR bits [31:26]).
    #[must_use]
    pub const fn exception_class(&self) -> u8 {
        ((self.esr >> 26) & 0x3F) as u8
    }

    /// Instruction specific syndrome (ESR bits [24:0]).
    #[must_use]
    pub const fn syndrome(&self) -> u32 {
        (self.esr & 0x01FF_FFFF) as u32
    }
}

impl Default for ExceptionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Exception kind, the low two bits of a slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    /// Synchronous exception
    Sync,
    /// IRQ interrupt
    Irq,
    /// FIQ interrupt
    Fiq,
    /// System error
    SError,
}

/// Exception origin, the high two bits of a slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionOrigin {
    /// Same exception level, SP_EL0
    CurrentSpEl0,
    /// Same exception level, SP_ELx
    CurrentSpElx,
    /// Lower exception level, AArch64
    LowerAArch64,
    /// Lower exception level, AArch32
    LowerAArch32,
}

/// Vector table slot, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VectorSlot {
    SyncSp0 = 0,
    IrqSp0 = 1,
    FiqSp0 = 2,
    SErrorSp0 = 3,
    SyncSpx = 4,
    IrqSpx = 5,
    FiqSpx = 6,
    SErrorSpx = 7,
    SyncElx64 = 8,
    IrqElx64 = 9,
    FiqElx64 = 10,
    SErrorElx64 = 11,
    SyncElx32 = 12,
    IrqElx32 = 13,
    FiqElx32 = 14,
    SErrorElx32 = 15,
}

impl VectorSlot {
    /// Number of slots in the vector table.
    pub const COUNT: usize = 16;

    /// All slots in table order.
    pub const ALL: [VectorSlot; Self::COUNT] = [
        Self::SyncSp0,
        Self::IrqSp0,
        Self::FiqSp0,
        Self::SErrorSp0,
        Self::SyncSpx,
        Self::IrqSpx,
        Self::FiqSpx,
        Self::SErrorSpx,
        Self::SyncElx64,
        Self::IrqElx64,
        Self::FiqElx64,
        Self::SErrorElx64,
        Self::SyncElx32,
        Self::IrqElx32,
        Self::FiqElx32,
        Self::SErrorElx32,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < Self::COUNT {
            Some(Self::ALL[index])
        } else {
            None
        }
    }

    #[must_use]
    pub const fn kind(self) -> ExceptionKind {
        match self.index() & 0x3 {
            0 => ExceptionKind::Sync,
            1 => ExceptionKind::Irq,
            2 => ExceptionKind::Fiq,
            _ => ExceptionKind::SError,
        }
    }

    #[must_use]
    pub const fn origin(self) -> ExceptionOrigin {
        match self.index() >> 2 {
            0 => ExceptionOrigin::CurrentSpEl0,
            1 => ExceptionOrigin::CurrentSpElx,
            2 => ExceptionOrigin::LowerAArch64,
            _ => ExceptionOrigin::LowerAArch32,
        }
    }

    /// Byte offset of this slot from the vector base.
    #[must_use]
    pub const fn vector_offset(self) -> usize {
        self.index() * 0x80
    }
}

/// Why an exception could not be routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// The vector code passed an index outside the table
    InvalidIndex(usize),
    /// No handler is registered for the slot
    Unhandled(VectorSlot),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidIndex(idx) => write!(f, "invalid exception vector index {}", idx),
            Self::Unhandled(slot) => write!(f, "unhandled exception in slot {:?}", slot),
        }
    }
}

/// Exception handler function type
pub type ExceptionHandler = fn(&mut ExceptionState);

/// Handler table indexed by [`VectorSlot`].
///
/// Handlers are stored as `AtomicPtr` so registration needs no lock and the
/// vector path can read them from any context.
pub struct Dispatcher {
    handlers: [AtomicPtr<()>; VectorSlot::COUNT],
}

impl Dispatcher {
    /// A table with no handlers registered.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            handlers: [const { AtomicPtr::new(core::ptr::null_mut()) }; VectorSlot::COUNT],
        }
    }

    /// Route exceptions arriving through `slot` to `handler`.
    pub fn register(&self, slot: VectorSlot, handler: ExceptionHandler) {
        self.handlers[slot.index()].store(handler as *mut (), Ordering::Release);
    }

    /// Remove the handler for `slot`.
    pub fn unregister(&self, slot: VectorSlot) {
        self.handlers[slot.index()].store(core::ptr::null_mut(), Ordering::Release);
    }

    #[must_use]
    pub fn is_registered(&self, slot: VectorSlot) -> bool {
        !self.handlers[slot.index()].load(Ordering::Acquire).is_null()
    }

    /// Run the handler registered for vector index `idx`.
    pub fn try_dispatch(
        &self,
        state: &mut ExceptionState,
        idx: usize,
    ) -> Result<VectorSlot, DispatchError> {
        let slot = VectorSlot::from_index(idx).ok_or(DispatchError::InvalidIndex(idx))?;
        let ptr = self.handlers[idx].load(Ordering::Acquire);
        if ptr.is_null() {
            return Err(DispatchError::Unhandled(slot));
        }
        // SAFETY: Non-null entries are only ever stored by `register` from a
        // valid `ExceptionHandler`
        let handler: ExceptionHandler = unsafe { core::mem::transmute(ptr) };
        handler(state);
        Ok(slot)
    }

    /// Run the handler for `idx`, halting if there is none.
    pub fn dispatch(&self, state: &mut ExceptionState, idx: usize) {
        if let Err(err) = self.try_dispatch(state, idx) {
            log::error!(
                "{}: ELR={:#x} ESR={:#x} EC={:#x}",
                err,
                state.elr,
                state.esr,
                state.exception_class()
            );
            crate::halt();
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Table consulted by the vector code.
pub static DISPATCHER: Dispatcher = Dispatcher::new();

#[cfg(target_arch = "aarch64")]
mod vectors {
    use super::{DISPATCHER, ExceptionState};

    /// Vector slot stub, fits within 128 bytes (23 instructions).
    ///
    /// Frame layout (272 bytes, see `FRAME_SIZE`):
    /// - ELR_EL1: offset 0
    /// - ESR_EL1: offset 8
    /// - x0-x30: offsets 16-256
    macro_rules! vector_stub {
        ($idx:literal) => {
            concat!(
                ".balign 128\n",
                "sub sp, sp, #272\n",
                "stp x0, x1, [sp, #16]\n",
                "stp x2, x3, [sp, #32]\n",
                "stp x4, x5, [sp, #48]\n",
                "stp x6, x7, [sp, #64]\n",
                "stp x8, x9, [sp, #80]\n",
                "stp x10, x11, [sp, #96]\n",
                "stp x12, x13, [sp, #112]\n",
                "stp x14, x15, [sp, #128]\n",
                "stp x16, x17, [sp, #144]\n",
                "stp x18, x19, [sp, #160]\n",
                "stp x20, x21, [sp, #176]\n",
                "stp x22, x23, [sp, #192]\n",
                "stp x24, x25, [sp, #208]\n",
                "stp x26, x27, [sp, #224]\n",
                "stp x28, x29, [sp, #240]\n",
                "str x30, [sp, #256]\n",
                "mrs x0, elr_el1\n",
                "mrs x1, esr_el1\n",
                "stp x0, x1, [sp]\n",
                "mov x0, sp\n",
                "mov x1, #", stringify!($idx), "\n",
                "b dc_exception_common\n",
            )
        };
    }

    core::arch::global_asm!(
        ".pushsection .text.dc_vectors, \"ax\"",
        ".balign 2048",
        ".global dc_exception_vectors",
        "dc_exception_vectors:",
        vector_stub!(0),
        vector_stub!(1),
        vector_stub!(2),
        vector_stub!(3),
        vector_stub!(4),
        vector_stub!(5),
        vector_stub!(6),
        vector_stub!(7),
        vector_stub!(8),
        vector_stub!(9),
        vector_stub!(10),
        vector_stub!(11),
        vector_stub!(12),
        vector_stub!(13),
        vector_stub!(14),
        vector_stub!(15),
        "dc_exception_common:",
        "bl dc_exception_dispatch",
        "ldr x0, [sp]",
        "msr elr_el1, x0",
        "ldp x0, x1, [sp, #16]",
        "ldp x2, x3, [sp, #32]",
        "ldp x4, x5, [sp, #48]",
        "ldp x6, x7, [sp, #64]",
        "ldp x8, x9, [sp, #80]",
        "ldp x10, x11, [sp, #96]",
        "ldp x12, x13, [sp, #112]",
        "ldp x14, x15, [sp, #128]",
        "ldp x16, x17, [sp, #144]",
        "ldp x18, x19, [sp, #160]",
        "ldp x20, x21, [sp, #176]",
        "ldp x22, x23, [sp, #192]",
        "ldp x24, x25, [sp, #208]",
        "ldp x26, x27, [sp, #224]",
        "ldp x28, x29, [sp, #240]",
        "ldr x30, [sp, #256]",
        "add sp, sp, #272",
        "eret",
        ".popsection",
    );

    const _: () = assert!(super::FRAME_SIZE == 272);

    unsafe extern "C" {
        safe static dc_exception_vectors: u8;
    }

    #[unsafe(no_mangle)]
    extern "C" fn dc_exception_dispatch(state: &mut ExceptionState, idx: u64) {
        DISPATCHER.dispatch(state, idx as usize);
    }

    /// Point VBAR_EL1 at the vector table.
    pub fn install() {
        use aarch64_cpu::registers::VBAR_EL1;
        use tock_registers::interfaces::Writeable;

        let base = &raw const dc_exception_vectors as u64;
        VBAR_EL1.set(base);
        aarch64_cpu::asm::barrier::isb(aarch64_cpu::asm::barrier::SY);
        log::debug!("Exception vectors at {:#x}", base);
    }
}

#[cfg(target_arch = "aarch64")]
pub use vectors::install;

#[cfg(test)]
mod tests {
    use super::*;

    fn mark_x0(state: &mut ExceptionState) {
        state.regs[0] = 0x42;
        state.elr += 4;
    }

    #[test]
    fn test_slot_index_round_trip() {
        for (i, slot) in VectorSlot::ALL.iter().enumerate() {
            assert_eq!(slot.index(), i);
            assert_eq!(VectorSlot::from_index(i), Some(*slot));
        }
        assert_eq!(VectorSlot::from_index(VectorSlot::COUNT), None);
    }

    #[test]
    fn test_slot_kind_and_origin() {
        assert_eq!(VectorSlot::SyncSp0.kind(), ExceptionKind::Sync);
        assert_eq!(VectorSlot::SyncSp0.origin(), ExceptionOrigin::CurrentSpEl0);
        assert_eq!(VectorSlot::IrqSpx.kind(), ExceptionKind::Irq);
        assert_eq!(VectorSlot::IrqSpx.origin(), ExceptionOrigin::CurrentSpElx);
        assert_eq!(VectorSlot::FiqElx64.kind(), ExceptionKind::Fiq);
        assert_eq!(VectorSlot::FiqElx64.origin(), ExceptionOrigin::LowerAArch64);
        assert_eq!(VectorSlot::SErrorElx32.kind(), ExceptionKind::SError);
        assert_eq!(VectorSlot::SErrorElx32.origin(), ExceptionOrigin::LowerAArch32);
        assert_eq!(VectorSlot::SErrorElx32.vector_offset(), 0x780);
    }

    #[test]
    fn test_frame_layout() {
        assert_eq!(core::mem::offset_of!(ExceptionState, elr), 0);
        assert_eq!(core::mem::offset_of!(ExceptionState, esr), 8);
        assert_eq!(FRAME_SIZE, 272);

        let state = ExceptionState {
            esr: 0x9600_0045,
            ..ExceptionState::new()
        };
        assert_eq!(state.exception_class(), 0x25);
        assert_eq!(state.syndrome(), 0x45);
    }

    #[test]
    fn test_dispatch_routes_by_slot() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(VectorSlot::SyncSpx, mark_x0);

        let mut state = ExceptionState { elr: 0x1000, ..ExceptionState::new() };
        let slot = dispatcher.try_dispatch(&mut state, 4).unwrap();
        assert_eq!(slot, VectorSlot::SyncSpx);
        assert_eq!(state.regs[0], 0x42);
        assert_eq!(state.elr, 0x1004);
    }

    #[test]
    fn test_dispatch_without_handler() {
        let dispatcher = Dispatcher::new();
        let mut state = ExceptionState::new();
        assert_eq!(
            dispatcher.try_dispatch(&mut state, 5),
            Err(DispatchError::Unhandled(VectorSlot::IrqSpx))
        );
        assert_eq!(
            dispatcher.try_dispatch(&mut state, 16),
            Err(DispatchError::InvalidIndex(16))
        );

        dispatcher.register(VectorSlot::IrqSpx, mark_x0);
        assert!(dispatcher.is_registered(VectorSlot::IrqSpx));
        dispatcher.unregister(VectorSlot::IrqSpx);
        assert!(!dispatcher.is_registered(VectorSlot::IrqSpx));
        assert_eq!(state, ExceptionState::new());
    }
}
