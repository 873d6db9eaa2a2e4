//! # dc-arch
//!
//! Architecture support for boot stages.
//!
//! Provides the few CPU operations the handoff path depends on:
//! - [`cpu`]: terminal halt for the pre-reporting failure tier
//! - [`cache`]: instruction cache synchronisation after code is copied
//! - [`exceptions`]: AArch64 exception frame layout, vector slots and dispatch
//! - [`phys`]: byte reads from identity-mapped physical memory
//!
//! # Safety
//!
//! All unsafe operations are documented with `// SAFETY:` comments
//! explaining the invariants that must be maintained.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod cache;
pub mod cpu;
pub mod exceptions;
pub mod phys;

pub use cache::sync_instructions;
pub use cpu::halt;
