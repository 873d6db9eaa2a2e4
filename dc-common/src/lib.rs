//! # dc-common
//!
//! Shared types for the boot stages and the handoff between them.
//!
//! - [`PhysAddr`](addr::PhysAddr): physical address newtype
//! - [`HandoffParameter`](handoff::HandoffParameter): the word passed to the
//!   next stage's entry point
//! - [`MemoryLedger`](memory::MemoryLedger): ranges a stage has claimed, DMA
//!   windows, and the RAM map reported by the previous stage
//!
//! # no_std
//!
//! This crate is `#![no_std]` and allocation-free so it can be linked into the
//! earliest stage code.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod addr;
pub mod handoff;
pub mod memory;

pub use addr::PhysAddr;
pub use handoff::HandoffParameter;
pub use memory::{LedgerError, MemoryLedger, PlatformMemory, RangeType};
