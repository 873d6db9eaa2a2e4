//! # dc-elf
//!
//! ELF handling for boot stages:
//! - [`header`]: magic and class checks
//! - [`loader`]: validate and copy loadable segments to their physical addresses
//! - [`launch`]: terminal jump into a loaded image
//! - [`reloc`]: base-relative self-relocation of a position-independent image

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod header;
pub mod launch;
pub mod loader;
pub mod reloc;

pub use error::ElfError;
pub use header::{ElfClass, check_header};
pub use launch::{EntryPoint, start};
pub use loader::{LoadPlan, Segment, load, load_single_segment_into, plan};
pub use reloc::{Machine, Rela, RelocReport, relocate};
