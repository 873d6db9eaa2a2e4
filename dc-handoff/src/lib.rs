//! # dc-handoff
//!
//! Everything a boot stage does between gaining control and starting the next
//! stage:
//! - [`stage`]: the lifecycle, as a typestate ending in a terminal handoff
//! - [`legacy`], [`boot_services`], [`module`]: establishing the stage's
//!   firmware database, one adapter per boot source
//! - [`coreboot`]: best-effort scan of the legacy coreboot tables
//! - [`ram_map`], [`storage`]: the RAM map and firmware image entries
//! - [`consumers`]: typed readers for published facts
//! - [`lzma`]: expansion of compressed payloads
//! - [`hooks`]: debug hooks chosen at build time
//! - [`logging`]: console logger for stages without firmware services

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod boot_services;
pub mod config;
pub mod consumers;
pub mod coreboot;
pub mod efi_file;
pub mod error;
pub mod hooks;
pub mod legacy;
pub mod logging;
pub mod lzma;
pub mod module;
pub mod ram_map;
pub mod stage;
pub mod storage;

pub use error::HandoffError;
pub use stage::{
    DatabaseEstablished, FactsConsumed, FactsPublished, Launchable, Launched, NotStarted, Stage,
};
