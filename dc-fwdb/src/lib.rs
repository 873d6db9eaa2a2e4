//! # dc-fwdb
//!
//! Firmware database: a bump-allocated store of named blobs that carries
//! facts from one boot stage to the next.
//!
//! - [`format`]: on-memory layout shared by every stage
//! - [`db`]: handle over a database region (create, adopt, access, verify)
//! - [`active`]: the single database a stage works with
//!
//! # Example
//!
//! ```ignore
//! use dc_fwdb::{Access, Fwdb};
//!
//! let mut db = Fwdb::create(region)?;
//! db.access("gpio.lid", Access::create_from(&[1]))?;
//! let lid = db.read("gpio.lid", Some(1))?.read_u8()?;
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod active;
pub mod db;
pub mod error;
pub mod format;

pub use db::{Access, Entries, Entry, Fwdb};
pub use error::FwdbError;
