//! Firmware Image Entries
//!
//! The next stage treats the read-only and rewritable firmware images as
//! storage devices backed by database entries. Each entry is exactly as large
//! as the file it was read from.

extern crate alloc;

use alloc::vec::Vec;
use dc_fwdb::{Access, Fwdb};

use crate::config::STORAGE_IMAGES;

/// Publish every image `read` can supply and return how many were published.
///
/// `read` is given the boot partition path of each image. Images that cannot
/// be read or do not fit in the database are skipped.
pub fn publish_images(db: &mut Fwdb<'_>, mut read: impl FnMut(&str) -> Option<Vec<u8>>) -> usize {
    let mut published = 0;
    for (name, path) in STORAGE_IMAGES {
        let Some(image) = read(path) else {
            log::warn!("No image for {} at {}", name, path);
            continue;
        };
        match db.access(name, Access::create_from(&image)) {
            Ok(entry) => {
                log::info!("Published {} ({:#x} bytes)", name, entry.len());
                published += 1;
            }
            Err(e) => log::warn!("Could not publish {} ({:#x} bytes): {}", name, image.len(), e),
        }
    }
    published
}
