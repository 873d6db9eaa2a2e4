//! EFI System Partition Files
//!
//! Reads the next stage image from the partition this stage was loaded from.

extern crate alloc;

use alloc::vec::Vec;
use uefi::CStr16;
use uefi::boot;
use uefi::fs::FileSystem;

use crate::config::MAX_PATH_LEN;

/// Read the whole file at `path` from the boot partition.
///
/// Returns `None` if the partition or the file cannot be opened.
pub fn read_file(path: &str) -> Option<Vec<u8>> {
    let sfs = match boot::get_image_file_system(boot::image_handle()) {
        Ok(sfs) => sfs,
        Err(e) => {
            log::warn!("Boot partition unavailable: {:?}", e.status());
            return None;
        }
    };
    let mut fs = FileSystem::new(sfs);

    let mut path_buf = [0u16; MAX_PATH_LEN];
    let Ok(cpath) = CStr16::from_str_with_buf(path, &mut path_buf) else {
        log::warn!("Path {} does not fit in {} characters", path, MAX_PATH_LEN);
        return None;
    };

    match fs.read(cpath) {
        Ok(data) => {
            log::info!("Read {} ({} bytes)", path, data.len());
            Some(data)
        }
        Err(e) => {
            log::warn!("Could not read {}: {:?}", path, e);
            None
        }
    }
}
