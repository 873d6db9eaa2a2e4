//! Handoff Configuration Constants

use dc_common::memory::page;

/// Physical addresses searched for the coreboot tables, in order
pub const TABLE_SCAN_ADDRESSES: [u64; 2] = [0x0000_0000, 0x000F_0000];

/// Bytes searched at each scan address
pub const TABLE_SCAN_WINDOW: u64 = 0x1000;

/// The table header is 16-byte aligned
pub const TABLE_SCAN_STRIDE: u64 = 16;

/// Forward records followed before giving up
pub const MAX_FORWARD_DEPTH: usize = 4;

// -- Legacy x86 payload: the database lives at a fixed address and the whole
// -- block up to LEGACY_USED_END is kept away from later allocators.

/// Base of the database created by the legacy producer
pub const LEGACY_FWDB_BASE: u64 = 0x0300_0000;

/// Capacity of the database created by the legacy producer
pub const LEGACY_FWDB_SIZE: u32 = 0x0100_0000;

/// End of the range the legacy producer marks used
pub const LEGACY_USED_END: u64 = 0x0400_0000;

/// Pages requested from boot services for the database
pub const FWDB_PAGES: usize = 0x1000;

/// Size of the database the UEFI producer creates
pub const FWDB_SIZE: u32 = (FWDB_PAGES * page::SIZE_4K) as u32;

/// Next stage image on the EFI system partition
pub const PAYLOAD_PATH: &str = "\\EFI\\DC\\PAYLOAD.ELF";

/// Firmware images published as storage entries, with the boot partition
/// file each is read from
pub const STORAGE_IMAGES: [(&str, &str); 3] = [
    (names::RO_IMAGE, "\\depthcharge\\ro"),
    (names::RW_A_IMAGE, "\\depthcharge\\rwa"),
    (names::RW_B_IMAGE, "\\depthcharge\\rwb"),
];

/// Longest payload path accepted, in UTF-16 code units
pub const MAX_PATH_LEN: usize = 64;

/// Entry names shared between producers and consumers
pub mod names {
    /// Pointer to the firmware's system table
    pub const UEFI_SYSTEM_TABLE: &str = "uefi_system_table";
    /// Image handle of the producing stage
    pub const UEFI_IMAGE_HANDLE: &str = "uefi_image_handle";

    /// Prefix of one-byte GPIO entries published from the coreboot tables
    pub const GPIO_PREFIX: &str = "gpio.";

    pub const GPIO_WRITE_PROTECT: &str = "gpio.write protect";
    pub const GPIO_RECOVERY: &str = "gpio.recovery";
    pub const GPIO_DEVELOPER: &str = "gpio.developer";
    pub const GPIO_OPROM: &str = "gpio.oprom";
    pub const GPIO_LID: &str = "gpio.lid";
    pub const GPIO_POWER: &str = "gpio.power";
    pub const GPIO_EC_IN_RW: &str = "gpio.EC in RW";

    pub const VBOOT_SHARED_DATA: &str = "vboot.shared_data";
    pub const VBOOT_INIT_PARAMS: &str = "vboot.handoff.init_params";

    /// RAM map in E820 form
    pub const RAM_MAP: &str = "e820 memory ranges";

    /// Read-only firmware image
    pub const RO_IMAGE: &str = "uefi_ro_image";
    /// Rewritable firmware images, slots A and B
    pub const RW_A_IMAGE: &str = "uefi_rw_a_image";
    pub const RW_B_IMAGE: &str = "uefi_rw_b_image";
}
