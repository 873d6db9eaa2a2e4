//! On-Memory Format
//!
//! ```text
//! +--------------------+  base
//! | Header (24 bytes)  |
//! +--------------------+  base + header_size
//! | size: u32          |  entry 0, 8-byte aligned
//! | name\0 + padding   |  size field + name padded to a multiple of 8
//! | data               |
//! +--------------------+  next entry at the next 8-byte boundary
//! | ...                |
//! +--------------------+
//! | 0: u32             |  terminator
//! +--------------------+
//! ```
//!
//! `size` counts the size field, the padded name and the data. Integers are
//! stored in native byte order; the database never leaves the machine.

/// Format major version. A different major version cannot be parsed.
pub const MAJOR_VERSION: u8 = 1;
/// Format minor version.
pub const MINOR_VERSION: u8 = 0;
/// Header signature.
pub const SIGNATURE: [u8; 6] = *b"DCFWDB";

/// Size of [`Header`] in bytes.
pub const HEADER_SIZE: usize = 24;
/// Size of an entry's length field (and of the terminator).
pub const SIZE_FIELD: usize = 4;
/// Entry alignment relative to the database base.
pub const ENTRY_ALIGN: usize = 8;
/// Longest accepted entry name, excluding the NUL terminator.
pub const MAX_NAME_LEN: usize = 63;

/// Smallest region `create` accepts: a header plus the terminator.
pub const MIN_DB_SIZE: usize = HEADER_SIZE + SIZE_FIELD;

/// Database header, stored unaligned at the base of the region.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub major_version: u8,
    pub minor_version: u8,
    pub signature: [u8; 6],
    /// Optional lookup index. No index format is defined, so always 0.
    pub index_ptr: u64,
    /// Total bytes the database may grow to, header included
    pub max_size: u32,
    pub header_size: u16,
    pub reserved: u16,
}

const _: () = assert!(core::mem::size_of::<Header>() == HEADER_SIZE);

impl Header {
    #[must_use]
    pub const fn new(max_size: u32) -> Self {
        Self {
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            signature: SIGNATURE,
            index_ptr: 0,
            max_size,
            header_size: HEADER_SIZE as u16,
            reserved: 0,
        }
    }

    /// Signature and major version are ones this code can parse.
    #[must_use]
    pub fn is_compatible(&self) -> bool {
        let signature = self.signature;
        let major = self.major_version;
        signature == SIGNATURE && major == MAJOR_VERSION
    }
}

/// Round `value` up to the entry alignment.
#[inline]
#[must_use]
pub const fn align_entry(value: usize) -> usize {
    (value + ENTRY_ALIGN - 1) & !(ENTRY_ALIGN - 1)
}

/// Offset of the data field from the start of an entry whose name is
/// `name_len` bytes long (without the NUL).
#[inline]
#[must_use]
pub const fn data_offset(name_len: usize) -> usize {
    align_entry(SIZE_FIELD + name_len + 1)
}

/// Check a name before it is written into a database.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN && !name.as_bytes().contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_offset_padding() {
        // 4 + "a\0" = 6 -> 8
        assert_eq!(data_offset(1), 8);
        // 4 + "abc\0" = 8 -> 8
        assert_eq!(data_offset(3), 8);
        // 4 + "abcd\0" = 9 -> 16
        assert_eq!(data_offset(4), 16);
        assert_eq!(data_offset("uefi_system_table".len()), 24);
    }

    #[test]
    fn test_name_validation() {
        assert!(is_valid_name("gpio.lid"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("bad\0name"));
        let long = [b'x'; MAX_NAME_LEN + 1];
        assert!(!is_valid_name(core::str::from_utf8(&long).unwrap()));
        assert!(is_valid_name(core::str::from_utf8(&long[..MAX_NAME_LEN]).unwrap()));
    }

    #[test]
    fn test_header_fields() {
        let header = Header::new(0x1000);
        assert!(header.is_compatible());
        let max_size = header.max_size;
        let header_size = header.header_size;
        assert_eq!(max_size, 0x1000);
        assert_eq!(header_size as usize, HEADER_SIZE);
    }
}
