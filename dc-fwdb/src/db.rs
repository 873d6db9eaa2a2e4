//! Firmware Database Handle
//!
//! [`Fwdb`] is a view onto a database region in memory. It owns no storage:
//! the region is either a borrowed slice or raw physical memory handed over by
//! the previous stage. Entries are only ever appended, and their length never
//! changes after they are written.

use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use core::slice;

use crate::error::FwdbError;
use crate::format::{self, HEADER_SIZE, Header, MIN_DB_SIZE, SIZE_FIELD};

/// What [`Fwdb::access`] should do with a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access<'d> {
    /// Look up an existing entry, optionally requiring an exact length
    Read { expected: Option<usize> },
    /// Append a new entry of `size` bytes, copied from `init` or zeroed
    Create { size: usize, init: Option<&'d [u8]> },
}

impl<'d> Access<'d> {
    #[must_use]
    pub const fn read() -> Self {
        Self::Read { expected: None }
    }

    #[must_use]
    pub const fn read_exact(len: usize) -> Self {
        Self::Read {
            expected: Some(len),
        }
    }

    #[must_use]
    pub const fn create_zeroed(size: usize) -> Self {
        Self::Create { size, init: None }
    }

    #[must_use]
    pub const fn create_from(data: &'d [u8]) -> Self {
        Self::Create {
            size: data.len(),
            init: Some(data),
        }
    }
}

/// Location and length of one entry's data.
///
/// Data is moved in and out by copying, so several `Entry` values for the
/// same name can coexist without aliasing references.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _db: PhantomData<&'a [u8]>,
}

impl<'a> Entry<'a> {
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), FwdbError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(FwdbError::OutOfBounds),
        }
    }

    /// Copy `buf.len()` bytes starting at `offset` out of the entry.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<(), FwdbError> {
        self.check_range(offset, buf.len())?;
        // SAFETY: The range lies inside the entry, which lies inside the
        // database region
        unsafe {
            ptr::copy(self.ptr.as_ptr().add(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Copy `data` into the entry starting at `offset`.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<(), FwdbError> {
        self.check_range(offset, data.len())?;
        // SAFETY: The range lies inside the entry, which lies inside the
        // database region
        unsafe {
            ptr::copy(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    /// Copy the whole entry into `buf`, which must be exactly as long.
    pub fn copy_to(&self, buf: &mut [u8]) -> Result<(), FwdbError> {
        self.expect_len(buf.len())?;
        self.read_at(0, buf)
    }

    fn expect_len(&self, expected: usize) -> Result<(), FwdbError> {
        if self.len == expected {
            Ok(())
        } else {
            Err(FwdbError::SizeMismatch {
                expected,
                actual: self.len,
            })
        }
    }

    /// Read a one-byte entry.
    pub fn read_u8(&self) -> Result<u8, FwdbError> {
        let mut byte = [0u8; 1];
        self.copy_to(&mut byte)?;
        Ok(byte[0])
    }

    /// Read a pointer-width entry.
    pub fn read_usize(&self) -> Result<usize, FwdbError> {
        let mut word = [0u8; core::mem::size_of::<usize>()];
        self.copy_to(&mut word)?;
        Ok(usize::from_ne_bytes(word))
    }

    /// Borrow the entry data directly.
    ///
    /// # Safety
    /// Nothing may write to the entry while the slice is alive.
    #[must_use]
    pub unsafe fn as_slice(&self) -> &'a [u8] {
        // SAFETY: Caller guarantees no concurrent writes; ptr/len describe
        // the entry inside the region
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

enum Lookup<'a> {
    Found(Entry<'a>),
    /// Name absent; the terminator sits at this offset
    Missing { end: usize },
}

/// Handle to a firmware database region.
pub struct Fwdb<'a> {
    base: NonNull<u8>,
    /// Bytes of the region that may be touched
    limit: usize,
    _region: PhantomData<&'a mut [u8]>,
}

// SAFETY: The handle is the only path to the region's memory; moving it to
// another context moves that access with it
unsafe impl Send for Fwdb<'_> {}

impl<'a> Fwdb<'a> {
    /// Initialise an empty database filling `region`.
    ///
    /// Regions larger than 4 GiB are capped at `u32::MAX` bytes.
    pub fn create(region: &'a mut [u8]) -> Result<Self, FwdbError> {
        let size = u32::try_from(region.len()).unwrap_or(u32::MAX);
        let base = NonNull::from(region).cast::<u8>();
        // SAFETY: The region is exclusively borrowed for 'a and at least
        // `size` bytes long
        unsafe { Self::create_at(base, size) }
    }

    /// Initialise an empty database of `size` bytes at `base`.
    ///
    /// # Safety
    /// `[base, base + size)` must be writable memory reserved for the database
    /// for as long as the handle (and any [`Entry`] from it) is in use.
    pub unsafe fn create_at(base: NonNull<u8>, size: u32) -> Result<Self, FwdbError> {
        if (size as usize) < MIN_DB_SIZE {
            log::error!("The fwdb won't fit in a {} byte region", size);
            return Err(FwdbError::InsufficientSpace);
        }

        // SAFETY: Caller guarantees the region is writable and large enough
        // for the header and the terminator
        unsafe {
            base.as_ptr().cast::<Header>().write_unaligned(Header::new(size));
            base.as_ptr().add(HEADER_SIZE).cast::<u32>().write_unaligned(0);
        }

        log::debug!("Created fwdb at {:#x} ({} bytes)", base.as_ptr() as usize, size);

        Ok(Self {
            base,
            limit: size as usize,
            _region: PhantomData,
        })
    }

    /// Take over a database a previous stage created at `base`.
    ///
    /// No structural validation is done here; see [`Fwdb::verify`].
    ///
    /// # Safety
    /// `base` must point to a database header written by [`Fwdb::create_at`]
    /// (possibly in another stage), and the whole region it describes must
    /// stay reserved while the handle is in use.
    #[must_use]
    pub unsafe fn adopt(base: NonNull<u8>) -> Self {
        // SAFETY: Caller guarantees `base` points to a database header
        let header = unsafe { base.as_ptr().cast::<Header>().read_unaligned() };
        Self {
            base,
            limit: header.max_size as usize,
            _region: PhantomData,
        }
    }

    /// Take over a database stored in `region`.
    ///
    /// Every access stays inside `region` even if the header claims more.
    pub fn adopt_region(region: &'a mut [u8]) -> Result<Self, FwdbError> {
        if region.len() < MIN_DB_SIZE {
            return Err(FwdbError::InsufficientSpace);
        }
        let len = region.len();
        let base = NonNull::from(region).cast::<u8>();
        // SAFETY: The region is exclusively borrowed and holds a full header
        let header = unsafe { base.as_ptr().cast::<Header>().read_unaligned() };
        Ok(Self {
            base,
            limit: (header.max_size as usize).min(len),
            _region: PhantomData,
        })
    }

    #[must_use]
    pub fn header(&self) -> Header {
        // SAFETY: The handle always refers to a region starting with a header
        unsafe { self.base.as_ptr().cast::<Header>().read_unaligned() }
    }

    /// Start of the region, for memory reservation.
    #[must_use]
    pub const fn base_pointer(&self) -> NonNull<u8> {
        self.base
    }

    /// Total bytes the database may occupy, for memory reservation.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.header().max_size
    }

    fn read_u32(&self, offset: usize) -> Result<u32, FwdbError> {
        match offset.checked_add(SIZE_FIELD) {
            // SAFETY: The four bytes lie inside the region
            Some(end) if end <= self.limit => Ok(unsafe {
                self.base.as_ptr().add(offset).cast::<u32>().read_unaligned()
            }),
            _ => Err(FwdbError::Corrupted),
        }
    }

    /// Name bytes of the entry at `offset`, without the NUL.
    fn entry_name(&self, offset: usize, size: usize) -> Result<&[u8], FwdbError> {
        let start = offset + SIZE_FIELD;
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= self.limit && end > start)
            .ok_or(FwdbError::Corrupted)?;
        // SAFETY: [start, end) lies inside the region and names are never
        // rewritten after the entry is appended
        let bytes = unsafe { slice::from_raw_parts(self.base.as_ptr().add(start), end - start) };
        let nul = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or(FwdbError::Corrupted)?;
        Ok(&bytes[..nul])
    }

    fn entry_at(&self, offset: usize, len: usize) -> Entry<'a> {
        // SAFETY: offset is inside the region, so the pointer is non-null
        let ptr = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) };
        Entry {
            ptr,
            len,
            _db: PhantomData,
        }
    }

    fn first_entry(&self) -> usize {
        self.header().header_size as usize
    }

    fn find(&self, name: &[u8]) -> Result<Lookup<'a>, FwdbError> {
        let mut offset = self.first_entry();
        loop {
            let size = self.read_u32(offset)? as usize;
            if size == 0 {
                return Ok(Lookup::Missing { end: offset });
            }

            let stored = self.entry_name(offset, size)?;
            if stored == name {
                let data = format::data_offset(stored.len());
                let len = size.checked_sub(data).ok_or(FwdbError::Corrupted)?;
                return Ok(Lookup::Found(self.entry_at(offset + data, len)));
            }

            offset = format::align_entry(offset + size);
        }
    }

    fn append(
        &mut self,
        end: usize,
        name: &str,
        size: usize,
        init: Option<&[u8]>,
    ) -> Result<Entry<'a>, FwdbError> {
        if let Some(data) = init
            && data.len() != size
        {
            return Err(FwdbError::SizeMismatch {
                expected: size,
                actual: data.len(),
            });
        }

        let data_offset = format::data_offset(name.len());
        let entry_size = data_offset
            .checked_add(size)
            .filter(|&s| s <= u32::MAX as usize)
            .ok_or(FwdbError::DatabaseFull)?;
        let new_end = end
            .checked_add(entry_size)
            .filter(|&e| e <= self.limit)
            .map(|e| format::align_entry(e).saturating_add(SIZE_FIELD));

        let Some(new_end) = new_end.filter(|&e| e <= self.limit) else {
            log::warn!("Not enough room to add {} to the fwdb", name);
            return Err(FwdbError::DatabaseFull);
        };

        // SAFETY: [end, new_end) lies inside the region, checked above
        unsafe {
            let entry = self.base.as_ptr().add(end);
            entry.cast::<u32>().write_unaligned(entry_size as u32);

            let name_ptr = entry.add(SIZE_FIELD);
            ptr::copy_nonoverlapping(name.as_ptr(), name_ptr, name.len());
            ptr::write_bytes(
                name_ptr.add(name.len()),
                0,
                data_offset - SIZE_FIELD - name.len(),
            );

            let data = entry.add(data_offset);
            match init {
                Some(bytes) => ptr::copy(bytes.as_ptr(), data, size),
                None => ptr::write_bytes(data, 0, size),
            }

            self.base
                .as_ptr()
                .add(new_end - SIZE_FIELD)
                .cast::<u32>()
                .write_unaligned(0);
        }

        log::debug!("fwdb: added {} ({} bytes)", name, size);
        Ok(self.entry_at(end + data_offset, size))
    }

    /// Read or create the entry called `name`.
    pub fn access(&mut self, name: &str, access: Access<'_>) -> Result<Entry<'a>, FwdbError> {
        if !format::is_valid_name(name) {
            return Err(FwdbError::InvalidName);
        }

        match (self.find(name.as_bytes())?, access) {
            (Lookup::Found(entry), Access::Read { expected }) => {
                if let Some(expected) = expected {
                    entry.expect_len(expected)?;
                }
                Ok(entry)
            }
            (Lookup::Found(_), Access::Create { .. }) => {
                log::warn!("An fwdb entry named {} already exists", name);
                Err(FwdbError::NameAlreadyExists)
            }
            (Lookup::Missing { .. }, Access::Read { .. }) => {
                log::debug!("fwdb entry {} not found", name);
                Err(FwdbError::EntryNotFound)
            }
            (Lookup::Missing { end }, Access::Create { size, init }) => {
                self.append(end, name, size, init)
            }
        }
    }

    /// Look up `name` without the possibility of creating it.
    pub fn read(&self, name: &str, expected: Option<usize>) -> Result<Entry<'a>, FwdbError> {
        if !format::is_valid_name(name) {
            return Err(FwdbError::InvalidName);
        }
        match self.find(name.as_bytes())? {
            Lookup::Found(entry) => {
                if let Some(expected) = expected {
                    entry.expect_len(expected)?;
                }
                Ok(entry)
            }
            Lookup::Missing { .. } => Err(FwdbError::EntryNotFound),
        }
    }

    /// Return the entry called `name`, appending it first if it is missing.
    ///
    /// An existing entry must already be `size` bytes long; its contents are
    /// left as they are.
    pub fn read_or_create(
        &mut self,
        name: &str,
        size: usize,
        init: Option<&[u8]>,
    ) -> Result<Entry<'a>, FwdbError> {
        if !format::is_valid_name(name) {
            return Err(FwdbError::InvalidName);
        }
        match self.find(name.as_bytes())? {
            Lookup::Found(entry) => {
                entry.expect_len(size)?;
                Ok(entry)
            }
            Lookup::Missing { end } => self.append(end, name, size, init),
        }
    }

    /// Walk the whole structure checking it can be parsed.
    pub fn verify(&self) -> Result<(), FwdbError> {
        if self.limit < MIN_DB_SIZE {
            return Err(FwdbError::Corrupted);
        }

        let header = self.header();
        if !header.is_compatible() {
            let major = header.major_version;
            log::error!("fwdb signature or version ({}) not recognised", major);
            return Err(FwdbError::Corrupted);
        }
        let index_ptr = header.index_ptr;
        if index_ptr != 0 {
            log::warn!("Ignoring fwdb index structure at {:#x}", index_ptr);
        }
        if (header.header_size as usize) < HEADER_SIZE {
            return Err(FwdbError::Corrupted);
        }

        let end = self.used()?;
        let max_size = header.max_size as usize;
        if end > max_size {
            log::error!("fwdb takes {} bytes, which is more than {}", end, max_size);
            return Err(FwdbError::Corrupted);
        }
        Ok(())
    }

    /// Bytes in use, header and terminator included.
    pub fn used(&self) -> Result<usize, FwdbError> {
        let mut offset = self.first_entry();
        loop {
            let size = self.read_u32(offset)? as usize;
            if size == 0 {
                return Ok(offset + SIZE_FIELD);
            }
            let name = self.entry_name(offset, size)?;
            if format::data_offset(name.len()) > size {
                return Err(FwdbError::Corrupted);
            }
            offset = format::align_entry(offset + size);
        }
    }

    /// Iterate over `(name, entry)` pairs in insertion order.
    ///
    /// Iteration stops quietly at the first malformed entry.
    #[must_use]
    pub fn entries(&self) -> Entries<'_, 'a> {
        Entries {
            db: self,
            offset: Some(self.first_entry()),
        }
    }
}

/// Iterator returned by [`Fwdb::entries`].
pub struct Entries<'d, 'a> {
    db: &'d Fwdb<'a>,
    offset: Option<usize>,
}

impl<'d, 'a> Iterator for Entries<'d, 'a> {
    type Item = (&'d str, Entry<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offset.take()?;
        let size = self.db.read_u32(offset).ok()? as usize;
        if size == 0 {
            return None;
        }
        let raw = self.db.entry_name(offset, size).ok()?;
        let data = format::data_offset(raw.len());
        let len = size.checked_sub(data)?;
        let name = core::str::from_utf8(raw).unwrap_or("<non-utf8>");

        self.offset = Some(format::align_entry(offset + size));
        Some((name, self.db.entry_at(offset + data, len)))
    }
}
