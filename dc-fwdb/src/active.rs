//! Active Database
//!
//! Each boot stage works with exactly one database. It is installed once,
//! either by creating it (the producing side) or by adopting the one the
//! previous stage left behind (the consuming side), and every later lookup in
//! the stage goes through it. A second installation fails with
//! [`FwdbError::AlreadyActive`].

use core::ptr::NonNull;

use spin::Mutex;

use crate::db::{Access, Entry, Fwdb};
use crate::error::FwdbError;

static ACTIVE: Mutex<Option<Fwdb<'static>>> = Mutex::new(None);

/// Make `db` the active database for this stage.
pub fn install(db: Fwdb<'static>) -> Result<(), FwdbError> {
    let mut active = ACTIVE.lock();
    if active.is_some() {
        return Err(FwdbError::AlreadyActive);
    }
    log::info!(
        "fwdb active at {:#x} ({} bytes)",
        db.base_pointer().as_ptr() as usize,
        db.capacity()
    );
    *active = Some(db);
    Ok(())
}

/// Create a database at `base` and make it active.
///
/// # Safety
/// See [`Fwdb::create_at`].
pub unsafe fn create(base: NonNull<u8>, size: u32) -> Result<(), FwdbError> {
    if is_active() {
        return Err(FwdbError::AlreadyActive);
    }
    // SAFETY: Forwarded from the caller
    let db = unsafe { Fwdb::create_at(base, size)? };
    install(db)
}

/// Adopt the database at `base` and make it active.
///
/// # Safety
/// See [`Fwdb::adopt`].
pub unsafe fn adopt(base: NonNull<u8>) -> Result<(), FwdbError> {
    // SAFETY: Forwarded from the caller
    install(unsafe { Fwdb::adopt(base) })
}

#[must_use]
pub fn is_active() -> bool {
    ACTIVE.lock().is_some()
}

/// Run `f` against the active database.
pub fn with<R>(f: impl FnOnce(&mut Fwdb<'static>) -> R) -> Result<R, FwdbError> {
    let mut active = ACTIVE.lock();
    let db = active.as_mut().ok_or(FwdbError::NoActiveDatabase)?;
    Ok(f(db))
}

/// [`Fwdb::access`] on the active database.
pub fn access(name: &str, access: Access<'_>) -> Result<Entry<'static>, FwdbError> {
    with(|db| db.access(name, access))?
}

/// [`Fwdb::read`] on the active database.
pub fn read(name: &str, expected: Option<usize>) -> Result<Entry<'static>, FwdbError> {
    with(|db| db.read(name, expected))?
}

/// [`Fwdb::read_or_create`] on the active database.
pub fn read_or_create(
    name: &str,
    size: usize,
    init: Option<&[u8]>,
) -> Result<Entry<'static>, FwdbError> {
    with(|db| db.read_or_create(name, size, init))?
}

/// Base of the active database, if there is one.
#[must_use]
pub fn base_pointer() -> Option<NonNull<u8>> {
    with(|db| db.base_pointer()).ok()
}

/// Capacity of the active database, or 0 when none is active.
#[must_use]
pub fn capacity() -> u32 {
    with(|db| db.capacity()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::boxed::Box;
    use std::vec;

    // The active database is process-wide, so its whole lifecycle is covered
    // by this single test.
    #[test]
    fn test_active_lifecycle() {
        assert!(!is_active());
        assert_eq!(capacity(), 0);
        assert!(base_pointer().is_none());
        assert_eq!(read("missing", None).unwrap_err(), FwdbError::NoActiveDatabase);

        let region: &'static mut [u8] = Box::leak(vec![0u8; 256].into_boxed_slice());
        let base = NonNull::from(&mut *region).cast::<u8>();
        let db = Fwdb::create(region).unwrap();
        install(db).unwrap();

        assert!(is_active());
        assert_eq!(capacity(), 256);
        assert_eq!(base_pointer(), Some(base));

        access("gpio.recovery", Access::create_from(&[1])).unwrap();
        assert_eq!(read("gpio.recovery", Some(1)).unwrap().read_u8().unwrap(), 1);
        assert_eq!(read_or_create("gpio.recovery", 1, None).unwrap().read_u8().unwrap(), 1);

        // SAFETY: base points at the database installed above
        assert_eq!(unsafe { adopt(base) }.unwrap_err(), FwdbError::AlreadyActive);
        // SAFETY: rejected before the region is written
        assert_eq!(unsafe { create(base, 256) }.unwrap_err(), FwdbError::AlreadyActive);
        assert_eq!(access("gpio.recovery", Access::read()).unwrap().len(), 1);
    }
}
