//! Debug Hooks
//!
//! Points in the boot flow where a developer build can attach a debugger or
//! fall back to a network boot. Production builds select [`NoDebugHooks`];
//! the `developer` feature selects [`DeveloperHooks`].

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub trait DebugHooks {
    /// Stop and wait for a debugger.
    fn gdb_enter(&self) {}

    /// Leave the debugger session with `exit_code`.
    fn gdb_exit(&self, _exit_code: i8) {}

    /// Boot the payload from the network instead of local storage.
    fn dev_netboot(&self) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDebugHooks;

impl DebugHooks for NoDebugHooks {}

/// Hooks that log each request and track the debugger session.
#[derive(Debug, Default)]
pub struct DeveloperHooks {
    in_session: AtomicBool,
    netboot_requests: AtomicU32,
}

impl DeveloperHooks {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            in_session: AtomicBool::new(false),
            netboot_requests: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn in_session(&self) -> bool {
        self.in_session.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn netboot_requests(&self) -> u32 {
        self.netboot_requests.load(Ordering::Acquire)
    }
}

impl DebugHooks for DeveloperHooks {
    fn gdb_enter(&self) {
        if self.in_session.swap(true, Ordering::AcqRel) {
            log::warn!("Debugger session already open");
            return;
        }
        log::info!("Waiting for debugger");
    }

    fn gdb_exit(&self, exit_code: i8) {
        if self.in_session.swap(false, Ordering::AcqRel) {
            log::info!("Debugger session closed ({})", exit_code);
        }
    }

    fn dev_netboot(&self) {
        self.netboot_requests.fetch_add(1, Ordering::AcqRel);
        log::info!("Network boot requested");
    }
}

#[cfg(feature = "developer")]
pub type ActiveHooks = DeveloperHooks;
#[cfg(not(feature = "developer"))]
pub type ActiveHooks = NoDebugHooks;

#[cfg(feature = "developer")]
static HOOKS: ActiveHooks = DeveloperHooks::new();
#[cfg(not(feature = "developer"))]
static HOOKS: ActiveHooks = NoDebugHooks;

/// Hooks selected for this build.
#[must_use]
pub fn hooks() -> &'static ActiveHooks {
    &HOOKS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_developer_hooks_track_session() {
        let hooks = DeveloperHooks::new();
        assert!(!hooks.in_session());

        hooks.gdb_enter();
        assert!(hooks.in_session());
        hooks.gdb_enter();
        assert!(hooks.in_session());

        hooks.gdb_exit(0);
        assert!(!hooks.in_session());

        hooks.dev_netboot();
        hooks.dev_netboot();
        assert_eq!(hooks.netboot_requests(), 2);
    }

    #[test]
    fn test_build_selects_hooks() {
        fn exercise(hooks: &dyn DebugHooks) {
            hooks.gdb_enter();
            hooks.gdb_exit(-1);
        }
        exercise(hooks());
        exercise(&NoDebugHooks);
    }
}
