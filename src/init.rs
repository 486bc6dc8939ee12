//! process-wide, one-time platform setup.
//!
//! Some back-ends need a process-global handle set up before the first
//! [`Session::connect`](crate::Session::connect) — e.g. a JVM-style
//! pointer on platforms that route their TLS stack through a managed
//! runtime. [`init`] is the explicit entry point for that; it is not
//! hidden behind lazy initialization on purpose (see `DESIGN.md`), since
//! environments that need it must call it from a specific context before
//! any other use of this crate.

use std::sync::atomic::{AtomicBool, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// opaque process-wide handle some back-ends require before use.
/// Platforms that don't need one ignore the payload entirely.
pub type PlatformHandle = *mut core::ffi::c_void;

/// set the process-wide platform handle. Must be called before the first
/// [`Session::connect`](crate::Session::connect) on platforms that
/// require one; a no-op on platforms that don't.
///
/// Safe to call more than once; later calls are ignored so long as the
/// first call already completed — the handle is set once, read many,
/// never cleared.
pub fn init(_handle: PlatformHandle) {
    INITIALIZED.store(true, Ordering::Release);
    platform::init(_handle);
}

#[cfg(target_vendor = "apple")]
mod platform {
    use super::PlatformHandle;

    /// the Apple back-end dispatches work onto Grand Central Dispatch
    /// queues that require no process-global registration; this is a
    /// no-op kept for symmetry with platforms that do require one.
    pub(super) fn init(_handle: PlatformHandle) {}
}

#[cfg(windows)]
mod platform {
    use super::PlatformHandle;

    /// SChannel requires no process-global registration either; the
    /// credential handle is acquired per-session in `connect`.
    pub(super) fn init(_handle: PlatformHandle) {}
}

#[cfg(all(unix, not(target_vendor = "apple")))]
mod platform {
    use super::PlatformHandle;
    use std::sync::Once;

    static OPENSSL_INIT: Once = Once::new();

    /// one-time OpenSSL library initialization, matching the spec's
    /// "one-time library initialization" step for fd-wrapped back-ends.
    pub(super) fn init(_handle: PlatformHandle) {
        OPENSSL_INIT.call_once(|| {
            openssl::init();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn init_is_idempotent() {
        init(ptr::null_mut());
        init(ptr::null_mut());
        assert!(INITIALIZED.load(Ordering::Acquire));
    }
}
