//! async-callback back-end: Apple's Network framework (`nw_connection_t`).
//!
//! No published crate wraps `Network.framework`'s connection API, so this
//! module declares the narrow `extern "C"` surface it needs itself — the
//! same pattern `schannel`'s and `security-framework`'s own `-sys` layers
//! take for undocumented or C-only platform APIs. The real `dispatch`
//! crate supplies the serial Grand Central Dispatch queue the framework
//! requires, and `block2` supplies the C block closures its callback-based
//! API expects in place of function pointers.
//!
//! Unlike the other two back-ends, nothing here is polled: `process`
//! never calls into the framework directly. It only reads the state the
//! receive/state-change callbacks have already written, matching the
//! spec's "not polled" note on this back-end's drain step.

use std::ffi::{c_void, CString};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI8, AtomicUsize, Ordering};
use std::sync::Arc;

use block2::RcBlock;
use dispatch::Queue;

use crate::backend::Driver;
use crate::error::BackendFault;
use crate::queue::{Packet, PacketQueue};
use crate::state::State;

#[allow(non_camel_case_types)]
mod ffi {
    use std::ffi::c_void;

    pub type nw_endpoint_t = *mut c_void;
    pub type nw_parameters_t = *mut c_void;
    pub type nw_connection_t = *mut c_void;
    pub type nw_connection_state_t = isize;
    pub type nw_error_t = *mut c_void;
    pub type nw_content_context_t = *mut c_void;
    pub type dispatch_data_t = *mut c_void;
    pub type dispatch_queue_t = *mut c_void;

    pub const NW_CONNECTION_STATE_INVALID: nw_connection_state_t = 0;
    pub const NW_CONNECTION_STATE_WAITING: nw_connection_state_t = 1;
    pub const NW_CONNECTION_STATE_PREPARING: nw_connection_state_t = 2;
    pub const NW_CONNECTION_STATE_READY: nw_connection_state_t = 3;
    pub const NW_CONNECTION_STATE_FAILED: nw_connection_state_t = 4;
    pub const NW_CONNECTION_STATE_CANCELLED: nw_connection_state_t = 5;

    extern "C" {
        pub fn nw_endpoint_create_host(hostname: *const i8, port: *const i8) -> nw_endpoint_t;
        pub fn nw_parameters_create_secure_tcp(
            configure_tls: *mut c_void,
            configure_tcp: *mut c_void,
        ) -> nw_parameters_t;
        pub fn nw_connection_create(endpoint: nw_endpoint_t, parameters: nw_parameters_t) -> nw_connection_t;
        pub fn nw_connection_set_queue(connection: nw_connection_t, queue: dispatch_queue_t);
        pub fn nw_connection_set_state_changed_handler(connection: nw_connection_t, handler: *mut c_void);
        pub fn nw_connection_start(connection: nw_connection_t);
        pub fn nw_connection_cancel(connection: nw_connection_t);
        pub fn nw_connection_receive(
            connection: nw_connection_t,
            min_incomplete_length: u32,
            max_length: u32,
            handler: *mut c_void,
        );
        pub fn nw_connection_send(
            connection: nw_connection_t,
            content: dispatch_data_t,
            context: nw_content_context_t,
            is_complete: bool,
            handler: *mut c_void,
        );
        pub fn nw_release(object: *mut c_void);
        pub fn nw_retain(object: *mut c_void);

        /// wraps `buffer[..size]` as a `dispatch_data_t`. Passing
        /// `&_dispatch_data_destructor_default` as `destructor` (the exact
        /// address-of-global-symbol idiom `DISPATCH_DATA_DESTRUCTOR_DEFAULT`
        /// expands to in `<dispatch/data.h>`) tells libdispatch to copy
        /// `buffer` into storage it owns before returning, so the caller's
        /// buffer may be freed immediately after this call.
        pub fn dispatch_data_create(
            buffer: *const u8,
            size: usize,
            queue: dispatch_queue_t,
            destructor: *const c_void,
        ) -> dispatch_data_t;

        /// maps `data` onto a contiguous region and returns a new
        /// dispatch_data_t owning that mapping; `buffer_ptr`/`size_ptr` are
        /// valid for as long as the returned object is retained. The caller
        /// must `dispatch_release` the returned object once it has copied
        /// out what it needs.
        pub fn dispatch_data_create_map(
            data: dispatch_data_t,
            buffer_ptr: *mut *const c_void,
            size_ptr: *mut usize,
        ) -> dispatch_data_t;

        pub fn dispatch_release(object: *mut c_void);

        /// global symbol backing the `DISPATCH_DATA_DESTRUCTOR_DEFAULT`
        /// macro; never called directly, only referenced by address.
        static _dispatch_data_destructor_default: *const c_void;
    }
}

struct Shared {
    /// extra reference held per outstanding callback, per the design's
    /// "repost/disconnect race" discipline: each posted receive acquires
    /// one before the callback fires and releases it on completion,
    /// independent of how many `Arc` clones exist.
    refcount: AtomicUsize,
    disconnecting: std::sync::atomic::AtomicBool,
    state: AtomicI8,
    queue: PacketQueue,
}

/// owns the `nw_connection_t` and its Grand Central Dispatch queue.
///
/// `connection` is only ever touched from the caller's `connect`/`send`/
/// `disconnect` calls and from callbacks running on `gcd_queue`, which is
/// the one real concurrency boundary in this crate (see the design's
/// concurrency model).
pub struct AppleDriver {
    /// `None` once connection setup itself failed (nothing to release) or
    /// after `disconnect` has already torn the connection down once.
    connection: Option<NonNull<c_void>>,
    #[allow(dead_code)]
    gcd_queue: Queue,
    shared: Arc<Shared>,
    // retained so the block outlives every posted callback; dropped on disconnect.
    #[allow(dead_code)]
    state_handler: Option<RcBlock<dyn Fn(ffi::nw_connection_state_t, ffi::nw_error_t)>>,
    /// guards `disconnect` against a second invocation — `Session::disconnect`
    /// and `Session`'s own `Drop` both call it, so this must be idempotent.
    torn_down: bool,
}

unsafe impl Send for AppleDriver {}

impl AppleDriver {
    fn post_receive(connection: ffi::nw_connection_t, shared: Arc<Shared>) {
        shared.refcount.fetch_add(1, Ordering::AcqRel);

        let handler_shared = shared.clone();
        let handler = RcBlock::new(
            move |content: ffi::dispatch_data_t, _context: ffi::nw_content_context_t, is_complete: bool, error: ffi::nw_error_t| {
                let disconnecting = handler_shared.disconnecting.load(Ordering::Acquire);

                if !error.is_null() {
                    if !disconnecting {
                        handler_shared.state.store(State::UnknownError.code(), Ordering::Release);
                    }
                    handler_shared.refcount.fetch_sub(1, Ordering::AcqRel);
                    return;
                }

                if disconnecting {
                    handler_shared.refcount.fetch_sub(1, Ordering::AcqRel);
                    return;
                }

                if !content.is_null() {
                    // the framework hands us a dispatch_data_t; copying its
                    // bytes into an owned buffer is the crate's only
                    // allocation point on this path.
                    let bytes = unsafe { copy_dispatch_data(content) };
                    if !bytes.is_empty() {
                        handler_shared.queue.push(Packet::new(bytes.into_boxed_slice()));
                    }
                }

                if is_complete {
                    let next = if handler_shared.queue.is_empty() {
                        State::Disconnected
                    } else {
                        State::DisconnectedDraining
                    };
                    handler_shared.state.store(next.code(), Ordering::Release);
                } else {
                    Self::post_receive(connection, handler_shared.clone());
                }

                handler_shared.refcount.fetch_sub(1, Ordering::AcqRel);
            },
        );

        unsafe {
            ffi::nw_connection_receive(connection, 1, u32::MAX, &*handler as *const _ as *mut c_void);
        }
    }
}

impl Driver for AppleDriver {
    fn connect(hostname: &str, port: u16, _queue: &PacketQueue) -> (Self, State) {
        crate::init::init(std::ptr::null_mut());

        let shared = Arc::new(Shared {
            refcount: AtomicUsize::new(1),
            disconnecting: std::sync::atomic::AtomicBool::new(false),
            state: AtomicI8::new(State::Pending.code()),
            queue: PacketQueue::new(crate::queue::DEFAULT_QUEUE_CAPACITY),
        });

        let host_c = match CString::new(hostname) {
            Ok(c) => c,
            Err(_) => return (Self::failed(shared), State::BadHostname),
        };
        let port_c = match CString::new(port.to_string()) {
            Ok(c) => c,
            Err(_) => return (Self::failed(shared), State::UnknownError),
        };

        let gcd_queue = Queue::create("tls-session.nw_connection", dispatch::QueueAttribute::Serial);

        let connection = unsafe {
            // default protocol stack, TLS-configured parameters; client
            // credentials and custom trust anchors are out of scope so the
            // TLS/TCP configure callbacks are left null (framework defaults).
            let endpoint = ffi::nw_endpoint_create_host(host_c.as_ptr(), port_c.as_ptr());
            let parameters = ffi::nw_parameters_create_secure_tcp(std::ptr::null_mut(), std::ptr::null_mut());
            ffi::nw_connection_create(endpoint, parameters)
        };

        let Some(connection) = NonNull::new(connection) else {
            return (Self::failed(shared), State::UnknownError);
        };

        let state_shared = shared.clone();
        let state_handler = RcBlock::new(move |new_state: ffi::nw_connection_state_t, error: ffi::nw_error_t| {
            use ffi::*;
            let mapped = match new_state {
                NW_CONNECTION_STATE_READY => Some(State::Connected),
                NW_CONNECTION_STATE_FAILED => Some(if error.is_null() { State::UnknownError } else { State::UnknownError }),
                NW_CONNECTION_STATE_CANCELLED => Some(State::Disconnected),
                _ => None,
            };
            if let Some(state) = mapped {
                state_shared.state.store(state.code(), Ordering::Release);
            }
        });

        unsafe {
            ffi::nw_connection_set_queue(connection.as_ptr(), gcd_queue.ptr() as ffi::dispatch_queue_t);
            ffi::nw_connection_set_state_changed_handler(connection.as_ptr(), &*state_handler as *const _ as *mut c_void);
            ffi::nw_connection_start(connection.as_ptr());
        }

        Self::post_receive(connection.as_ptr(), shared.clone());

        let driver = Self {
            connection: Some(connection),
            gcd_queue,
            shared,
            state_handler: Some(state_handler),
            torn_down: false,
        };
        (driver, State::Pending)
    }

    fn process(&mut self, _queue: &PacketQueue) -> State {
        // nothing to drive: the state-change and receive callbacks already
        // wrote the current state from the dispatch queue.
        State::from_code(self.shared.state.load(Ordering::Acquire))
    }

    fn send(&mut self, buf: &[u8]) -> Result<(), BackendFault> {
        if self.shared.state.load(Ordering::Acquire) != State::Connected.code() {
            return Err(BackendFault::Socket(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "tls session not established",
            )));
        }

        // dispatch_data_create copies `owned` synchronously (it is handed
        // DISPATCH_DATA_DESTRUCTOR_DEFAULT, not a custom destructor block),
        // so `owned` can be dropped the moment this call returns; completion
        // promotes any error into the session's error state rather than
        // returning it synchronously, matching the design's async-callback
        // send path.
        let owned = buf.to_vec();
        let content = unsafe { wrap_dispatch_data(&owned) };

        let Some(connection) = self.connection else {
            return Err(BackendFault::Socket(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "tls session not established",
            )));
        };

        let shared = self.shared.clone_shared();
        let handler = RcBlock::new(move |error: ffi::nw_error_t| {
            if !error.is_null() {
                shared.state.store(State::UnknownError.code(), Ordering::Release);
            }
        });

        unsafe {
            ffi::nw_connection_send(
                connection.as_ptr(),
                content,
                std::ptr::null_mut(),
                true,
                &*handler as *const _ as *mut c_void,
            );
        }

        Ok(())
    }

    fn disconnect(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.shared.disconnecting.store(true, Ordering::Release);
        if let Some(connection) = self.connection.take() {
            unsafe {
                ffi::nw_connection_cancel(connection.as_ptr());
                ffi::nw_release(connection.as_ptr());
            }
        }
        // the owner's reference is released here; the last outstanding
        // callback (tracked by `refcount`) performs no further queue or
        // state mutation once `disconnecting` is observed, so the queue
        // drains safely regardless of in-flight callbacks.
        self.shared.queue.clear();
    }
}

impl AppleDriver {
    fn failed(shared: Arc<Shared>) -> Self {
        shared.state.store(State::UnknownError.code(), Ordering::Release);
        Self {
            connection: None,
            gcd_queue: Queue::create("tls-session.nw_connection.failed", dispatch::QueueAttribute::Serial),
            shared,
            state_handler: None,
            torn_down: false,
        }
    }
}

impl Shared {
    fn clone_shared(self: &Arc<Self>) -> Arc<Self> {
        Arc::clone(self)
    }
}

/// copy the bytes out of a `dispatch_data_t` the framework handed us.
///
/// # Safety
/// `data` must be a valid, non-consumed `dispatch_data_t` for the duration
/// of the call.
unsafe fn copy_dispatch_data(data: ffi::dispatch_data_t) -> Vec<u8> {
    if data.is_null() {
        return Vec::new();
    }
    let mut buffer: *const c_void = std::ptr::null();
    let mut size: usize = 0;
    let mapped = ffi::dispatch_data_create_map(data, &mut buffer, &mut size);
    if mapped.is_null() || buffer.is_null() || size == 0 {
        return Vec::new();
    }
    let bytes = std::slice::from_raw_parts(buffer as *const u8, size).to_vec();
    ffi::dispatch_release(mapped);
    bytes
}

/// wrap a buffer as a `dispatch_data_t`. `DISPATCH_DATA_DESTRUCTOR_DEFAULT`
/// makes libdispatch copy `buf` into storage it owns before this call
/// returns, so the caller keeps ownership of `buf` and may drop it
/// immediately afterward.
///
/// # Safety
/// the returned handle must be sent to exactly one `nw_connection_send`
/// call, which consumes it.
unsafe fn wrap_dispatch_data(buf: &[u8]) -> ffi::dispatch_data_t {
    if buf.is_empty() {
        return std::ptr::null_mut();
    }
    ffi::dispatch_data_create(
        buf.as_ptr(),
        buf.len(),
        std::ptr::null_mut(),
        std::ptr::addr_of!(ffi::_dispatch_data_destructor_default) as *const c_void,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_round_trip_through_the_shared_atomic() {
        let shared = Shared {
            refcount: AtomicUsize::new(1),
            disconnecting: std::sync::atomic::AtomicBool::new(false),
            state: AtomicI8::new(State::Pending.code()),
            queue: PacketQueue::new(4),
        };
        shared.state.store(State::Connected.code(), Ordering::Release);
        assert_eq!(shared.state.load(Ordering::Acquire), State::Connected.code());
    }

    #[test]
    fn disconnect_is_idempotent_with_no_live_connection() {
        let shared = Arc::new(Shared {
            refcount: AtomicUsize::new(1),
            disconnecting: std::sync::atomic::AtomicBool::new(false),
            state: AtomicI8::new(State::Connected.code()),
            queue: PacketQueue::new(4),
        });
        let mut driver = AppleDriver::failed(shared);

        // `failed` drivers never held a live `nw_connection_t`; calling
        // disconnect twice must not attempt to release it a second time.
        driver.disconnect();
        driver.disconnect();

        assert!(driver.torn_down);
        assert!(driver.connection.is_none());
    }
}
