//! the three polymorphic back-end drivers, selected at compile time by
//! target platform (mirrors how `xitca_tls` selects its `rustls`/
//! `openssl` modules by Cargo feature — here the discriminant is the
//! platform, because the spec ties each back-end to a specific OS).

use crate::error::BackendFault;
use crate::queue::PacketQueue;
use crate::state::State;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use self::windows::WindowsDriver as PlatformDriver;

#[cfg(target_vendor = "apple")]
mod apple;
#[cfg(target_vendor = "apple")]
pub use self::apple::AppleDriver as PlatformDriver;

#[cfg(all(unix, not(target_vendor = "apple")))]
mod unix;
#[cfg(all(unix, not(target_vendor = "apple")))]
pub use self::unix::UnixDriver as PlatformDriver;

/// the three effective methods every back-end hides behind, per the
/// design's "Back-End Driver" component: drive the handshake forward,
/// drain any available ciphertext into the packet queue, and encrypt and
/// send outgoing bytes.
///
/// `process` below corresponds to the combination of drive-handshake and
/// drain steps; whichever applies is determined by the back-end's current
/// internal state (still-handshaking vs. already-connected).
pub trait Driver: Sized {
    /// construct the driver and kick off the platform connect/handshake
    /// sequence described in the design's `connect` operation. Returns
    /// the initial state (normally `PENDING`, or a terminal error if
    /// setup itself failed).
    fn connect(hostname: &str, port: u16, queue: &PacketQueue) -> (Self, State);

    /// advance the connection by one tick. Never blocks.
    fn process(&mut self, queue: &PacketQueue) -> State;

    /// encrypt and transmit `buf` as one or more TLS records. Returns
    /// `Ok(())` on success; an error demotes the session to a terminal
    /// state via the caller.
    fn send(&mut self, buf: &[u8]) -> Result<(), BackendFault>;

    /// idempotent teardown; safe to call from any state including after
    /// a previous disconnect.
    fn disconnect(&mut self);
}
