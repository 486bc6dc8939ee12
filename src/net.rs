//! address resolution and non-blocking socket setup shared by the
//! record-oriented and fd-wrapped back-ends.
//!
//! Resolution mirrors `xitca_client::resolver`'s
//! `(host, port).to_socket_addrs()` call, but synchronously: this crate
//! has no async runtime dependency, so there is no executor to spawn the
//! blocking lookup onto.

use std::io;
use std::net::{SocketAddr, TcpStream as StdTcpStream, ToSocketAddrs};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::BackendFault;

/// resolve `hostname:port` to a concrete address, family-agnostic:
/// whichever of IPv4/IPv6 the resolver returns first is used, and the
/// socket created from it matches that family rather than forcing IPv4
/// (see the open question resolved in `DESIGN.md`).
pub fn resolve(hostname: &str, port: u16) -> Result<SocketAddr, BackendFault> {
    (hostname, port)
        .to_socket_addrs()
        .map_err(BackendFault::from)?
        .next()
        .ok_or(BackendFault::BadHostname)
}

/// create a non-blocking socket matching `addr`'s family and start an
/// asynchronous `connect(2)`, tolerating the "would block / in progress"
/// sentinel. The in-progress state is reported as `Ok`; the caller
/// confirms completion later via [`connect_ready`].
pub fn connect_nonblocking(addr: SocketAddr) -> Result<Socket, BackendFault> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;

    match socket.connect(&addr.into()) {
        Ok(()) => Ok(socket),
        Err(e) if matches!(e.raw_os_error(), Some(libc_errno) if is_in_progress(libc_errno)) => Ok(socket),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(socket),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn is_in_progress(errno: i32) -> bool {
    errno == libc::EINPROGRESS
}

#[cfg(windows)]
fn is_in_progress(_errno: i32) -> bool {
    // socket2/std report WSAEWOULDBLOCK as io::ErrorKind::WouldBlock directly
    // on Windows, so the raw errno branch never needs to match here.
    false
}

/// poll writability with a zero-valued timeout and check the socket error
/// option, exactly as the spec's `PENDING -> PENDING` detection requires:
/// only report success when both indicate the connect finished cleanly.
pub fn connect_ready(socket: &Socket) -> Result<bool, BackendFault> {
    if !poll_writable_now(socket)? {
        return Ok(false);
    }
    match socket.take_error()? {
        Some(e) => Err(e.into()),
        None => Ok(true),
    }
}

#[cfg(unix)]
fn poll_writable_now(socket: &Socket) -> Result<bool, BackendFault> {
    use std::os::unix::io::AsRawFd;

    let mut pfd = libc::pollfd {
        fd: socket.as_raw_fd(),
        events: libc::POLLOUT,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
    if rc < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(rc > 0 && pfd.revents & libc::POLLOUT != 0)
}

#[cfg(windows)]
fn poll_writable_now(socket: &Socket) -> Result<bool, BackendFault> {
    use std::os::windows::io::AsRawSocket;
    use windows_sys::Win32::Networking::WinSock::{WSAPoll, POLLWRNORM, SOCKET_ERROR, WSAPOLLFD};

    let mut pfd = WSAPOLLFD {
        fd: socket.as_raw_socket() as usize,
        events: POLLWRNORM,
        revents: 0,
    };
    let rc = unsafe { WSAPoll(&mut pfd, 1, 0) };
    if rc == SOCKET_ERROR {
        return Err(io::Error::last_os_error().into());
    }
    Ok(rc > 0 && pfd.revents & POLLWRNORM != 0)
}

/// convert a [`socket2::Socket`] into a standard library [`TcpStream`],
/// for back-ends (OpenSSL, SChannel) whose driver crates operate on
/// `std`/raw-fd types rather than `socket2` directly.
pub fn into_std(socket: Socket) -> StdTcpStream {
    socket.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_localhost() {
        let addr = resolve("localhost", 443).expect("localhost must resolve");
        assert_eq!(addr.port(), 443);
    }

    #[test]
    fn resolve_unknown_host_is_bad_hostname_or_io_fault() {
        // a name that cannot resolve on any reasonable test network; either
        // outcome (resolver failure or empty result) maps to a BackendFault,
        // never panics.
        let result = resolve("this.host.does.not.exist.invalid", 443);
        assert!(result.is_err());
    }
}
