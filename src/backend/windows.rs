//! record-oriented back-end: Windows SChannel over a raw, non-blocking
//! socket.
//!
//! `schannel`'s `tls_stream::Builder::connect` mirrors `native-tls`'s
//! resumable-handshake shape (`HandshakeError::Interrupted` holding a
//! `MidHandshakeTlsStream`), the same pattern this crate's OpenSSL
//! back-end resumes via `MidHandshakeSslStream` — see
//! [`super::unix`]. Each `process()` tick performs one resume attempt;
//! SChannel's own incoming-buffer compaction and record-size negotiation
//! happen inside the crate, so this driver only needs to drive the
//! handshake/read/write surface, not the raw `AcquireCredentialsHandle`/
//! `InitializeSecurityContext` calls directly.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use schannel::schannel_cred::{Direction, Protocol, SchannelCred};
use schannel::tls_stream::{Builder, HandshakeError, MidHandshakeTlsStream, TlsStream};
use socket2::Socket;

use crate::backend::Driver;
use crate::error::BackendFault;
use crate::net;
use crate::queue::{Packet, PacketQueue, MAX_PACKET_SIZE};
use crate::state::State;

enum Handshake {
    TcpPending(Socket, String),
    Tls(MidHandshakeTlsStream<TcpStream>),
    Done(TlsStream<TcpStream>),
    Failed,
}

pub struct WindowsDriver {
    handshake: Handshake,
    scratch: Box<[u8]>,
}

impl WindowsDriver {
    fn fail(&mut self, fault: BackendFault) -> State {
        self.handshake = Handshake::Failed;
        fault.into_state()
    }

    fn drain(stream: &mut TlsStream<TcpStream>, scratch: &mut [u8], queue: &PacketQueue) -> Result<bool, BackendFault> {
        let mut peer_closed = false;
        let mut accumulated = 0usize;
        loop {
            match stream.read(&mut scratch[accumulated..]) {
                Ok(0) => {
                    peer_closed = true;
                    break;
                }
                Ok(n) => {
                    accumulated += n;
                    if accumulated == scratch.len() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        if accumulated > 0 {
            queue.push(Packet::new(scratch[..accumulated].to_vec().into_boxed_slice()));
        }
        Ok(peer_closed)
    }
}

impl Driver for WindowsDriver {
    fn connect(hostname: &str, port: u16, _queue: &PacketQueue) -> (Self, State) {
        let addr = match net::resolve(hostname, port) {
            Ok(addr) => addr,
            Err(fault) => {
                return (
                    Self { handshake: Handshake::Failed, scratch: vec![0u8; MAX_PACKET_SIZE].into_boxed_slice() },
                    fault.into_state(),
                )
            }
        };

        crate::init::init(std::ptr::null_mut());

        let socket = match net::connect_nonblocking(addr) {
            Ok(s) => s,
            Err(fault) => {
                return (
                    Self { handshake: Handshake::Failed, scratch: vec![0u8; MAX_PACKET_SIZE].into_boxed_slice() },
                    fault.into_state(),
                )
            }
        };

        let driver = Self {
            handshake: Handshake::TcpPending(socket, hostname.to_owned()),
            scratch: vec![0u8; MAX_PACKET_SIZE].into_boxed_slice(),
        };
        (driver, State::Pending)
    }

    fn process(&mut self, queue: &PacketQueue) -> State {
        loop {
            match std::mem::replace(&mut self.handshake, Handshake::Failed) {
                Handshake::Failed => return State::UnknownError,
                Handshake::TcpPending(socket, hostname) => {
                    let ready = match net::connect_ready(&socket) {
                        Ok(ready) => ready,
                        Err(fault) => return self.fail(fault),
                    };
                    if !ready {
                        self.handshake = Handshake::TcpPending(socket, hostname);
                        return State::Pending;
                    }

                    let stream = net::into_std(socket);

                    // TLS 1.2/1.3 only, strong crypto, automatic server
                    // validation, no client credentials.
                    let cred = match SchannelCred::builder()
                        .enabled_protocols(&[Protocol::Tls12, Protocol::Tls13])
                        .acquire(Direction::Outbound)
                    {
                        Ok(c) => c,
                        Err(e) => return self.fail(e.into()),
                    };

                    match Builder::new().domain(&hostname).connect(cred, stream) {
                        Ok(stream) => {
                            self.handshake = Handshake::Done(stream);
                            continue;
                        }
                        Err(HandshakeError::Interrupted(mid)) => {
                            self.handshake = Handshake::Tls(mid);
                            return State::Pending;
                        }
                        Err(HandshakeError::Failure(e)) => {
                            return self.fail(classify_io_error(e));
                        }
                    }
                }
                Handshake::Tls(mid) => match mid.handshake() {
                    Ok(stream) => {
                        self.handshake = Handshake::Done(stream);
                        continue;
                    }
                    Err(HandshakeError::Interrupted(mid)) => {
                        self.handshake = Handshake::Tls(mid);
                        return State::Pending;
                    }
                    Err(HandshakeError::Failure(e)) => {
                        return self.fail(classify_io_error(e));
                    }
                },
                Handshake::Done(mut stream) => match Self::drain(&mut stream, &mut self.scratch, queue) {
                    Ok(peer_closed) => {
                        self.handshake = Handshake::Done(stream);
                        if peer_closed {
                            return if queue.is_empty() { State::Disconnected } else { State::DisconnectedDraining };
                        }
                        return if queue.is_full() { State::PacketQueueFilled } else { State::Connected };
                    }
                    Err(fault) => return self.fail(fault),
                },
            }
        }
    }

    fn send(&mut self, buf: &[u8]) -> Result<(), BackendFault> {
        let Handshake::Done(stream) = &mut self.handshake else {
            return Err(BackendFault::Socket(io::Error::new(io::ErrorKind::NotConnected, "tls session not established")));
        };

        let mut written = 0;
        while written < buf.len() {
            match stream.write(&buf[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Handshake::Done(stream) = &mut self.handshake {
            let _ = stream.shutdown();
        }
        self.handshake = Handshake::Failed;
    }
}

fn classify_io_error(e: io::Error) -> BackendFault {
    let msg = e.to_string().to_ascii_lowercase();
    if msg.contains("expired") {
        return BackendFault::CertificateExpired;
    }
    if msg.contains("name") && msg.contains("cert") {
        return BackendFault::BadHostname;
    }
    if msg.contains("trust") || msg.contains("untrusted") || msg.contains("chain") {
        return BackendFault::CannotVerifyCaChain;
    }
    if msg.contains("cipher") || msg.contains("algorithm") {
        return BackendFault::NoMatchingEncryptionAlgorithms;
    }
    if msg.contains("cert") {
        return BackendFault::BadCertificate;
    }
    if msg.contains("renegotiat") {
        return BackendFault::RenegotiationRequested;
    }
    BackendFault::Socket(e)
}
