//! back-end-native failure classification.
//!
//! Back-ends never hand a [`State`] directly to the state machine; they
//! classify whatever the platform library reported into a [`BackendFault`]
//! first, and the single [`BackendFault::into_state`] switch is the one
//! place the nine error kinds are assigned. This keeps the mapping table
//! in one spot instead of scattered across three back-end modules.

use core::fmt;

use tracing::warn;

use crate::State;

/// a back-end-native failure, pre-classified into the shape the mapper
/// switches on. Each back-end module is responsible for recognizing its
/// own platform error codes and producing one of these; see `§4.5` of the
/// design notes for the representative mapping table this type encodes.
#[derive(Debug)]
#[non_exhaustive]
pub enum BackendFault {
    /// certificate-expired family.
    CertificateExpired,
    /// hostname mismatch, wrong principal, or DNS no-such-host.
    BadHostname,
    /// untrusted root, peer-unknown-CA, or peer-unverified.
    CannotVerifyCaChain,
    /// algorithm mismatch, handshake negotiation failure, or no
    /// application protocol.
    NoMatchingEncryptionAlgorithms,
    /// certificate malformed, revoked, or of an unsupported type.
    BadCertificate,
    /// server demanded a client certificate.
    ClientCertRequested,
    /// server demanded renegotiation; unsupported by design.
    RenegotiationRequested,
    /// socket-level I/O failure.
    Socket(std::io::Error),
    /// incoming buffer filled to capacity while still handshaking.
    HandshakeOverflow,
    /// anything not recognized by a back-end's own classifier.
    Unknown(Box<dyn std::error::Error + Send + Sync>),
}

impl BackendFault {
    /// the one switch from a classified platform fault to the closed,
    /// nine-kind error taxonomy.
    pub fn into_state(self) -> State {
        match self {
            Self::CertificateExpired => State::CertificateExpired,
            Self::BadHostname => State::BadHostname,
            Self::CannotVerifyCaChain => State::CannotVerifyCaChain,
            Self::NoMatchingEncryptionAlgorithms => State::NoMatchingEncryptionAlgorithms,
            Self::BadCertificate => State::BadCertificate,
            Self::ClientCertRequested => State::ServerAskedForClientCerts,
            Self::RenegotiationRequested => {
                warn!("server requested renegotiation; unsupported by design");
                State::UnknownError
            }
            Self::Socket(ref e) => {
                warn!(error = %e, "socket-level failure");
                State::InvalidSocket
            }
            Self::HandshakeOverflow => {
                warn!("incoming buffer filled to capacity while still handshaking");
                State::UnknownError
            }
            Self::Unknown(ref e) => {
                warn!(error = %e, "unrecognized back-end fault, mapping to UnknownError");
                State::UnknownError
            }
        }
    }
}

impl fmt::Display for BackendFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for BackendFault {}

impl From<std::io::Error> for BackendFault {
    fn from(e: std::io::Error) -> Self {
        Self::Socket(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_into_documented_states() {
        assert_eq!(BackendFault::CertificateExpired.into_state(), State::CertificateExpired);
        assert_eq!(BackendFault::BadHostname.into_state(), State::BadHostname);
        assert_eq!(BackendFault::CannotVerifyCaChain.into_state(), State::CannotVerifyCaChain);
        assert_eq!(
            BackendFault::NoMatchingEncryptionAlgorithms.into_state(),
            State::NoMatchingEncryptionAlgorithms
        );
        assert_eq!(BackendFault::BadCertificate.into_state(), State::BadCertificate);
        assert_eq!(
            BackendFault::ClientCertRequested.into_state(),
            State::ServerAskedForClientCerts
        );
        assert_eq!(BackendFault::RenegotiationRequested.into_state(), State::UnknownError);
        assert_eq!(BackendFault::HandshakeOverflow.into_state(), State::UnknownError);
    }

    #[test]
    fn socket_errors_map_to_invalid_socket() {
        let fault: BackendFault = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert_eq!(fault.into_state(), State::InvalidSocket);
    }
}
