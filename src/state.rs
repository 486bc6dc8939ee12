//! the session's state variable.

use core::fmt;

/// the outcome of a [`process`](crate::Session::process) tick, also the
/// crate's sole error taxonomy: negative values are absorbing terminals.
///
/// Numeric layout is part of the public contract: callers may compare a
/// returned value directly against these constants without matching on the
/// enum, so the discriminants below must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum State {
    BadCertificate = -8,
    ServerAskedForClientCerts = -7,
    CertificateExpired = -6,
    BadHostname = -5,
    CannotVerifyCaChain = -4,
    NoMatchingEncryptionAlgorithms = -3,
    InvalidSocket = -2,
    UnknownError = -1,
    Disconnected = 0,
    DisconnectedDraining = 1,
    Pending = 2,
    Connected = 3,
    PacketQueueFilled = 4,
}

impl State {
    /// the raw numeric code, matching the layout documented in the crate's
    /// external interface.
    #[inline]
    pub const fn code(self) -> i8 {
        self as i8
    }

    /// `true` for the nine error kinds; once a session observes one of
    /// these it must never observe anything else.
    #[inline]
    pub const fn is_error(self) -> bool {
        (self as i8) < 0
    }

    /// `true` for states from which no further progress is possible:
    /// the errors, plus clean closure.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected) || self.is_error()
    }

    /// reconstruct a `State` from its stable numeric code, e.g. after
    /// round-tripping through an `AtomicI8` shared with a callback.
    /// Panics on a code outside the documented layout: that would mean a
    /// back-end wrote a value never assigned by this crate.
    pub const fn from_code(code: i8) -> Self {
        match code {
            -8 => Self::BadCertificate,
            -7 => Self::ServerAskedForClientCerts,
            -6 => Self::CertificateExpired,
            -5 => Self::BadHostname,
            -4 => Self::CannotVerifyCaChain,
            -3 => Self::NoMatchingEncryptionAlgorithms,
            -2 => Self::InvalidSocket,
            -1 => Self::UnknownError,
            0 => Self::Disconnected,
            1 => Self::DisconnectedDraining,
            2 => Self::Pending,
            3 => Self::Connected,
            4 => Self::PacketQueueFilled,
            _ => panic!("state code out of range"),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BadCertificate => "bad certificate",
            Self::ServerAskedForClientCerts => "server asked for client certificates",
            Self::CertificateExpired => "certificate expired",
            Self::BadHostname => "hostname mismatch",
            Self::CannotVerifyCaChain => "cannot verify certificate chain",
            Self::NoMatchingEncryptionAlgorithms => "no matching encryption algorithms",
            Self::InvalidSocket => "invalid socket",
            Self::UnknownError => "unknown error",
            Self::Disconnected => "disconnected",
            Self::DisconnectedDraining => "disconnected, draining",
            Self::Pending => "pending",
            Self::Connected => "connected",
            Self::PacketQueueFilled => "packet queue filled",
        };
        f.write_str(s)
    }
}

impl std::error::Error for State {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_external_interface() {
        assert_eq!(State::BadCertificate.code(), -8);
        assert_eq!(State::ServerAskedForClientCerts.code(), -7);
        assert_eq!(State::CertificateExpired.code(), -6);
        assert_eq!(State::BadHostname.code(), -5);
        assert_eq!(State::CannotVerifyCaChain.code(), -4);
        assert_eq!(State::NoMatchingEncryptionAlgorithms.code(), -3);
        assert_eq!(State::InvalidSocket.code(), -2);
        assert_eq!(State::UnknownError.code(), -1);
        assert_eq!(State::Disconnected.code(), 0);
        assert_eq!(State::DisconnectedDraining.code(), 1);
        assert_eq!(State::Pending.code(), 2);
        assert_eq!(State::Connected.code(), 3);
        assert_eq!(State::PacketQueueFilled.code(), 4);
    }

    #[test]
    fn error_absorption_contract() {
        for s in [
            State::BadCertificate,
            State::ServerAskedForClientCerts,
            State::CertificateExpired,
            State::BadHostname,
            State::CannotVerifyCaChain,
            State::NoMatchingEncryptionAlgorithms,
            State::InvalidSocket,
            State::UnknownError,
        ] {
            assert!(s.is_error());
            assert!(s.is_terminal());
        }
        assert!(!State::Pending.is_error());
        assert!(!State::Connected.is_error());
        assert!(!State::DisconnectedDraining.is_error());
        assert!(!State::PacketQueueFilled.is_error());
        assert!(State::Disconnected.is_terminal());
        assert!(!State::Disconnected.is_error());
    }

    #[test]
    fn from_code_round_trips_every_variant() {
        for code in -8..=4i8 {
            assert_eq!(State::from_code(code).code(), code);
        }
    }
}
