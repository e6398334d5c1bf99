//! The external socket interface the ATT connection runs on top of.
//!
//! This is the narrow seam between this crate and everything below it: L2CAP
//! framing, the HCI transport, and the Bluetooth controller driver are all out of
//! scope here and are assumed to be implemented by whatever provides a [`Socket`].

use std::fmt;

/// Relative strength of a link's pairing/encryption state, as reported by the socket.
///
/// Ordered from weakest to strongest so permission checks can compare a required
/// level against the level the socket reports with a simple `>=`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityLevel {
    /// No security; unencrypted, unauthenticated (eg. an SDP-only link).
    Sdp,
    /// Encrypted, but with an unauthenticated key.
    Low,
    /// Encrypted with an authenticated key.
    Medium,
    /// Encrypted with an authenticated key and a sufficient key size (eg. LE Secure
    /// Connections).
    High,
    /// FIPS-approved algorithms only.
    Fips,
}

/// An error produced by a [`Socket`] implementation.
///
/// Propagated unchanged out of [`crate::att::connection::AttConnection::read`] and
/// [`crate::att::connection::AttConnection::write`].
pub type SocketError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The transport a single ATT connection is carried over.
///
/// Implementations are expected to deliver and accept exactly one ATT PDU per
/// `send`/`recv` call (ie. framed datagrams, as L2CAP provides once a fixed channel
/// is connected).
pub trait Socket {
    /// Sends one ATT PDU.
    fn send(&mut self, pdu: &[u8]) -> Result<(), SocketError>;

    /// Receives one ATT PDU, if one is available without blocking.
    ///
    /// Returns `Ok(None)` if no full PDU is currently available.
    fn recv(&mut self) -> Result<Option<Vec<u8>>, SocketError>;

    /// The current security level of the underlying link.
    fn security_level(&self) -> SecurityLevel;
}

impl fmt::Debug for dyn Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Socket(security_level={:?})", self.security_level())
    }
}
