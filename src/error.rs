use thiserror::Error as ThisError;

/// Errors returned by the ATT/GATT codec and server logic.
///
/// This is distinct from [`AttError`](crate::att::pdus::AttError), which represents a
/// protocol-level error to be sent back to the peer. `Error` represents a local
/// decode or logic failure.
#[derive(Debug, PartialEq, Eq, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// Packet specified an invalid length value or was too short.
    ///
    /// This indicates a protocol violation, so the connection should be considered lost.
    #[error("invalid length value specified")]
    InvalidLength,

    /// Invalid value supplied for field.
    #[error("invalid value for field")]
    InvalidValue,

    /// Unexpectedly reached EOF while reading or writing data.
    ///
    /// This is returned when the application tries to fit too much data into a PDU or
    /// other fixed-size buffer, and also when reaching EOF prematurely while reading
    /// data from a buffer.
    #[error("end of buffer")]
    Eof,

    /// Parsing didn't consume the entire buffer.
    #[error("excess data in buffer")]
    IncompleteParse,

    /// Operation was rejected by a permission or security level check.
    #[error("permission denied")]
    PermissionDenied,

    /// The prepared-write queue has reached its configured capacity.
    #[error("prepared write queue is full")]
    PrepareQueueFull,
}
