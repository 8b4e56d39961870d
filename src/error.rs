use thiserror::Error;

pub use color_eyre::eyre::eyre;

use crate::protocol::response::{ErrPayload, ErrPayloadBytes};

pub type Result<T> = core::result::Result<T, Error>;

/// Server error codes after which the connection must be considered dead.
const FATAL_SERVER_ERRORS: &[u16] = &[
    1152, // ER_ABORTING_CONNECTION
    1153, // ER_NET_PACKET_TOO_LARGE
    1184, // ER_NEW_ABORTING_CONNECTION
    1927, // ER_CONNECTION_KILLED
];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Server Error: {0}")]
    Server(#[from] ErrPayload),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level failure: broken handshake, protocol desync, closed
    /// socket.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A logical command exceeded `max_allowed_packet`. `must_reconnect` is
    /// set when part of the command was already flushed to the socket, in
    /// which case the connection can no longer be used.
    #[error("packet size {size} exceeds max_allowed_packet {limit}")]
    MaxPacketExceeded {
        size: usize,
        limit: usize,
        must_reconnect: bool,
    },

    #[error("TLS negotiation failed: {0}")]
    Tls(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    /// Codec decode/encode failure; the session itself stays usable.
    #[error("{0}")]
    Decode(String),

    /// Column index or label that does not exist in the result set.
    #[error("{0}")]
    OutOfBounds(String),

    #[error("Bad config error: {0}")]
    BadConfig(String),

    #[error("Bad usage error: {0}")]
    BadUsage(String),

    #[error("Feature not supported: {0}")]
    Unsupported(String),

    /// Batch failure carrying the per-row update counts accumulated before
    /// the failing row.
    #[error("batch failed after {} rows: {cause}", counts.len())]
    Batch { counts: Vec<u64>, cause: Box<Error> },

    #[error("waiter was interrupted")]
    Interrupted,

    #[error("No connection available within the specified time")]
    PoolTimeout,

    #[error("A bug in marlin: {0}")]
    LibraryBug(color_eyre::Report),
}

impl Error {
    /// Stable SQLSTATE class of this error kind. Server errors pass the
    /// server-reported state through.
    pub fn sql_state(&self) -> &str {
        match self {
            Error::Server(err) => &err.sql_state,
            Error::Io(_)
            | Error::Connection(_)
            | Error::MaxPacketExceeded { .. }
            | Error::Tls(_)
            | Error::PoolTimeout => "08000",
            Error::Auth(_) => "28000",
            Error::Decode(_) => "22000",
            Error::OutOfBounds(_) => "07009",
            Error::Unsupported(_) => "0A000",
            Error::Interrupted => "70100",
            Error::Batch { cause, .. } => cause.sql_state(),
            Error::BadConfig(_) | Error::BadUsage(_) | Error::LibraryBug(_) => "HY000",
        }
    }

    /// Whether the underlying connection must be considered unusable after
    /// this error. Used by the session to mark itself broken and by the pool
    /// to discard instead of recycle.
    pub fn is_conn_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::Connection(_) | Error::Tls(_) => true,
            Error::MaxPacketExceeded { must_reconnect, .. } => *must_reconnect,
            Error::Server(err) => FATAL_SERVER_ERRORS.contains(&err.error_code),
            Error::Batch { cause, .. } => cause.is_conn_broken(),
            _ => false,
        }
    }

    /// Whether this failure may be retried on a fresh connection via
    /// transaction replay.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Connection(_))
    }

    pub fn from_debug(err: impl std::fmt::Debug) -> Self {
        Self::LibraryBug(eyre!(format!("{:#?}", err)))
    }
}

impl<'buf> From<ErrPayloadBytes<'buf>> for Error {
    fn from(value: ErrPayloadBytes) -> Self {
        match ErrPayload::try_from(value) {
            Ok(err_payload) => Error::Server(err_payload),
            Err(err) => err,
        }
    }
}

impl<Src, Dst: ?Sized> From<zerocopy::CastError<Src, Dst>> for Error {
    fn from(err: zerocopy::CastError<Src, Dst>) -> Self {
        Self::LibraryBug(eyre!("{:#?}", err))
    }
}

/// Builds the uniform "cannot be decoded" error for a source column type
/// that a codec does not accept.
pub fn cannot_decode(source: crate::constant::ColumnType, target: &str) -> Error {
    Error::Decode(format!(
        "Data type {} cannot be decoded as {}",
        source.name(),
        target
    ))
}

/// Builds the uniform "cannot be decoded" error for a value that a codec
/// accepts by type but cannot represent.
pub fn bad_value(value: impl std::fmt::Display, target: &str) -> Error {
    Error::Decode(format!("value '{value}' cannot be decoded as {target}"))
}
