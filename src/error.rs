//! Error types.

use std::collections::HashMap;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// PostgreSQL error/notice field type codes (see `ErrorResponse`/`NoticeResponse`).
pub mod field_type {
    pub const SEVERITY: u8 = b'S';
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const INTERNAL_POSITION: u8 = b'p';
    pub const INTERNAL_QUERY: u8 = b'q';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const FILE: u8 = b'F';
    pub const LINE: u8 = b'L';
    pub const ROUTINE: u8 = b'R';
}

/// A keyed bag of optional fields carried by `ErrorResponse`/`NoticeResponse`.
#[derive(Debug, Clone, Default)]
pub struct ServerError(pub(crate) HashMap<u8, String>);

impl ServerError {
    pub fn new(fields: HashMap<u8, String>) -> Self {
        Self(fields)
    }

    fn field(&self, code: u8) -> Option<&str> {
        self.0.get(&code).map(String::as_str)
    }

    pub fn severity(&self) -> &str {
        self.field(field_type::SEVERITY).unwrap_or_default()
    }

    pub fn severity_non_localized(&self) -> &str {
        self.field(field_type::SEVERITY_NON_LOCALIZED)
            .unwrap_or_default()
    }

    pub fn code(&self) -> &str {
        self.field(field_type::CODE).unwrap_or_default()
    }

    pub fn message(&self) -> &str {
        self.field(field_type::MESSAGE).unwrap_or_default()
    }

    pub fn detail(&self) -> Option<&str> {
        self.field(field_type::DETAIL)
    }

    pub fn hint(&self) -> Option<&str> {
        self.field(field_type::HINT)
    }

    pub fn position(&self) -> Option<u32> {
        self.field(field_type::POSITION)?.parse().ok()
    }

    pub fn internal_position(&self) -> Option<u32> {
        self.field(field_type::INTERNAL_POSITION)?.parse().ok()
    }

    pub fn internal_query(&self) -> Option<&str> {
        self.field(field_type::INTERNAL_QUERY)
    }

    pub fn where_(&self) -> Option<&str> {
        self.field(field_type::WHERE)
    }

    pub fn schema(&self) -> Option<&str> {
        self.field(field_type::SCHEMA)
    }

    pub fn table(&self) -> Option<&str> {
        self.field(field_type::TABLE)
    }

    pub fn column(&self) -> Option<&str> {
        self.field(field_type::COLUMN)
    }

    pub fn data_type(&self) -> Option<&str> {
        self.field(field_type::DATA_TYPE)
    }

    pub fn constraint(&self) -> Option<&str> {
        self.field(field_type::CONSTRAINT)
    }

    pub fn file(&self) -> Option<&str> {
        self.field(field_type::FILE)
    }

    pub fn line(&self) -> Option<u32> {
        self.field(field_type::LINE)?.parse().ok()
    }

    pub fn routine(&self) -> Option<&str> {
        self.field(field_type::ROUTINE)
    }

    pub fn get(&self, code: u8) -> Option<&str> {
        self.field(code)
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (SQLSTATE {})",
            self.severity(),
            self.message(),
            self.code()
        )?;
        if let Some(detail) = self.detail() {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = self.hint() {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

/// Error taxonomy for the protocol core.
#[derive(Debug, Error)]
pub enum Error {
    /// `ErrorResponse` received from the server. Non-fatal; the connection
    /// recovers at the next `ReadyForQuery`.
    #[error("server error: {0}")]
    Server(ServerError),

    /// Unexpected message, truncated frame, or malformed field layout. Fatal.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport read/write/close failure. Fatal.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Unsupported authentication method, or the server rejected the password. Fatal.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The connection has already transitioned to closed and cannot be used.
    #[error("connection is closed")]
    ConnectionBroken,

    /// `AlreadyEngaged`, wrong argument count, missing handshake, etc. Non-fatal.
    #[error("invalid usage: {0}")]
    Usage(String),

    /// Unknown OID, type mismatch, length mismatch, bad jsonb version, bad
    /// INET family. Fails the operation; the connection recovers.
    #[error("codec error: {0}")]
    Codec(String),
}

impl Error {
    /// An operation issued `AlreadyEngaged` error: rows are open or a
    /// transaction handle is outstanding.
    pub fn already_engaged() -> Self {
        Error::Usage("connection has an operation in progress".into())
    }

    /// Whether this error means the connection must move to closed.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Transport(_) | Error::ConnectionBroken | Error::Protocol(_) | Error::Auth(_) => {
                true
            }
            Error::Server(err) => matches!(err.severity_non_localized(), "FATAL" | "PANIC"),
            Error::Usage(_) | Error::Codec(_) => false,
        }
    }

    /// SQLSTATE code, if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(err) => Some(err.code()),
            _ => None,
        }
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}
