//! A minimal PostgreSQL wire protocol (v3.0) client core.
//!
//! This crate implements the frame codec, the connection state machine
//! (startup, authentication, simple query, extended query), and the binary
//! type codec registry for a fixed catalogue of PostgreSQL types. It does
//! not dial sockets, negotiate TLS, parse connection strings, or pool
//! connections — callers supply an already-connected [`Transport`] and a
//! [`StartupOptions`].
//!
//! # Example
//!
//! ```no_run
//! use zero_postgres::{Connection, StartupOptions};
//! use std::net::TcpStream;
//!
//! fn main() -> zero_postgres::Result<()> {
//!     let stream = TcpStream::connect("localhost:5432")?;
//!     let mut conn = Connection::new(stream);
//!     conn.handshake(&StartupOptions::new("postgres", "postgres").password("secret"))?;
//!
//!     let result = conn.exec("CREATE TABLE IF NOT EXISTS t(id int)", &[])?;
//!     println!("{}", result.tag());
//!
//!     let mut rows = conn.query("SELECT id FROM t", &[])?;
//!     while let Some(row) = rows.next(&mut conn)? {
//!         println!("{:?}", row.get(0));
//!     }
//!
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

mod auth;
mod frame;

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod stream;
pub mod transaction;
pub mod transport;

pub use codec::Value;
pub use config::StartupOptions;
pub use connection::{Connection, ExecResult, Notification};
pub use error::{Error, Result, ServerError};
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use stream::{Row, RowStream};
pub use transaction::Transaction;
pub use transport::Transport;

/// Re-exports the protocol module's message builders/parsers and the raw
/// frame codec for callers who want to hand-roll a driver instead of using
/// [`Connection`].
#[cfg(feature = "lowlevel")]
pub mod lowlevel {
    pub use crate::frame::{Frame, Framer, MessageBuilder};
    pub use crate::protocol::{backend, frontend, types};
}
