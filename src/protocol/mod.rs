//! Wire message shapes for protocol version 3.0, with no I/O.

pub mod backend;
pub mod frontend;
pub mod types;

pub use types::{FormatCode, Oid, TransactionStatus};
