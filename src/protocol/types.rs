//! Shared wire-level types: OIDs, format codes, transaction status.

use crate::error::{Error, Result};

/// PostgreSQL type OID.
pub type Oid = u32;

/// OID constants for the fixed catalogue this core supports (§4.3).
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const NAME: Oid = 19;
    pub const JSON: Oid = 114;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const INET: Oid = 869;
    pub const CIDR: Oid = 650;
    pub const MACADDR: Oid = 829;
    pub const DATE: Oid = 1082;
    pub const TIME: Oid = 1083;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
    pub const INTERVAL: Oid = 1187;
    pub const TIMETZ: Oid = 1266;
    pub const UUID: Oid = 2950;
    pub const JSONB: Oid = 3802;
}

/// Format code attached to a parameter or a result column. The core always
/// negotiates binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatCode {
    Text = 0,
    Binary = 1,
}

impl FormatCode {
    pub fn from_i16(v: i16) -> Result<Self> {
        match v {
            0 => Ok(Self::Text),
            1 => Ok(Self::Binary),
            other => Err(Error::Protocol(format!("unknown format code {other}"))),
        }
    }
}

/// Transaction status reported by the last observed `ReadyForQuery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    InTransaction,
    Failed,
}

impl TransactionStatus {
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            b'I' => Ok(Self::Idle),
            b'T' => Ok(Self::InTransaction),
            b'E' => Ok(Self::Failed),
            other => Err(Error::Protocol(format!(
                "unknown transaction status byte {other:#x}"
            ))),
        }
    }
}
