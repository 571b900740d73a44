//! Backend (server → client) message type bytes and payload parsers.

use crate::error::{Error, Result};
use crate::protocol::types::Oid;

/// Backend message type bytes.
pub mod msg_type {
    pub const AUTHENTICATION: u8 = b'R';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ROW_DESCRIPTION: u8 = b'T';
    pub const DATA_ROW: u8 = b'D';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const PARSE_COMPLETE: u8 = b'1';
    pub const BIND_COMPLETE: u8 = b'2';
    pub const CLOSE_COMPLETE: u8 = b'3';
    pub const NO_DATA: u8 = b'n';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    /// Precedes a COPY TO STDOUT result. COPY streaming itself is out of
    /// scope; the simple-query path tolerates and discards this header so a
    /// `COPY ... TO STDOUT` issued through `exec` fails cleanly on the first
    /// unhandled `CopyData` rather than misparsing the frame stream.
    pub const COPY_OUT_RESPONSE: u8 = b'H';
}

fn read_i16(data: &[u8]) -> Result<(i16, &[u8])> {
    let bytes: [u8; 2] = data
        .get(..2)
        .ok_or_else(|| Error::Protocol("truncated i16".into()))?
        .try_into()
        .map_err(|_| Error::Protocol("truncated i16".into()))?;
    Ok((i16::from_be_bytes(bytes), &data[2..]))
}

fn read_i32(data: &[u8]) -> Result<(i32, &[u8])> {
    let bytes: [u8; 4] = data
        .get(..4)
        .ok_or_else(|| Error::Protocol("truncated i32".into()))?
        .try_into()
        .map_err(|_| Error::Protocol("truncated i32".into()))?;
    Ok((i32::from_be_bytes(bytes), &data[4..]))
}

fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    let (v, rest) = read_i32(data)?;
    Ok((v as u32, rest))
}

fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let nul = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::Protocol("unterminated string".into()))?;
    let s = std::str::from_utf8(&data[..nul])
        .map_err(|e| Error::Protocol(format!("invalid utf8: {e}")))?;
    Ok((s, &data[nul + 1..]))
}

/// `'R'` Authentication message, parsed into its sub-type.
#[derive(Debug, Clone)]
pub enum AuthenticationMessage {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    Unsupported { sub_type: i32 },
}

impl AuthenticationMessage {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (sub_type, rest) = read_i32(payload)?;
        Ok(match sub_type {
            0 => Self::Ok,
            3 => Self::CleartextPassword,
            5 => {
                let salt: [u8; 4] = rest
                    .get(..4)
                    .ok_or_else(|| Error::Protocol("truncated MD5 salt".into()))?
                    .try_into()
                    .map_err(|_| Error::Protocol("truncated MD5 salt".into()))?;
                Self::Md5Password { salt }
            }
            other => Self::Unsupported { sub_type: other },
        })
    }
}

/// `'K'` BackendKeyData.
#[derive(Debug, Clone, Copy)]
pub struct BackendKeyData {
    pub pid: i32,
    pub secret_key: i32,
}

impl BackendKeyData {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (pid, rest) = read_i32(payload)?;
        let (secret_key, _) = read_i32(rest)?;
        Ok(Self { pid, secret_key })
    }
}

/// `'S'` ParameterStatus.
#[derive(Debug, Clone)]
pub struct ParameterStatus {
    pub name: String,
    pub value: String,
}

impl ParameterStatus {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

/// `'Z'` ReadyForQuery.
pub fn parse_ready_for_query(payload: &[u8]) -> Result<u8> {
    payload
        .first()
        .copied()
        .ok_or_else(|| Error::Protocol("empty ReadyForQuery".into()))
}

/// One field of a `'T'` RowDescription.
#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: Oid,
    pub column_attr_no: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_mod: i32,
    pub format_code: i16,
}

/// `'T'` RowDescription.
#[derive(Debug, Clone)]
pub struct RowDescription {
    pub fields: Vec<FieldDescription>,
}

impl RowDescription {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (n, mut rest) = read_i16(payload)?;
        let mut fields = Vec::with_capacity(n.max(0) as usize);
        for _ in 0..n {
            let (name, r) = read_cstr(rest)?;
            let (table_oid, r) = read_u32(r)?;
            let (column_attr_no, r) = read_i16(r)?;
            let (type_oid, r) = read_u32(r)?;
            let (type_size, r) = read_i16(r)?;
            let (type_mod, r) = read_i32(r)?;
            let (format_code, r) = read_i16(r)?;
            fields.push(FieldDescription {
                name: name.to_string(),
                table_oid,
                column_attr_no,
                type_oid,
                type_size,
                type_mod,
                format_code,
            });
            rest = r;
        }
        Ok(Self { fields })
    }
}

/// One column value of a `'D'` DataRow: `None` is SQL NULL (wire length `-1`).
pub type DataRowColumn<'a> = Option<&'a [u8]>;

/// `'D'` DataRow, borrowing column bytes directly out of the frame payload.
#[derive(Debug, Clone)]
pub struct DataRow<'a> {
    payload: &'a [u8],
    count: usize,
}

impl<'a> DataRow<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (n, _) = read_i16(payload)?;
        Ok(Self {
            payload,
            count: n.max(0) as usize,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn columns(&self) -> Result<Vec<DataRowColumn<'a>>> {
        let (_, mut rest) = read_i16(self.payload)?;
        let mut out = Vec::with_capacity(self.count);
        for _ in 0..self.count {
            let (len, r) = read_i32(rest)?;
            if len < 0 {
                out.push(None);
                rest = r;
            } else {
                let len = len as usize;
                let bytes = r
                    .get(..len)
                    .ok_or_else(|| Error::Protocol("truncated DataRow column".into()))?;
                out.push(Some(bytes));
                rest = &r[len..];
            }
        }
        Ok(out)
    }
}

/// `'C'` CommandComplete.
#[derive(Debug, Clone)]
pub struct CommandComplete {
    pub tag: String,
}

impl CommandComplete {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag: tag.to_string() })
    }

    /// Parses the trailing row count out of tags like `"DELETE 3"`,
    /// `"INSERT 0 3"`, `"SELECT 3"`, `"UPDATE 3"`, `"COPY 3"`, `"MOVE 3"`,
    /// `"FETCH 3"`. Returns `None` for tags with no count (e.g. `"BEGIN"`).
    pub fn rows_affected(&self) -> Option<u64> {
        self.tag.rsplit(' ').next()?.parse().ok()
    }

    pub fn command(&self) -> &str {
        self.tag.split(' ').next().unwrap_or(&self.tag)
    }
}

/// `'t'` ParameterDescription.
#[derive(Debug, Clone)]
pub struct ParameterDescription {
    pub oids: Vec<Oid>,
}

impl ParameterDescription {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (n, mut rest) = read_i16(payload)?;
        let mut oids = Vec::with_capacity(n.max(0) as usize);
        for _ in 0..n {
            let (oid, r) = read_u32(rest)?;
            oids.push(oid);
            rest = r;
        }
        Ok(Self { oids })
    }
}

/// `'A'` NotificationResponse.
#[derive(Debug, Clone)]
pub struct NotificationResponse {
    pub pid: i32,
    pub channel: String,
    pub payload: String,
}

impl NotificationResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (pid, rest) = read_i32(payload)?;
        let (channel, rest) = read_cstr(rest)?;
        let (body, _) = read_cstr(rest)?;
        Ok(Self {
            pid,
            channel: channel.to_string(),
            payload: body.to_string(),
        })
    }
}

/// Parses the field stream shared by `'E'` ErrorResponse and `'N'`
/// NoticeResponse: repeated `byte code, zstr value`, terminated by `0x00`.
pub fn parse_error_fields(payload: &[u8]) -> Result<std::collections::HashMap<u8, String>> {
    let mut fields = std::collections::HashMap::new();
    let mut data = payload;
    while !data.is_empty() && data[0] != 0 {
        let code = data[0];
        let (value, rest) = read_cstr(&data[1..])?;
        fields.insert(code, value.to_string());
        data = rest;
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_md5_carries_salt() {
        let mut payload = 5_i32.to_be_bytes().to_vec();
        payload.extend_from_slice(&[1, 2, 3, 4]);
        match AuthenticationMessage::parse(&payload).unwrap() {
            AuthenticationMessage::Md5Password { salt } => assert_eq!(salt, [1, 2, 3, 4]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn command_complete_parses_tag() {
        let mut payload = b"DELETE 3".to_vec();
        payload.push(0);
        let cc = CommandComplete::parse(&payload).unwrap();
        assert_eq!(cc.command(), "DELETE");
        assert_eq!(cc.rows_affected(), Some(3));
    }

    #[test]
    fn command_complete_with_oid_tag() {
        let mut payload = b"INSERT 0 3".to_vec();
        payload.push(0);
        let cc = CommandComplete::parse(&payload).unwrap();
        assert_eq!(cc.rows_affected(), Some(3));
    }

    #[test]
    fn data_row_null_column() {
        let mut payload = 2_i16.to_be_bytes().to_vec();
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&4_i32.to_be_bytes());
        payload.extend_from_slice(&[9, 9, 9, 9]);
        let row = DataRow::parse(&payload).unwrap();
        let cols = row.columns().unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0], None);
        assert_eq!(cols[1], Some(&[9, 9, 9, 9][..]));
    }
}
