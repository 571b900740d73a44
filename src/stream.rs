//! Pull-driven row stream for extended-query results (§4.4).

use crate::codec::Value;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::protocol::backend::{self, msg_type as backend_msg, CommandComplete, FieldDescription};
use crate::protocol::types::TransactionStatus;
use crate::transport::Transport;

/// One decoded result row. Column order matches [`RowStream::columns`].
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Option<Value>>,
}

impl Row {
    pub(crate) fn new(values: Vec<Option<Value>>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(|v| v.as_ref())
    }
}

/// A lazily-advanced sequence of rows from a single `Execute` (§4.4). Only
/// one `RowStream` may be outstanding on a [`Connection`] at a time; issuing
/// another operation while this one is open fails with `AlreadyEngaged`.
pub struct RowStream {
    columns: Vec<FieldDescription>,
    tag: Option<CommandComplete>,
    done: bool,
}

impl RowStream {
    pub(crate) fn new(columns: Vec<FieldDescription>) -> Self {
        Self {
            columns,
            tag: None,
            done: false,
        }
    }

    pub fn columns(&self) -> &[FieldDescription] {
        &self.columns
    }

    /// The command tag (e.g. `"SELECT 3"`), available once the stream is
    /// exhausted.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_ref().map(|c| c.tag.as_str())
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Advances the underlying connection's receive loop until the next row,
    /// `None` at end of results. Must be called with the same connection
    /// that produced this stream.
    pub fn next<T: Transport>(&mut self, conn: &mut Connection<T>) -> Result<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let frame = conn.next_message()?;
            match frame.type_byte {
                backend_msg::DATA_ROW => {
                    return Ok(Some(conn.decode_row(&frame.payload, &self.columns)?));
                }
                backend_msg::COMMAND_COMPLETE => {
                    self.tag = Some(CommandComplete::parse(&frame.payload)?);
                }
                backend_msg::EMPTY_QUERY_RESPONSE => {
                    conn.drain_to_ready()?;
                    self.done = true;
                    return Err(Error::Protocol("empty query string".into()));
                }
                backend_msg::CLOSE_COMPLETE => {}
                backend_msg::READY_FOR_QUERY => {
                    let byte = backend::parse_ready_for_query(&frame.payload)?;
                    conn.transaction_status = Some(TransactionStatus::from_byte(byte)?);
                    conn.rows_open = false;
                    self.done = true;
                    return Ok(None);
                }
                backend_msg::ERROR_RESPONSE => {
                    let err = conn.server_error(&frame.payload)?;
                    conn.drain_to_ready()?;
                    self.done = true;
                    return Err(err);
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message {:?} ({other:#x}) while streaming rows",
                        other as char
                    )));
                }
            }
        }
    }

    /// Drains any remaining rows, discarding them, and resynchronizes the
    /// connection at `ReadyForQuery`. Safe to call after partial iteration.
    pub fn close<T: Transport>(&mut self, conn: &mut Connection<T>) -> Result<()> {
        while self.next(conn)?.is_some() {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    struct MockTransport {
        inbound: VecDeque<u8>,
    }

    impl MockTransport {
        fn new(inbound: Vec<u8>) -> Self {
            Self { inbound: inbound.into() }
        }
    }

    impl Transport for MockTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.inbound.is_empty() {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
            }
            let n = buf.len().min(self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().expect("checked non-empty above");
            }
            Ok(n)
        }

        fn write_all(&mut self, _buf: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn frame_bytes(type_byte: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![type_byte];
        let len = (payload.len() + 4) as i32;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn ready_for_query(status: u8) -> Vec<u8> {
        frame_bytes(backend::msg_type::READY_FOR_QUERY, &[status])
    }

    fn empty_query_response() -> Vec<u8> {
        frame_bytes(backend::msg_type::EMPTY_QUERY_RESPONSE, &[])
    }

    fn harness(script: Vec<u8>) -> Connection<MockTransport> {
        // Bypasses the handshake: these tests only exercise RowStream's own
        // message loop, not Connection::handshake.
        let mut conn = Connection::new(MockTransport::new(script));
        conn.transaction_status = Some(TransactionStatus::Idle);
        conn
    }

    #[test]
    fn empty_query_string_surfaces_protocol_error_and_resyncs() {
        let mut script = empty_query_response();
        script.extend(ready_for_query(b'I'));
        let mut conn = harness(script);
        let mut rows = RowStream::new(Vec::new());

        let err = rows.next(&mut conn).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(conn.transaction_status(), Some(TransactionStatus::Idle));
    }

    #[test]
    fn unexpected_message_is_a_protocol_error() {
        let script = frame_bytes(backend::msg_type::BIND_COMPLETE, &[]);
        let mut conn = harness(script);
        let mut rows = RowStream::new(Vec::new());

        let err = rows.next(&mut conn).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn next_returns_none_once_done_without_reading_again() {
        let mut rows = RowStream::new(Vec::new());
        rows.done = true;
        let mut conn = harness(Vec::new());
        assert!(rows.next(&mut conn).unwrap().is_none());
    }
}
