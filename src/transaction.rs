//! Transaction handle (§4.5).

use crate::connection::Connection;
use crate::error::Result;
use crate::transport::Transport;

/// A live transaction on a connection. At most one may be outstanding per
/// [`Connection`]; obtaining a second with [`Connection::begin`] fails with
/// `AlreadyEngaged`. `commit`/`rollback` consume the handle and must be
/// called with the same connection that produced it.
pub struct Transaction {
    done: bool,
}

impl Transaction {
    pub(crate) fn new() -> Self {
        Self { done: false }
    }

    pub fn commit<T: Transport>(mut self, conn: &mut Connection<T>) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        conn.tx_open = false;
        conn.exec("COMMIT", &[]).map(|_| ())
    }

    pub fn rollback<T: Transport>(mut self, conn: &mut Connection<T>) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        conn.tx_open = false;
        conn.exec("ROLLBACK", &[]).map(|_| ())
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

    impl crate::transport::Transport for MockTransport {
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

    fn frame(type_byte: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![type_byte];
        let len = (payload.len() + 4) as i32;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn cstr(s: &str) -> Vec<u8> {
        let mut v = s.as_bytes().to_vec();
        v.push(0);
        v
    }

    fn command_complete(tag: &str) -> Vec<u8> {
        frame(crate::protocol::backend::msg_type::COMMAND_COMPLETE, &cstr(tag))
    }

    fn ready_for_query(status: u8) -> Vec<u8> {
        frame(crate::protocol::backend::msg_type::READY_FOR_QUERY, &[status])
    }

    fn authentication_ok() -> Vec<u8> {
        frame(crate::protocol::backend::msg_type::AUTHENTICATION, &0_i32.to_be_bytes())
    }

    /// A handshake-complete connection, driven through the real
    /// `Connection::handshake` rather than poking private fields, so that the
    /// remainder of `script` is left queued for the test body to consume.
    fn connected(script: Vec<u8>) -> Connection<MockTransport> {
        let mut prelude = authentication_ok();
        prelude.extend(ready_for_query(b'I'));
        prelude.extend(script);
        let mut conn = Connection::new(MockTransport::new(prelude));
        conn.handshake(&crate::config::StartupOptions::new("alice", "db")).unwrap();
        conn
    }

    #[test]
    fn commit_issues_commit_and_clears_tx_open() {
        let mut script = command_complete("COMMIT");
        script.extend(ready_for_query(b'I'));
        let mut conn = connected(script);
        conn.tx_open = true;

        let tx = Transaction::new();
        tx.commit(&mut conn).unwrap();
        assert!(!conn.tx_open);
    }

    #[test]
    fn rollback_issues_rollback_and_clears_tx_open() {
        let mut script = command_complete("ROLLBACK");
        script.extend(ready_for_query(b'I'));
        let mut conn = connected(script);
        conn.tx_open = true;

        let tx = Transaction::new();
        tx.rollback(&mut conn).unwrap();
        assert!(!conn.tx_open);
    }

    #[test]
    fn commit_is_idempotent_after_first_call() {
        let mut script = command_complete("COMMIT");
        script.extend(ready_for_query(b'I'));
        let mut conn = connected(script);
        conn.tx_open = true;

        let tx = Transaction::new();
        let already_done = Transaction { done: true };
        tx.commit(&mut conn).unwrap();
        // A handle already marked done performs no I/O; if it did, this would
        // fail trying to read from the now-exhausted mock transport.
        already_done.commit(&mut conn).unwrap();
    }
}
