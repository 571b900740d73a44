//! Frontend (client → server) message builders.

use crate::frame::MessageBuilder;
use crate::protocol::types::Oid;

/// Frontend message type bytes.
pub mod msg_type {
    pub const PASSWORD: u8 = b'p';
    pub const QUERY: u8 = b'Q';
    pub const PARSE: u8 = b'P';
    pub const BIND: u8 = b'B';
    pub const EXECUTE: u8 = b'E';
    pub const DESCRIBE: u8 = b'D';
    pub const CLOSE: u8 = b'C';
    pub const SYNC: u8 = b'S';
    pub const FLUSH: u8 = b'H';
    pub const TERMINATE: u8 = b'X';
}

pub const PROTOCOL_VERSION_3_0: i32 = 0x0003_0000;

/// Build the `StartupMessage`: protocol version then zero-terminated
/// `(name, value)` pairs, terminated by a single `0` byte.
pub fn write_startup(buf: &mut Vec<u8>, params: &[(&str, &str)]) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(PROTOCOL_VERSION_3_0);
    for (name, value) in params {
        msg.write_cstr(name);
        msg.write_cstr(value);
    }
    msg.write_u8(0);
    msg.finish();
}

pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

pub fn write_query(buf: &mut Vec<u8>, sql: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::QUERY);
    msg.write_cstr(sql);
    msg.finish();
}

/// `name` empty = unnamed statement. `param_oids` empty lets the server infer.
pub fn write_parse(buf: &mut Vec<u8>, name: &str, sql: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(sql);
    msg.write_i16(param_oids.len() as i16);
    for &oid in param_oids {
        msg.write_i32(oid as i32);
    }
    msg.finish();
}

/// One already-serialized parameter: `None` encodes as `-1`-length NULL.
pub type BindParam<'a> = Option<&'a [u8]>;

/// `Bind` with all-binary parameter and result format codes, matching the
/// core's policy of always negotiating binary (§4.2 step 5).
pub fn write_bind(buf: &mut Vec<u8>, portal: &str, statement: &str, params: &[BindParam<'_>]) {
    let mut msg = MessageBuilder::new(buf, msg_type::BIND);
    msg.write_cstr(portal);
    msg.write_cstr(statement);

    // one format code applies to all parameters: binary.
    msg.write_i16(1);
    msg.write_i16(1);

    msg.write_i16(params.len() as i16);
    for param in params {
        match param {
            Some(bytes) => {
                msg.write_i32(bytes.len() as i32);
                msg.write_bytes(bytes);
            }
            None => {
                msg.write_i32(-1);
            }
        }
    }

    // one result format code: binary.
    msg.write_i16(1);
    msg.write_i16(1);
    msg.finish();
}

pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: i32) {
    let mut msg = MessageBuilder::new(buf, msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_i32(max_rows);
    msg.finish();
}

pub const DESCRIBE_STATEMENT: u8 = b'S';
pub const DESCRIBE_PORTAL: u8 = b'P';

pub fn write_describe(buf: &mut Vec<u8>, kind: u8, name: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::DESCRIBE);
    msg.write_u8(kind);
    msg.write_cstr(name);
    msg.finish();
}

pub fn write_close(buf: &mut Vec<u8>, kind: u8, name: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::CLOSE);
    msg.write_u8(kind);
    msg.write_cstr(name);
    msg.finish();
}

pub fn write_sync(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, msg_type::SYNC).finish();
}

pub fn write_flush(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, msg_type::FLUSH).finish();
}

pub fn write_terminate(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, msg_type::TERMINATE).finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_has_no_type_byte_and_ends_with_zero() {
        let mut buf = Vec::new();
        write_startup(&mut buf, &[("user", "alice")]);
        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len());
        assert_eq!(*buf.last().unwrap(), 0);
        let version = i32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        assert_eq!(version, PROTOCOL_VERSION_3_0);
    }

    #[test]
    fn sync_and_flush_are_empty_payload() {
        let mut buf = Vec::new();
        write_sync(&mut buf);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf[0], b'S');
        assert_eq!(&buf[1..5], &4_i32.to_be_bytes());

        let mut buf = Vec::new();
        write_flush(&mut buf);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf[0], b'H');
    }

    #[test]
    fn execute_unlimited_rows() {
        let mut buf = Vec::new();
        write_execute(&mut buf, "", 0);
        assert_eq!(buf[0], b'E');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, buf.len() - 1);
    }

    #[test]
    fn bind_encodes_null_as_negative_one_length() {
        let mut buf = Vec::new();
        write_bind(&mut buf, "", "", &[None, Some(&[0x00, 0x00, 0x00, 0x01])]);
        assert_eq!(buf[0], b'B');
        // portal \0, statement \0, nfmt(1) fmt(1), nparams(2)
        let params_start = 1 + 4 + 1 + 1 + 2 + 2 + 2;
        let null_len = i32::from_be_bytes(buf[params_start..params_start + 4].try_into().unwrap());
        assert_eq!(null_len, -1);
    }
}
