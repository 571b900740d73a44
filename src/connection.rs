//! The connection state machine: handshake, simple exec, extended query.

use std::collections::{HashMap, VecDeque};

use crate::auth::md5_password;
use crate::codec::{FieldView, Value, REGISTRY};
use crate::config::StartupOptions;
use crate::error::{Error, Result};
use crate::frame::{Frame, Framer};
use crate::protocol::backend::{
    self, msg_type as backend_msg, AuthenticationMessage, BackendKeyData, CommandComplete, DataRow,
    NotificationResponse, ParameterDescription, ParameterStatus, RowDescription,
};
use crate::protocol::frontend::{
    write_bind, write_close, write_describe, write_execute, write_flush, write_parse,
    write_password, write_query, write_startup, write_sync, write_terminate, BindParam,
    DESCRIBE_PORTAL, DESCRIBE_STATEMENT,
};
use crate::protocol::types::{Oid, TransactionStatus};
use crate::stream::{Row, RowStream};
use crate::transaction::Transaction;
use crate::transport::Transport;
use tracing::{debug, trace, warn};

const READ_CHUNK: usize = 8192;

/// A backend-pushed `NotificationResponse` (`LISTEN`/`NOTIFY`) delivered
/// between application operations.
#[derive(Debug, Clone)]
pub struct Notification {
    pub pid: i32,
    pub channel: String,
    pub payload: String,
}

/// Result of a non-row-returning `exec`.
#[derive(Debug, Clone)]
pub struct ExecResult {
    tag: String,
}

impl ExecResult {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn rows_affected(&self) -> Option<u64> {
        self.tag.rsplit(' ').next()?.parse().ok()
    }
}

/// Drives the PostgreSQL wire protocol over a caller-supplied [`Transport`].
pub struct Connection<T: Transport> {
    transport: T,
    framer: Framer,
    queue: VecDeque<Frame>,
    write_buf: Vec<u8>,
    pub(crate) server_params: HashMap<String, String>,
    pub(crate) transaction_status: Option<TransactionStatus>,
    backend_key: Option<(i32, i32)>,
    pub(crate) rows_open: bool,
    pub(crate) tx_open: bool,
    handshake_done: bool,
    closed: bool,
    on_notice: Option<Box<dyn FnMut(crate::error::ServerError)>>,
    on_notification: Option<Box<dyn FnMut(Notification)>>,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            framer: Framer::new(),
            queue: VecDeque::new(),
            write_buf: Vec::new(),
            server_params: HashMap::new(),
            transaction_status: None,
            backend_key: None,
            rows_open: false,
            tx_open: false,
            handshake_done: false,
            closed: false,
            on_notice: None,
            on_notification: None,
        }
    }

    pub fn on_notice(&mut self, cb: impl FnMut(crate::error::ServerError) + 'static) {
        self.on_notice = Some(Box::new(cb));
    }

    pub fn on_notification(&mut self, cb: impl FnMut(Notification) + 'static) {
        self.on_notification = Some(Box::new(cb));
    }

    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        self.transaction_status
    }

    pub fn server_parameter(&self, name: &str) -> Option<&str> {
        self.server_params.get(name).map(String::as_str)
    }

    pub fn backend_key(&self) -> Option<(i32, i32)> {
        self.backend_key
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn guard_available(&self) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionBroken);
        }
        if !self.handshake_done {
            return Err(Error::Usage("handshake has not completed".into()));
        }
        if self.rows_open {
            return Err(Error::already_engaged());
        }
        Ok(())
    }

    fn flush_write(&mut self) -> Result<()> {
        self.transport.write_all(&self.write_buf)?;
        self.write_buf.clear();
        Ok(())
    }

    /// Reads the next frame, transparently dispatching `NoticeResponse` and
    /// `NotificationResponse` to user callbacks without surfacing them.
    pub(crate) fn next_message(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.queue.pop_front() {
                match frame.type_byte {
                    backend_msg::NOTICE_RESPONSE => {
                        let fields = backend::parse_error_fields(&frame.payload)?;
                        let notice = crate::error::ServerError::new(fields);
                        match self.on_notice.as_mut() {
                            Some(cb) => cb(notice),
                            None => debug!(message = notice.message(), "unhandled NoticeResponse"),
                        }
                        continue;
                    }
                    backend_msg::NOTIFICATION_RESPONSE => {
                        let n = NotificationResponse::parse(&frame.payload)?;
                        match self.on_notification.as_mut() {
                            Some(cb) => cb(Notification {
                                pid: n.pid,
                                channel: n.channel,
                                payload: n.payload,
                            }),
                            None => warn!(channel = n.channel, "unhandled NotificationResponse"),
                        }
                        continue;
                    }
                    _ => return Ok(frame),
                }
            }
            let mut buf = [0u8; READ_CHUNK];
            let n = self.transport.read(&mut buf)?;
            if n == 0 {
                self.closed = true;
                return Err(Error::Transport(std::io::Error::from(
                    std::io::ErrorKind::UnexpectedEof,
                )));
            }
            trace!(bytes = n, "read from transport");
            let frames = self.framer.feed(&buf[..n])?;
            self.queue.extend(frames);
        }
    }

    pub(crate) fn server_error(&self, payload: &[u8]) -> Result<Error> {
        let fields = backend::parse_error_fields(payload)?;
        let err = crate::error::ServerError::new(fields);
        warn!(code = err.code(), message = err.message(), "server returned ErrorResponse");
        Ok(Error::Server(err))
    }

    fn unexpected(&self, what: &str, type_byte: u8) -> Error {
        Error::Protocol(format!(
            "unexpected message {:?} ({type_byte:#x}) {what}",
            type_byte as char
        ))
    }

    /// Consumes messages until `ReadyForQuery`, recording transaction status
    /// and clearing the rows-open interlock. Used to resynchronize after an
    /// error mid-stream.
    pub(crate) fn drain_to_ready(&mut self) -> Result<()> {
        loop {
            let frame = self.next_message()?;
            if frame.type_byte == backend_msg::READY_FOR_QUERY {
                let byte = backend::parse_ready_for_query(&frame.payload)?;
                self.transaction_status = Some(TransactionStatus::from_byte(byte)?);
                self.rows_open = false;
                return Ok(());
            }
        }
    }

    /// Performs the startup/authentication handshake. Runs exactly once.
    pub fn handshake(&mut self, opts: &StartupOptions) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionBroken);
        }
        if self.handshake_done {
            return Err(Error::Usage("handshake already performed".into()));
        }

        debug!(user = opts.user.as_str(), database = opts.database.as_str(), "starting handshake");

        let mut params = vec![
            ("user", opts.user.as_str()),
            ("database", opts.database.as_str()),
            ("client_encoding", "UTF8"),
            ("datestyle", "ISO, YMD"),
        ];
        if let Some(name) = opts.application_name.as_deref() {
            params.push(("application_name", name));
        }
        write_startup(&mut self.write_buf, &params);
        self.flush_write()?;

        loop {
            let frame = self.next_message()?;
            match frame.type_byte {
                backend_msg::AUTHENTICATION => match AuthenticationMessage::parse(&frame.payload)? {
                    AuthenticationMessage::Ok => break,
                    AuthenticationMessage::CleartextPassword => {
                        let password = opts.password.as_deref().ok_or_else(|| {
                            Error::Auth("server requested a cleartext password but none was provided".into())
                        })?;
                        let mut buf = Vec::new();
                        write_password(&mut buf, password);
                        self.transport.write_all(&buf)?;
                    }
                    AuthenticationMessage::Md5Password { salt } => {
                        let password = opts.password.as_deref().ok_or_else(|| {
                            Error::Auth("server requested an MD5 password but none was provided".into())
                        })?;
                        let hashed = md5_password(&opts.user, password, salt);
                        let mut buf = Vec::new();
                        write_password(&mut buf, &hashed);
                        self.transport.write_all(&buf)?;
                    }
                    AuthenticationMessage::Unsupported { sub_type } => {
                        return Err(Error::Auth(format!("unsupported authentication method {sub_type}")));
                    }
                },
                backend_msg::ERROR_RESPONSE => return Err(self.server_error(&frame.payload)?),
                other => return Err(self.unexpected("during authentication", other)),
            }
        }

        loop {
            let frame = self.next_message()?;
            match frame.type_byte {
                backend_msg::BACKEND_KEY_DATA => {
                    let key = BackendKeyData::parse(&frame.payload)?;
                    self.backend_key = Some((key.pid, key.secret_key));
                }
                backend_msg::PARAMETER_STATUS => {
                    let p = ParameterStatus::parse(&frame.payload)?;
                    self.server_params.insert(p.name, p.value);
                }
                backend_msg::READY_FOR_QUERY => {
                    let byte = backend::parse_ready_for_query(&frame.payload)?;
                    self.transaction_status = Some(TransactionStatus::from_byte(byte)?);
                    break;
                }
                backend_msg::ERROR_RESPONSE => return Err(self.server_error(&frame.payload)?),
                other => return Err(self.unexpected("after authentication", other)),
            }
        }

        self.handshake_done = true;
        debug!("handshake complete");
        Ok(())
    }

    /// Simple-query exec with no parameters (§4.2 "Simple exec").
    fn exec_simple(&mut self, sql: &str) -> Result<ExecResult> {
        write_query(&mut self.write_buf, sql);
        self.flush_write()?;

        let mut tag: Option<CommandComplete> = None;
        loop {
            let frame = self.next_message()?;
            match frame.type_byte {
                backend_msg::ROW_DESCRIPTION
                | backend_msg::DATA_ROW
                | backend_msg::NO_DATA
                | backend_msg::COPY_OUT_RESPONSE => {}
                backend_msg::COMMAND_COMPLETE => {
                    if tag.is_some() {
                        return Err(Error::Protocol("more than one CommandComplete in a simple query".into()));
                    }
                    tag = Some(CommandComplete::parse(&frame.payload)?);
                }
                backend_msg::EMPTY_QUERY_RESPONSE => {
                    self.drain_to_ready()?;
                    return Err(Error::Protocol("empty query string".into()));
                }
                backend_msg::READY_FOR_QUERY => {
                    let byte = backend::parse_ready_for_query(&frame.payload)?;
                    self.transaction_status = Some(TransactionStatus::from_byte(byte)?);
                    let tag = tag.ok_or_else(|| Error::Protocol("no CommandComplete in simple query".into()))?;
                    return Ok(ExecResult { tag: tag.tag });
                }
                backend_msg::ERROR_RESPONSE => {
                    let err = self.server_error(&frame.payload)?;
                    self.drain_to_ready()?;
                    return Err(err);
                }
                other => return Err(self.unexpected("during simple query", other)),
            }
        }
    }

    /// Parse + Describe(statement) + Flush, returning the server-inferred
    /// parameter OIDs (§4.2 steps 1-3).
    fn parse_and_describe_statement(&mut self, sql: &str) -> Result<Vec<Oid>> {
        write_parse(&mut self.write_buf, "", sql, &[]);
        write_describe(&mut self.write_buf, DESCRIBE_STATEMENT, "");
        write_flush(&mut self.write_buf);
        self.flush_write()?;

        let frame = self.next_message()?;
        match frame.type_byte {
            backend_msg::PARSE_COMPLETE => {}
            backend_msg::ERROR_RESPONSE => {
                let err = self.server_error(&frame.payload)?;
                self.drain_to_ready()?;
                return Err(err);
            }
            other => return Err(self.unexpected("awaiting ParseComplete", other)),
        }

        let frame = self.next_message()?;
        let param_oids = match frame.type_byte {
            backend_msg::PARAMETER_DESCRIPTION => ParameterDescription::parse(&frame.payload)?.oids,
            backend_msg::ERROR_RESPONSE => {
                let err = self.server_error(&frame.payload)?;
                self.drain_to_ready()?;
                return Err(err);
            }
            other => return Err(self.unexpected("awaiting ParameterDescription", other)),
        };

        let frame = self.next_message()?;
        match frame.type_byte {
            backend_msg::NO_DATA | backend_msg::ROW_DESCRIPTION => {}
            backend_msg::ERROR_RESPONSE => {
                let err = self.server_error(&frame.payload)?;
                self.drain_to_ready()?;
                return Err(err);
            }
            other => return Err(self.unexpected("awaiting NoData/RowDescription", other)),
        }

        Ok(param_oids)
    }

    fn serialize_params(param_oids: &[Oid], params: &[Option<Value>]) -> Result<Vec<Option<Vec<u8>>>> {
        if param_oids.len() != params.len() {
            return Err(Error::Usage(format!(
                "expected {} parameter(s), got {}",
                param_oids.len(),
                params.len()
            )));
        }
        param_oids
            .iter()
            .zip(params)
            .map(|(oid, value)| match value {
                Some(v) => REGISTRY.serialize(*oid, v).map(Some),
                None => Ok(None),
            })
            .collect()
    }

    /// Serializes the bound arguments against the server-inferred OIDs. A
    /// codec or arg-count failure here happens after `Parse`+`Describe('S')`
    /// have already been sent (§4.2 steps 1-3 must run first to learn the
    /// OIDs), so on failure this still sends `Sync` and drains to
    /// `ReadyForQuery` before surfacing the error, keeping the §3 invariant
    /// that a request isn't left outstanding.
    fn serialize_params_or_resync(
        &mut self,
        param_oids: &[Oid],
        params: &[Option<Value>],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        match Self::serialize_params(param_oids, params) {
            Ok(encoded) => Ok(encoded),
            Err(err) => {
                write_sync(&mut self.write_buf);
                self.flush_write()?;
                self.drain_to_ready()?;
                Err(err)
            }
        }
    }

    /// Bind + Describe(portal) + Execute + Close(statement) + Sync
    /// (§4.2 steps 5-9), returning the portal's row description.
    fn bind_execute_close_sync(&mut self, encoded: &[Option<Vec<u8>>]) -> Result<Vec<backend::FieldDescription>> {
        let refs: Vec<BindParam<'_>> = encoded.iter().map(|p| p.as_deref()).collect();
        write_bind(&mut self.write_buf, "", "", &refs);
        write_describe(&mut self.write_buf, DESCRIBE_PORTAL, "");
        write_execute(&mut self.write_buf, "", 0);
        write_close(&mut self.write_buf, DESCRIBE_STATEMENT, "");
        write_sync(&mut self.write_buf);
        self.flush_write()?;

        let frame = self.next_message()?;
        match frame.type_byte {
            backend_msg::BIND_COMPLETE => {}
            backend_msg::ERROR_RESPONSE => {
                let err = self.server_error(&frame.payload)?;
                self.drain_to_ready()?;
                return Err(err);
            }
            other => return Err(self.unexpected("awaiting BindComplete", other)),
        }

        let frame = self.next_message()?;
        match frame.type_byte {
            backend_msg::NO_DATA => Ok(Vec::new()),
            backend_msg::ROW_DESCRIPTION => Ok(RowDescription::parse(&frame.payload)?.fields),
            backend_msg::ERROR_RESPONSE => {
                let err = self.server_error(&frame.payload)?;
                self.drain_to_ready()?;
                Err(err)
            }
            other => Err(self.unexpected("awaiting NoData/RowDescription for portal", other)),
        }
    }

    /// `exec` without parameters uses the simple query path; with parameters
    /// it drives the full extended-query sequence exactly once (§4.2).
    pub fn exec(&mut self, sql: &str, params: &[Option<Value>]) -> Result<ExecResult> {
        self.guard_available()?;
        trace!(sql, params = params.len(), "exec");
        if params.is_empty() {
            return self.exec_simple(sql);
        }

        let param_oids = self.parse_and_describe_statement(sql)?;
        let encoded = self.serialize_params_or_resync(&param_oids, params)?;
        self.bind_execute_close_sync(&encoded)?;

        let mut tag: Option<CommandComplete> = None;
        loop {
            let frame = self.next_message()?;
            match frame.type_byte {
                backend_msg::DATA_ROW => {}
                backend_msg::COMMAND_COMPLETE => {
                    tag = Some(CommandComplete::parse(&frame.payload)?);
                }
                backend_msg::EMPTY_QUERY_RESPONSE => {
                    self.drain_to_ready()?;
                    return Err(Error::Protocol("empty query string".into()));
                }
                backend_msg::CLOSE_COMPLETE => {}
                backend_msg::READY_FOR_QUERY => {
                    let byte = backend::parse_ready_for_query(&frame.payload)?;
                    self.transaction_status = Some(TransactionStatus::from_byte(byte)?);
                    let tag = tag.ok_or_else(|| Error::Protocol("no CommandComplete in extended query".into()))?;
                    return Ok(ExecResult { tag: tag.tag });
                }
                backend_msg::ERROR_RESPONSE => {
                    let err = self.server_error(&frame.payload)?;
                    self.drain_to_ready()?;
                    return Err(err);
                }
                other => return Err(self.unexpected("during extended exec", other)),
            }
        }
    }

    /// Always drives the extended-query sequence, so the result's row
    /// description and data rows are available via the returned stream.
    pub fn query(&mut self, sql: &str, params: &[Option<Value>]) -> Result<RowStream> {
        self.guard_available()?;
        trace!(sql, params = params.len(), "query");

        let param_oids = self.parse_and_describe_statement(sql)?;
        let encoded = self.serialize_params_or_resync(&param_oids, params)?;
        let columns = self.bind_execute_close_sync(&encoded)?;

        self.rows_open = true;
        Ok(RowStream::new(columns))
    }

    /// Issues `BEGIN` and returns a transaction handle. Fails if one is
    /// already outstanding on this connection.
    pub fn begin(&mut self) -> Result<Transaction> {
        self.guard_available()?;
        if self.tx_open {
            return Err(Error::already_engaged());
        }
        self.exec("BEGIN", &[])?;
        self.tx_open = true;
        Ok(Transaction::new())
    }

    /// Idempotent. Sends `Terminate` if the transport still appears usable,
    /// then closes it.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        debug!("closing connection");
        let mut buf = Vec::new();
        write_terminate(&mut buf);
        let _ = self.transport.write_all(&buf);
        self.transport.close()?;
        self.closed = true;
        Ok(())
    }

    pub(crate) fn decode_row(&self, raw: &[u8], columns: &[backend::FieldDescription]) -> Result<Row> {
        let data_row = DataRow::parse(raw)?;
        let raw_cols = data_row.columns()?;
        if raw_cols.len() != columns.len() {
            return Err(Error::Protocol("DataRow column count does not match RowDescription".into()));
        }
        let mut values = Vec::with_capacity(raw_cols.len());
        for (col, raw_col) in columns.iter().zip(raw_cols) {
            let value = match raw_col {
                None => None,
                Some(bytes) => {
                    let field = FieldView::new(
                        col.type_oid,
                        col.type_size,
                        col.type_mod,
                        col.format_code,
                        bytes,
                        &self.server_params,
                    );
                    Some(REGISTRY.deserialize(&field)?)
                }
            };
            values.push(value);
        }
        Ok(Row::new(values))
    }
}
