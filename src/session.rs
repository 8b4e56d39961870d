use std::collections::VecDeque;
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::buffer::BufferSet;
use crate::codec::{ParamValue, substitute_params};
use crate::col::ColumnDefinition;
use crate::constant::CapabilityFlags;
use crate::context::{Context, ServerVersion, StateChange};
use crate::error::{Error, Result, eyre};
use crate::message::prepared::read_prepare_ok;
use crate::message::{
    ChangeDbMessage, ClientMessage, CloseStmtMessage, ExecuteMessage, LongDataMessage,
    PingMessage, PrepareMessage, QueryMessage, QuitMessage, ResetConnectionMessage,
    ResetStmtMessage, SetOptionMessage,
};
use crate::opts::Opts;
use crate::prepare_cache::{PrepareCache, PrepareEntry, PrepareResult};
use crate::protocol::connection::auth::{self, AuthContext, plugin_by_name};
use crate::protocol::connection::handshake::{
    AuthSwitchRequest, HandshakeResponse, InitialHandshake, negotiate_capabilities,
    write_ssl_request,
};
use crate::protocol::packet::{
    self, MAX_PACKET_PAYLOAD, check_max_packet, read_column_definition_packets,
};
use crate::protocol::response::{ErrPayloadBytes, OkPayload, OkPayloadBytes, read_eof_packet};
use crate::protocol::primitive::read_int_lenenc;
use crate::redo::{RedoMessage, TransactionSaver};
use crate::registry;
use crate::resultset::{CommandResult, OwnedRow, ResultSet};
use crate::stream::{AbortHandle, Stream, Transport};

/// Validation ping timeout used by the pool.
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Chunk size for COM_STMT_SEND_LONG_DATA and LOCAL INFILE streaming.
const STREAM_CHUNK: usize = 0x20_0000;

/// A server statement handle, backed by a ref-counted prepare cache entry.
#[derive(Debug)]
pub struct Statement {
    pub(crate) entry: Arc<PrepareEntry>,
    pub(crate) sql: String,
}

impl Statement {
    pub fn id(&self) -> u32 {
        self.entry.statement_id()
    }

    pub fn num_params(&self) -> u16 {
        self.entry.result.num_params
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.entry.result.columns
    }
}

/// Handle for cancelling the statement running on another thread's session:
/// opens a short-lived side session and issues `KILL QUERY <thread-id>`.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    opts: Opts,
    thread_id: u32,
}

impl CancelHandle {
    pub fn kill_query(&self) -> Result<()> {
        let mut opts = self.opts.clone();
        opts.transaction_replay = false;
        opts.galera_allowed_states = None;
        opts.init_command = None;

        let mut side = Session::connect(&opts)?;
        let result = side.query_drop(&format!("KILL QUERY {}", self.thread_id));
        side.close();
        result
    }
}

enum RowEvent {
    Row(Vec<u8>),
    Terminator(OkPayload),
}

/// One client connection: socket, negotiated context, prepare cache and
/// redo log. Not usable from two threads at once; exclusive ownership (or
/// the pool checkout) is the mutual exclusion for a whole request/response
/// cycle.
pub struct Session {
    transport: Transport,
    buffers: BufferSet,
    ctx: Context,
    opts: Opts,
    seq: u8,
    prepare_cache: PrepareCache,
    redo: Option<TransactionSaver>,
    broken: bool,
    /// Cap on buffered rows per result set; 0 is unlimited. Overflowing
    /// rows are drained off the socket but not stored.
    pub max_rows: usize,
    pub(crate) last_used: Instant,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("broken", &self.broken)
            .finish()
    }
}

impl Session {
    /// Open a connection: socket, protocol-10 handshake, optional TLS
    /// upgrade, authentication exchange, optional compression, and the
    /// post-connect session setup.
    pub fn connect(opts: &Opts) -> Result<Self> {
        let cred = opts.credential()?;
        let stream = Stream::connect(opts)?;
        let mut transport = Transport::Plain(stream);
        let mut buffers = BufferSet::new();
        let mut seq: u8 = 0;

        packet::read_payload(&mut transport, &mut buffers.read_buffer, &mut seq)?;
        let handshake = InitialHandshake::parse(&buffers.read_buffer)?;
        let capabilities = negotiate_capabilities(opts, handshake.capabilities)?;
        debug!(
            server = %handshake.server_version,
            thread_id = handshake.connection_id,
            "handshake received"
        );

        let mut ssl_active = false;
        if capabilities.contains(CapabilityFlags::CLIENT_SSL) {
            write_ssl_request(buffers.new_write_buffer(), capabilities);
            packet::write_payload(&mut transport, buffers.write_buffer.as_mut_slice(), &mut seq)?;
            transport = match transport {
                Transport::Plain(stream) => {
                    Transport::Plain(stream.upgrade_to_tls(&opts.host, opts.ssl_mode)?)
                }
                other => other,
            };
            ssl_active = true;
        }

        let auth_ctx = AuthContext { ssl_active, opts };

        // offer the provider's plugin, else the server's; fall back to
        // mysql_native_password for plugins we cannot start with (the
        // server will switch if it disagrees)
        let announced = opts
            .credential_provider
            .as_ref()
            .and_then(|p| p.default_plugin().map(str::to_string))
            .unwrap_or_else(|| handshake.auth_plugin_name.clone());
        let mut plugin = plugin_by_name(&announced)
            .unwrap_or_else(|_| Box::new(auth::NativePassword));
        let mut seed = handshake.seed.clone();

        let initial = plugin.initial(&cred, &seed, &auth_ctx)?;
        let response = HandshakeResponse {
            capabilities,
            user: &cred.user,
            auth_response: &initial,
            database: opts.db.as_deref(),
            auth_plugin_name: plugin.name(),
            connection_attributes: &opts.connection_attributes,
        };
        response.encode(buffers.new_write_buffer());
        packet::write_payload(&mut transport, buffers.write_buffer.as_mut_slice(), &mut seq)?;

        // authentication sub-protocol
        let ok = loop {
            packet::read_payload(&mut transport, &mut buffers.read_buffer, &mut seq)?;
            match buffers.read_buffer.first().copied() {
                Some(0x00) => {
                    break OkPayload::parse(OkPayloadBytes(&buffers.read_buffer), capabilities)?;
                }
                Some(0xFF) => return Err(ErrPayloadBytes(&buffers.read_buffer).into()),
                Some(0xFE) => {
                    let switch = AuthSwitchRequest::parse(&buffers.read_buffer)?;
                    debug!(plugin = %switch.plugin_name, "auth switch requested");
                    plugin = plugin_by_name(&switch.plugin_name)?;
                    seed = switch.seed.clone();
                    let reply = plugin.initial(&cred, &seed, &auth_ctx)?;
                    buffers.new_write_buffer().extend_from_slice(&reply);
                    packet::write_payload(
                        &mut transport,
                        buffers.write_buffer.as_mut_slice(),
                        &mut seq,
                    )?;
                }
                Some(0x01) => {
                    let data = buffers.read_buffer[1..].to_vec();
                    if let Some(reply) = plugin.more_data(&data, &cred, &seed, &auth_ctx)? {
                        buffers.new_write_buffer().extend_from_slice(&reply);
                        packet::write_payload(
                            &mut transport,
                            buffers.write_buffer.as_mut_slice(),
                            &mut seq,
                        )?;
                    }
                }
                other => {
                    return Err(Error::Connection(format!(
                        "unexpected packet during authentication: {other:?}"
                    )));
                }
            }
        };

        if capabilities.contains(CapabilityFlags::CLIENT_COMPRESS) {
            transport = transport.enable_compression();
        }

        let mut ctx = Context::new(
            capabilities,
            ServerVersion::parse(&handshake.server_version),
            handshake.connection_id,
            ok.status_flags,
            opts.db.clone(),
        );
        ctx.isolation = opts.transaction_isolation;

        let cache_capacity = if opts.use_server_prep_stmts {
            opts.prep_stmt_cache_size
        } else {
            0
        };

        let mut session = Session {
            transport,
            buffers,
            ctx,
            opts: opts.clone(),
            seq: 0,
            prepare_cache: PrepareCache::new(cache_capacity),
            redo: opts
                .transaction_replay
                .then(|| TransactionSaver::new(opts.transaction_replay_size)),
            broken: false,
            max_rows: 0,
            last_used: Instant::now(),
        };
        session.post_connect()?;
        Ok(session)
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn thread_id(&self) -> u32 {
        self.ctx.thread_id
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Handle that tears down the socket out from under any in-flight read.
    pub fn abort_handle(&self) -> Result<AbortHandle> {
        Ok(self.transport.abort_handle()?)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            opts: self.opts.clone(),
            thread_id: self.ctx.thread_id,
        }
    }

    fn check_broken<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_conn_broken() {
                self.broken = true;
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // command cycle
    // ------------------------------------------------------------------

    /// Start a command cycle: reset both sequence counters, encode the
    /// message and flush it as framed packets.
    fn send_message(&mut self, msg: &impl ClientMessage) -> Result<()> {
        self.seq = 0;
        self.transport.reset_compress_seq();

        msg.encode(self.buffers.new_write_buffer())?;
        check_max_packet(
            self.buffers.payload_len(),
            self.ctx.max_allowed_packet,
            false,
        )?;

        packet::write_payload(
            &mut self.transport,
            self.buffers.write_buffer.as_mut_slice(),
            &mut self.seq,
        )
        .map_err(|e| self.attach_description(e, msg))
    }

    fn attach_description(&self, error: Error, msg: &impl ClientMessage) -> Error {
        match error {
            Error::Io(e) => Error::Connection(format!("{} failed: {e}", msg.description())),
            other => other,
        }
    }

    fn read_packet(&mut self) -> Result<()> {
        packet::read_payload(&mut self.transport, &mut self.buffers.read_buffer, &mut self.seq)
    }

    fn read_results(&mut self, binary: bool) -> Result<Vec<CommandResult>> {
        let mut results = Vec::new();
        loop {
            results.push(self.read_one_result(binary)?);
            if !self.ctx.more_results() {
                break;
            }
        }
        Ok(results)
    }

    fn read_one_result(&mut self, binary: bool) -> Result<CommandResult> {
        self.read_packet()?;
        match self.buffers.read_buffer.first().copied() {
            Some(0x00) => {
                let ok = OkPayload::parse(
                    OkPayloadBytes(&self.buffers.read_buffer),
                    self.ctx.capabilities,
                )?;
                self.ctx.update_from_ok(&ok);
                Ok(CommandResult::Ok(ok))
            }
            Some(0xFF) => Err(ErrPayloadBytes(&self.buffers.read_buffer).into()),
            Some(0xFB) => self.handle_local_infile(binary),
            Some(_) => self.read_result_set(binary),
            None => Err(Error::Connection("empty response packet".into())),
        }
    }

    fn read_result_set(&mut self, binary: bool) -> Result<CommandResult> {
        let (column_count, _) = read_int_lenenc(&self.buffers.read_buffer)?;
        let columns = self.read_columns(column_count as usize)?;

        if !self.ctx.eof_deprecated() {
            self.read_packet()?;
            read_eof_packet(&self.buffers.read_buffer)?;
        }

        let mut rows = Vec::new();
        let cap = if self.max_rows == 0 { usize::MAX } else { self.max_rows };
        let terminator = loop {
            match self.read_row_event()? {
                RowEvent::Row(raw) => {
                    if rows.len() < cap {
                        rows.push(raw);
                    }
                }
                RowEvent::Terminator(ok) => break ok,
            }
        };

        Ok(CommandResult::ResultSet(ResultSet::new(
            columns,
            rows,
            binary,
            terminator,
            self.opts.use_alias_as_name,
        )))
    }

    fn read_columns(&mut self, count: usize) -> Result<Arc<[ColumnDefinition]>> {
        read_column_definition_packets(
            &mut self.transport,
            &mut self.buffers.column_definition_buffer,
            count,
            &mut self.seq,
        )?;

        let mut columns = Vec::with_capacity(count);
        let mut buf = self.buffers.column_definition_buffer.as_slice();
        for _ in 0..count {
            let (len_bytes, rest) = buf
                .split_at_checked(4)
                .ok_or_else(|| Error::LibraryBug(eyre!("short column definition buffer")))?;
            let len = u32::from_ne_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
                as usize;
            let (payload, rest) = rest
                .split_at_checked(len)
                .ok_or_else(|| Error::LibraryBug(eyre!("short column definition buffer")))?;
            columns.push(ColumnDefinition::parse(payload.to_vec())?);
            buf = rest;
        }
        Ok(columns.into())
    }

    /// Read the next packet of a row stream: a row payload, the stream
    /// terminator, or a server error.
    fn read_row_event(&mut self) -> Result<RowEvent> {
        self.read_packet()?;
        let first = self.buffers.read_buffer.first().copied();
        let len = self.buffers.read_buffer.len();

        match first {
            Some(0xFF) => Err(ErrPayloadBytes(&self.buffers.read_buffer).into()),
            Some(0xFE)
                if (self.ctx.eof_deprecated() && len < MAX_PACKET_PAYLOAD)
                    || (!self.ctx.eof_deprecated() && len < 9) =>
            {
                let ok = if self.ctx.eof_deprecated() {
                    OkPayload::parse(
                        OkPayloadBytes(&self.buffers.read_buffer),
                        self.ctx.capabilities,
                    )?
                } else {
                    let eof = read_eof_packet(&self.buffers.read_buffer)?;
                    OkPayload {
                        warnings: eof.warnings(),
                        status_flags: eof.status_flags(),
                        ..OkPayload::default()
                    }
                };
                self.ctx.update_from_ok(&ok);
                Ok(RowEvent::Terminator(ok))
            }
            Some(_) => Ok(RowEvent::Row(self.buffers.read_buffer.clone())),
            None => Err(Error::Connection("empty row packet".into())),
        }
    }

    /// LOCAL INFILE request: stream the named file back in packets,
    /// terminated by an empty packet, then read the server's verdict.
    fn handle_local_infile(&mut self, binary: bool) -> Result<CommandResult> {
        let filename = String::from_utf8_lossy(&self.buffers.read_buffer[1..]).into_owned();
        let allowed = self.opts.allow_local_infile;
        let mut file_error = None;

        if allowed {
            match std::fs::File::open(&filename) {
                Ok(mut file) => {
                    let mut chunk = vec![0_u8; STREAM_CHUNK];
                    loop {
                        let n = file.read(&mut chunk)?;
                        if n == 0 {
                            break;
                        }
                        self.buffers.new_write_buffer().extend_from_slice(&chunk[..n]);
                        packet::write_payload(
                            &mut self.transport,
                            self.buffers.write_buffer.as_mut_slice(),
                            &mut self.seq,
                        )?;
                    }
                }
                Err(e) => file_error = Some(e),
            }
        }

        // empty packet ends (or aborts) the transfer
        self.buffers.new_write_buffer();
        packet::write_payload(
            &mut self.transport,
            self.buffers.write_buffer.as_mut_slice(),
            &mut self.seq,
        )?;

        let response = self.read_one_result(binary);

        if !allowed {
            return Err(Error::BadConfig(format!(
                "server requested LOCAL INFILE '{filename}' but allowLocalInfile is disabled"
            )));
        }
        if let Some(e) = file_error {
            return Err(Error::BadUsage(format!(
                "could not read LOCAL INFILE '{filename}': {e}"
            )));
        }
        response
    }

    // ------------------------------------------------------------------
    // redo / replay
    // ------------------------------------------------------------------

    fn finish_command(
        &mut self,
        result: Result<Vec<CommandResult>>,
        redo: Option<RedoMessage>,
    ) -> Result<Vec<CommandResult>> {
        match result {
            Ok(results) => {
                self.record_redo(redo);
                Ok(results)
            }
            Err(e) if e.is_transient() && self.redo.is_some() => self.replay(redo, e),
            Err(e) => self.check_broken(Err(e)),
        }
    }

    fn record_redo(&mut self, redo: Option<RedoMessage>) {
        let in_transaction = self.ctx.in_transaction();
        if let Some(saver) = &mut self.redo {
            if !in_transaction {
                // transaction boundary (or autocommit command) reached
                saver.clear();
            } else if let Some(message) = redo {
                saver.record(message);
            }
        }
    }

    /// Rebuild the connection and replay the recorded transaction, then
    /// re-run the failed command. Whenever replay is not possible the
    /// original failure surfaces.
    fn replay(
        &mut self,
        failed: Option<RedoMessage>,
        original: Error,
    ) -> Result<Vec<CommandResult>> {
        let Some(failed) = failed else {
            self.broken = true;
            return Err(original);
        };
        let saved = match &mut self.redo {
            Some(saver) if saver.can_replay() => saver.take_messages(),
            _ => {
                self.broken = true;
                return Err(original);
            }
        };

        warn!(
            error = %original,
            commands = saved.len(),
            "transient failure; replaying transaction on a replacement connection"
        );

        let replacement = match Session::connect(&self.opts) {
            Ok(session) => session,
            Err(_) => {
                self.broken = true;
                return Err(original);
            }
        };
        *self = replacement;

        for message in &saved {
            if self.run_redo_message(message).is_err() {
                self.broken = true;
                return Err(original);
            }
        }

        // the final replay result is what the caller sees
        let results = self.run_redo_message(&failed)?;

        let in_transaction = self.ctx.in_transaction();
        if let Some(saver) = &mut self.redo {
            if in_transaction {
                saver.restore(saved);
                saver.record(failed);
            } else {
                saver.clear();
            }
        }
        Ok(results)
    }

    fn run_redo_message(&mut self, message: &RedoMessage) -> Result<Vec<CommandResult>> {
        match message {
            RedoMessage::Query(sql) => self.query_inner(sql),
            RedoMessage::ChangeDb(db) => {
                self.send_message(&ChangeDbMessage::new(db))?;
                self.read_results(false)
            }
            RedoMessage::Execute { sql, params } => {
                // re-prepare and substitute the fresh statement id
                let stmt = self.prepare(sql)?;
                let result = self.execute_inner(&stmt, params);
                let close = self.close_statement(stmt);
                result.and_then(|r| close.map(|()| r))
            }
        }
    }

    // ------------------------------------------------------------------
    // text protocol
    // ------------------------------------------------------------------

    pub fn query(&mut self, sql: &str) -> Result<Vec<CommandResult>> {
        let redo = self
            .redo
            .is_some()
            .then(|| RedoMessage::Query(sql.to_string()));
        let result = self.query_inner(sql);
        self.last_used = Instant::now();
        self.finish_command(result, redo)
    }

    fn query_inner(&mut self, sql: &str) -> Result<Vec<CommandResult>> {
        self.send_message(&QueryMessage::new(sql))?;
        self.read_results(false)
    }

    pub fn query_drop(&mut self, sql: &str) -> Result<()> {
        self.query(sql).map(|_| ())
    }

    /// Write several text commands back to back, then read their response
    /// sequences strictly in issue order. A failure mid-pipeline leaves
    /// responses on the wire, so the session is torn down rather than
    /// resynchronized.
    pub fn pipeline(&mut self, sqls: &[&str]) -> Result<Vec<Vec<CommandResult>>> {
        for sql in sqls {
            self.seq = 0;
            self.transport.reset_compress_seq();
            QueryMessage::new(sql).encode(self.buffers.new_write_buffer())?;
            check_max_packet(
                self.buffers.payload_len(),
                self.ctx.max_allowed_packet,
                false,
            )?;
            let written = packet::write_payload(
                &mut self.transport,
                self.buffers.write_buffer.as_mut_slice(),
                &mut self.seq,
            );
            self.check_broken(written)?;
        }

        let mut all = Vec::with_capacity(sqls.len());
        for _ in sqls {
            // every response sequence restarts after its command packet
            self.seq = 1;
            match self.read_results(false) {
                Ok(results) => all.push(results),
                Err(e) => {
                    self.broken = true;
                    return Err(e);
                }
            }
        }
        self.last_used = Instant::now();
        Ok(all)
    }

    /// First cell of the first row of a single-result query, as text.
    fn query_string_value(&mut self, sql: &str, column: usize) -> Result<Option<String>> {
        let results = self.query(sql)?;
        for result in results {
            if let Some(rs) = result.as_result_set() {
                if let Some(row) = rs.row(0) {
                    return row.get::<Option<String>>(column);
                }
            }
        }
        Ok(None)
    }

    pub fn change_database(&mut self, database: &str) -> Result<()> {
        let redo = self
            .redo
            .is_some()
            .then(|| RedoMessage::ChangeDb(database.to_string()));
        let result = self
            .send_message(&ChangeDbMessage::new(database))
            .and_then(|()| self.read_results(false));
        let results = self.finish_command(result, redo)?;
        drop(results);
        self.ctx.database = Some(database.to_string());
        self.ctx.state_flags |= StateChange::DATABASE;
        Ok(())
    }

    // ------------------------------------------------------------------
    // prepared statements
    // ------------------------------------------------------------------

    /// Prepare `sql`, consulting the per-session cache first.
    pub fn prepare(&mut self, sql: &str) -> Result<Statement> {
        if let Some(entry) = self.prepare_cache.get(sql) {
            return Ok(Statement {
                entry,
                sql: sql.to_string(),
            });
        }

        let result = self.prepare_inner(sql);
        let prepared = self.check_broken(result)?;
        let put = self.prepare_cache.put(sql, prepared);

        // losing a prepare race hands back the winner's entry; our own
        // statement id is closed
        if let Some(id) = put.discard_id {
            self.send_message(&CloseStmtMessage { statement_id: id })?;
        }
        if let Some(id) = put.evict_close_id {
            self.send_message(&CloseStmtMessage { statement_id: id })?;
        }

        Ok(Statement {
            entry: put.entry,
            sql: sql.to_string(),
        })
    }

    fn prepare_inner(&mut self, sql: &str) -> Result<PrepareResult> {
        self.send_message(&PrepareMessage::new(sql))?;
        self.read_packet()?;

        if self.buffers.read_buffer.first() == Some(&0xFF) {
            return Err(ErrPayloadBytes(&self.buffers.read_buffer).into());
        }

        let prepare_ok = read_prepare_ok(&self.buffers.read_buffer)?;
        let statement_id = prepare_ok.statement_id();
        let num_params = prepare_ok.num_params();
        let num_columns = prepare_ok.num_columns();

        // parameter definitions are not kept
        if num_params > 0 {
            read_column_definition_packets(
                &mut self.transport,
                &mut self.buffers.column_definition_buffer,
                num_params as usize,
                &mut self.seq,
            )?;
            if !self.ctx.eof_deprecated() {
                self.read_packet()?;
                read_eof_packet(&self.buffers.read_buffer)?;
            }
        }

        let columns = if num_columns > 0 {
            let columns = self.read_columns(num_columns as usize)?;
            if !self.ctx.eof_deprecated() {
                self.read_packet()?;
                read_eof_packet(&self.buffers.read_buffer)?;
            }
            columns
        } else {
            Arc::from([])
        };

        Ok(PrepareResult {
            statement_id,
            num_params,
            columns,
        })
    }

    /// Execute a prepared statement with bound parameters.
    pub fn execute_prepared(
        &mut self,
        stmt: &Statement,
        params: &[ParamValue],
    ) -> Result<Vec<CommandResult>> {
        if params.len() != stmt.num_params() as usize {
            return Err(Error::BadUsage(format!(
                "statement expects {} parameters, got {}",
                stmt.num_params(),
                params.len()
            )));
        }

        let redo = self.redo.is_some().then(|| RedoMessage::Execute {
            sql: stmt.sql.clone(),
            params: params.to_vec(),
        });
        let result = self.execute_inner(stmt, params);
        self.last_used = Instant::now();
        self.finish_command(result, redo)
    }

    fn execute_inner(
        &mut self,
        stmt: &Statement,
        params: &[ParamValue],
    ) -> Result<Vec<CommandResult>> {
        self.send_message(&ExecuteMessage::new(stmt.id(), params, &stmt.sql))?;
        self.read_results(true)
    }

    /// Prepare, execute and release in one call. Without
    /// `use_server_prep_stmts` the parameters are substituted client-side
    /// into a text query.
    pub fn run_prepared(
        &mut self,
        sql: &str,
        params: &[ParamValue],
    ) -> Result<Vec<CommandResult>> {
        if !self.opts.use_server_prep_stmts {
            let text = substitute_params(sql, params)?;
            return self.query(&text);
        }

        let stmt = self.prepare(sql)?;
        let result = self.execute_prepared(&stmt, params);
        let close = self.close_statement(stmt);
        result.and_then(|r| close.map(|()| r))
    }

    /// Execute one prepared statement over a slice of parameter sets,
    /// accumulating per-row affected counts. A failing row surfaces a
    /// batch error preserving the counts up to that point.
    pub fn execute_batch(
        &mut self,
        stmt: &Statement,
        param_sets: &[Vec<ParamValue>],
    ) -> Result<Vec<u64>> {
        let mut counts = Vec::with_capacity(param_sets.len());
        for params in param_sets {
            match self.execute_prepared(stmt, params) {
                Ok(results) => {
                    let affected = results
                        .first()
                        .and_then(CommandResult::as_ok)
                        .map_or(0, |ok| ok.affected_rows);
                    counts.push(affected);
                }
                Err(cause) => {
                    return Err(Error::Batch {
                        counts,
                        cause: Box::new(cause),
                    });
                }
            }
        }
        Ok(counts)
    }

    /// Ship an oversized parameter in chunks ahead of execution.
    pub fn send_long_data(
        &mut self,
        stmt: &Statement,
        param_index: u16,
        data: &[u8],
    ) -> Result<()> {
        let chunk_size = match self.ctx.max_allowed_packet {
            0 => STREAM_CHUNK,
            limit => limit.saturating_sub(16).clamp(1024, STREAM_CHUNK),
        };
        for chunk in data.chunks(chunk_size) {
            let msg = LongDataMessage {
                statement_id: stmt.id(),
                param_index,
                chunk,
            };
            let result = self.send_message(&msg);
            self.check_broken(result)?;
        }
        Ok(())
    }

    /// Discard accumulated long data and cursor state server-side.
    pub fn reset_statement(&mut self, stmt: &Statement) -> Result<()> {
        let result = self
            .send_message(&ResetStmtMessage {
                statement_id: stmt.id(),
            })
            .and_then(|()| self.read_results(false))
            .map(|_| ());
        self.check_broken(result)
    }

    /// Toggle multi-statement support for this connection.
    pub fn set_multi_statements(&mut self, enable: bool) -> Result<()> {
        let result = self
            .send_message(&SetOptionMessage {
                multi_statements: enable,
            })
            .and_then(|()| self.read_results(false))
            .map(|_| ());
        self.check_broken(result)
    }

    /// Release a statement handle; the server-side statement is closed once
    /// the last handle of an evicted cache entry goes away.
    pub fn close_statement(&mut self, stmt: Statement) -> Result<()> {
        if let Some(id) = self.prepare_cache.decrement_use(&stmt.entry) {
            let result = self.send_message(&CloseStmtMessage { statement_id: id });
            self.check_broken(result)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // streaming
    // ------------------------------------------------------------------

    /// Execute a text query whose rows are fetched in batches on demand.
    /// The returned handle borrows the session exclusively: the socket
    /// stays positioned mid-stream until the handle is dropped or closed.
    pub fn query_streaming(
        &mut self,
        sql: &str,
        fetch_size: usize,
    ) -> Result<StreamingResult<'_>> {
        let fetch_size = if fetch_size == 0 {
            match self.opts.default_fetch_size {
                0 => {
                    return Err(Error::BadUsage(
                        "streaming requires a fetch size greater than zero".into(),
                    ));
                }
                configured => configured,
            }
        } else {
            fetch_size
        };

        self.start_streaming(sql, fetch_size)
    }

    fn start_streaming(&mut self, sql: &str, fetch_size: usize) -> Result<StreamingResult<'_>> {
        if let Err(e) = self.send_message(&QueryMessage::new(sql)) {
            if e.is_conn_broken() {
                self.broken = true;
            }
            return Err(e);
        }
        if let Err(e) = self.read_packet() {
            if e.is_conn_broken() {
                self.broken = true;
            }
            return Err(e);
        }

        match self.buffers.read_buffer.first().copied() {
            Some(0x00) => {
                let ok = match OkPayload::parse(
                    OkPayloadBytes(&self.buffers.read_buffer),
                    self.ctx.capabilities,
                ) {
                    Ok(ok) => ok,
                    Err(e) => {
                        if e.is_conn_broken() {
                            self.broken = true;
                        }
                        return Err(e);
                    }
                };
                self.ctx.update_from_ok(&ok);
                let alias = self.opts.use_alias_as_name;
                Ok(StreamingResult {
                    columns: Arc::from([]),
                    batch: VecDeque::new(),
                    fetch_size,
                    binary: false,
                    row_stream_done: true,
                    drained: !self.ctx.more_results(),
                    alias_as_name: alias,
                    session: self,
                })
            }
            Some(0xFF) => {
                let e: Error = ErrPayloadBytes(&self.buffers.read_buffer).into();
                if e.is_conn_broken() {
                    self.broken = true;
                }
                Err(e)
            }
            Some(_) => {
                let (column_count, _) = match read_int_lenenc(&self.buffers.read_buffer) {
                    Ok(v) => v,
                    Err(e) => {
                        if e.is_conn_broken() {
                            self.broken = true;
                        }
                        return Err(e);
                    }
                };
                let columns = match self.read_columns(column_count as usize) {
                    Ok(columns) => columns,
                    Err(e) => {
                        if e.is_conn_broken() {
                            self.broken = true;
                        }
                        return Err(e);
                    }
                };
                if !self.ctx.eof_deprecated() {
                    if let Err(e) = self.read_packet() {
                        if e.is_conn_broken() {
                            self.broken = true;
                        }
                        return Err(e);
                    }
                    if let Err(e) = read_eof_packet(&self.buffers.read_buffer) {
                        if e.is_conn_broken() {
                            self.broken = true;
                        }
                        return Err(e);
                    }
                }
                let alias = self.opts.use_alias_as_name;
                Ok(StreamingResult {
                    columns,
                    batch: VecDeque::new(),
                    fetch_size,
                    binary: false,
                    row_stream_done: false,
                    drained: false,
                    alias_as_name: alias,
                    session: self,
                })
            }
            None => {
                let e = Error::Connection("empty response packet".into());
                if e.is_conn_broken() {
                    self.broken = true;
                }
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    pub fn ping(&mut self) -> Result<()> {
        let result = self
            .send_message(&PingMessage)
            .and_then(|()| self.read_results(false))
            .map(|_| ());
        self.check_broken(result)
    }

    /// Override the socket read timeout for subsequent calls; `None`
    /// blocks indefinitely. The connect-time configuration stays the
    /// default that validation restores afterwards.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.transport.set_read_timeout(timeout)?;
        self.ctx.state_flags |= StateChange::NETWORK_TIMEOUT;
        Ok(())
    }

    /// Lightweight validation used by the pool before handing out an idle
    /// connection.
    pub fn is_valid(&mut self, timeout: Duration) -> bool {
        if self.broken {
            return false;
        }
        let _ = self.transport.set_read_timeout(Some(timeout));
        let alive = self.ping().is_ok();
        let _ = self.transport.set_read_timeout(self.opts.socket_timeout);
        alive
    }

    pub fn validation_timeout() -> Duration {
        VALIDATION_TIMEOUT
    }

    /// Reset session state before pool reuse. Skipped entirely when
    /// nothing diverged from the connect-time defaults.
    pub fn reset(&mut self) -> Result<()> {
        if let Some(saver) = &mut self.redo {
            saver.clear();
        }

        if !self.opts.use_reset_connection && self.ctx.state_flags.is_empty() {
            return Ok(());
        }

        // the server forgets prepared statements on reset
        let drained = self.prepare_cache.drain();
        drop(drained);
        self.prepare_cache = PrepareCache::new(if self.opts.use_server_prep_stmts {
            self.opts.prep_stmt_cache_size
        } else {
            0
        });

        let result = self
            .send_message(&ResetConnectionMessage)
            .and_then(|()| self.read_results(false))
            .map(|_| ());
        self.check_broken(result)?;

        // restore client-side state the server reset does not cover
        if self.ctx.state_flags.contains(StateChange::NETWORK_TIMEOUT) {
            let _ = self.transport.set_read_timeout(self.opts.socket_timeout);
        }
        self.ctx.state_flags = StateChange::empty();
        self.ctx.database = self.opts.db.clone();
        Ok(())
    }

    /// Best-effort QUIT and socket teardown.
    pub fn close(mut self) {
        let _ = self.send_message(&QuitMessage);
    }

    // ------------------------------------------------------------------
    // post-connect setup
    // ------------------------------------------------------------------

    fn post_connect(&mut self) -> Result<()> {
        use std::fmt::Write as _;

        let mut command = format!("SET autocommit={}", self.opts.autocommit as u8);
        command.push_str(", sql_mode = concat(@@sql_mode,',STRICT_TRANS_TABLES')");
        if self
            .ctx
            .capabilities
            .contains(CapabilityFlags::CLIENT_SESSION_TRACK)
        {
            command.push_str(", session_track_schema=1");
        }
        if let Some(vars) = &self.opts.session_variables {
            command.push_str(", ");
            command.push_str(vars);
        }
        match self.opts.timezone.as_deref() {
            None | Some("disable") => {}
            Some(tz) => {
                command.push_str(", time_zone='");
                let mut escaped = String::new();
                crate::codec::escape_string_into(&mut escaped, tz);
                command.push_str(&escaped);
                command.push('\'');
            }
        }
        if let Some(isolation) = self.opts.transaction_isolation {
            let variable = if self.ctx.server_version.mariadb
                || !self.ctx.server_version.at_least(8, 0, 0)
            {
                "tx_isolation"
            } else {
                "transaction_isolation"
            };
            let _ = write!(
                command,
                ", {variable}='{}'",
                isolation.as_sql().replace(' ', "-")
            );
        }
        self.query_drop(&command)?;

        if self.opts.assure_read_only {
            self.query_drop("SET SESSION TRANSACTION READ ONLY")?;
        }

        self.fetch_server_limits()?;
        self.check_galera_state()?;

        if let Some(init) = self.opts.init_command.clone() {
            self.query_drop(&init)?;
        }

        Ok(())
    }

    /// `max_allowed_packet` and `wait_timeout`, from the per-host cache of
    /// the last successful handshake when available.
    fn fetch_server_limits(&mut self) -> Result<()> {
        let host_key = registry::host_key(&self.opts);
        if let Some((max_packet, wait_timeout)) = registry::host_limits(&host_key) {
            self.ctx.max_allowed_packet = max_packet as usize;
            self.ctx.wait_timeout = wait_timeout;
            return Ok(());
        }

        let (max_packet, wait_timeout) =
            match self.query("SELECT @@max_allowed_packet, @@wait_timeout") {
                Ok(results) => {
                    let rs = results
                        .into_iter()
                        .find_map(CommandResult::into_result_set)
                        .ok_or_else(|| {
                            Error::Connection("missing result for server limits".into())
                        })?;
                    let row = rs.row(0).ok_or_else(|| {
                        Error::Connection("missing row for server limits".into())
                    })?;
                    (row.get::<u64>(0)?, row.get::<Option<u64>>(1)?)
                }
                // a Galera node refusing SELECT while non-primary still
                // answers SHOW VARIABLES
                Err(Error::Server(_)) => self.fetch_server_limits_fallback()?,
                Err(other) => return Err(other),
            };

        self.ctx.max_allowed_packet = max_packet as usize;
        self.ctx.wait_timeout = wait_timeout;
        registry::store_host_limits(&host_key, max_packet, wait_timeout);
        Ok(())
    }

    fn fetch_server_limits_fallback(&mut self) -> Result<(u64, Option<u64>)> {
        let mut max_packet = 0;
        let mut wait_timeout = None;
        let results = self.query(
            "SHOW VARIABLES WHERE Variable_name in ('max_allowed_packet','wait_timeout')",
        )?;
        for result in results {
            let Some(rs) = result.as_result_set() else {
                continue;
            };
            for idx in 0..rs.len() {
                let row = match rs.row(idx) {
                    Some(row) => row,
                    None => break,
                };
                let name = row.get::<String>(0)?;
                let value = row.get::<u64>(1)?;
                match name.as_str() {
                    "max_allowed_packet" => max_packet = value,
                    "wait_timeout" => wait_timeout = Some(value),
                    _ => {}
                }
            }
        }
        Ok((max_packet, wait_timeout))
    }

    fn check_galera_state(&mut self) -> Result<()> {
        let Some(allowed) = self.opts.galera_allowed_states.clone() else {
            return Ok(());
        };

        let state = self
            .query_string_value("show status like 'wsrep_local_state'", 1)?
            .unwrap_or_default();
        if !allowed.iter().any(|candidate| candidate == &state) {
            return Err(Error::Connection(format!(
                "galera node state '{state}' is not in the allowed set"
            )));
        }
        Ok(())
    }
}

/// A result set being fetched in batches; the session's socket is reserved
/// until the stream is fully read, skipped or closed. Dropping the handle
/// drains the remaining rows so the connection is command-ready again.
pub struct StreamingResult<'s> {
    session: &'s mut Session,
    columns: Arc<[ColumnDefinition]>,
    batch: VecDeque<Vec<u8>>,
    fetch_size: usize,
    binary: bool,
    row_stream_done: bool,
    drained: bool,
    alias_as_name: bool,
}

impl StreamingResult<'_> {
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// Next row, pulling another batch off the socket when the buffered
    /// batch is exhausted.
    pub fn next_row(&mut self) -> Result<Option<OwnedRow>> {
        loop {
            if let Some(raw) = self.batch.pop_front() {
                return Ok(Some(OwnedRow {
                    columns: self.columns.clone(),
                    raw,
                    binary: self.binary,
                    alias_as_name: self.alias_as_name,
                }));
            }
            if self.row_stream_done {
                return Ok(None);
            }
            self.fetch_batch()?;
        }
    }

    fn fetch_batch(&mut self) -> Result<()> {
        for _ in 0..self.fetch_size {
            let event = self.session.read_row_event();
            match self.session.check_broken(event)? {
                RowEvent::Row(raw) => self.batch.push_back(raw),
                RowEvent::Terminator(_) => {
                    self.row_stream_done = true;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Skip the rest of the stream (and any trailing results) so the
    /// session is ready for another command.
    pub fn close(mut self) -> Result<()> {
        self.drain()
    }

    fn drain(&mut self) -> Result<()> {
        if self.drained {
            return Ok(());
        }
        while !self.row_stream_done {
            self.fetch_batch()?;
            self.batch.clear();
        }
        while self.session.ctx.more_results() {
            let skipped = self.session.read_one_result(self.binary);
            self.session.check_broken(skipped)?;
        }
        self.drained = true;
        Ok(())
    }
}

impl Drop for StreamingResult<'_> {
    fn drop(&mut self) {
        if !self.drained && self.drain().is_err() {
            self.session.broken = true;
        }
    }
}
