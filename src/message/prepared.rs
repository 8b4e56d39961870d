use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::codec::ParamValue;
use crate::constant::{CommandByte, PARAM_UNSIGNED_FLAG};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::protocol::row::parameter_bitmap_len;

use super::{ClientMessage, summarize_sql};

/// COM_STMT_PREPARE OK response (zero-copy). Servers send at least 12
/// bytes including the warning count.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct PrepareOk {
    statement_id: U32LE,
    num_columns: U16LE,
    num_params: U16LE,
    _reserved: u8,
    warning_count: U16LE,
}

impl PrepareOk {
    pub fn statement_id(&self) -> u32 {
        self.statement_id.get()
    }

    pub fn num_columns(&self) -> u16 {
        self.num_columns.get()
    }

    pub fn num_params(&self) -> u16 {
        self.num_params.get()
    }

    pub fn warning_count(&self) -> u16 {
        self.warning_count.get()
    }
}

/// Read a COM_STMT_PREPARE response payload (leading 0x00 status byte).
pub fn read_prepare_ok(payload: &[u8]) -> Result<&PrepareOk> {
    let (status, data) = read_int_1(payload)?;
    if status != 0x00 || data.len() < 11 {
        return Err(Error::Connection("malformed prepare response".into()));
    }
    PrepareOk::ref_from_bytes(&data[..11]).map_err(Error::from_debug)
}

/// COM_STMT_PREPARE
#[derive(Debug)]
pub struct PrepareMessage<'a> {
    pub sql: &'a str,
}

impl<'a> PrepareMessage<'a> {
    pub fn new(sql: &'a str) -> Self {
        Self { sql }
    }
}

impl ClientMessage for PrepareMessage<'_> {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_int_1(out, CommandByte::StmtPrepare as u8);
        out.extend_from_slice(self.sql.as_bytes());
        Ok(())
    }

    fn description(&self) -> String {
        format!("PREPARE: {}", summarize_sql(self.sql))
    }
}

/// COM_STMT_EXECUTE
///
/// Carries the statement id, an iteration count of 1, the parameter NULL
/// bitmap, a new-params-bound flag with per-parameter type codes, and the
/// encoded values. Parameters already shipped with COM_STMT_SEND_LONG_DATA
/// are listed in `long_data_params` and contribute no value bytes.
#[derive(Debug)]
pub struct ExecuteMessage<'a> {
    pub statement_id: u32,
    pub params: &'a [ParamValue],
    pub long_data_params: &'a [u16],
    pub sql: &'a str,
}

impl<'a> ExecuteMessage<'a> {
    pub fn new(statement_id: u32, params: &'a [ParamValue], sql: &'a str) -> Self {
        Self {
            statement_id,
            params,
            long_data_params: &[],
            sql,
        }
    }

    fn is_long_data(&self, index: usize) -> bool {
        self.long_data_params.contains(&(index as u16))
    }
}

impl ClientMessage for ExecuteMessage<'_> {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_int_1(out, CommandByte::StmtExecute as u8);
        write_int_4(out, self.statement_id);
        write_int_1(out, 0x00); // CURSOR_TYPE_NO_CURSOR
        write_int_4(out, 1); // iteration count

        if self.params.is_empty() {
            return Ok(());
        }

        let bitmap_start = out.len();
        out.resize(bitmap_start + parameter_bitmap_len(self.params.len()), 0);
        for (i, param) in self.params.iter().enumerate() {
            if param.is_null() {
                out[bitmap_start + (i >> 3)] |= 1 << (i & 7);
            }
        }

        // new-params-bound flag; types are always sent
        write_int_1(out, 0x01);
        for (i, param) in self.params.iter().enumerate() {
            let (ty, unsigned) = if self.is_long_data(i) {
                (crate::constant::ColumnType::MYSQL_TYPE_BLOB, false)
            } else {
                param.type_code()
            };
            write_int_1(out, ty as u8);
            write_int_1(out, if unsigned { PARAM_UNSIGNED_FLAG } else { 0 });
        }

        for (i, param) in self.params.iter().enumerate() {
            if !self.is_long_data(i) {
                param.encode_binary(out);
            }
        }
        Ok(())
    }

    fn description(&self) -> String {
        format!("EXECUTE: {}", summarize_sql(self.sql))
    }

    fn is_redoable(&self) -> bool {
        // long-data chunks are not buffered, so such executions cannot be
        // replayed faithfully
        self.long_data_params.is_empty()
    }
}

/// COM_STMT_SEND_LONG_DATA: one chunk of an oversized parameter. No reply.
#[derive(Debug)]
pub struct LongDataMessage<'a> {
    pub statement_id: u32,
    pub param_index: u16,
    pub chunk: &'a [u8],
}

impl ClientMessage for LongDataMessage<'_> {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.chunk.is_empty() {
            return Err(Error::BadUsage(
                "long data chunk must not be empty".into(),
            ));
        }
        write_int_1(out, CommandByte::StmtSendLongData as u8);
        write_int_4(out, self.statement_id);
        write_int_2(out, self.param_index);
        out.extend_from_slice(self.chunk);
        Ok(())
    }

    fn description(&self) -> String {
        format!(
            "STMT_SEND_LONG_DATA: statement {} parameter {}",
            self.statement_id, self.param_index
        )
    }

    fn expected_response_count(&self) -> usize {
        0
    }
}

/// COM_STMT_CLOSE. No reply.
#[derive(Debug)]
pub struct CloseStmtMessage {
    pub statement_id: u32,
}

impl ClientMessage for CloseStmtMessage {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_int_1(out, CommandByte::StmtClose as u8);
        write_int_4(out, self.statement_id);
        Ok(())
    }

    fn description(&self) -> String {
        format!("STMT_CLOSE: statement {}", self.statement_id)
    }

    fn expected_response_count(&self) -> usize {
        0
    }
}

/// COM_STMT_RESET: discard long data and cursor state server-side.
#[derive(Debug)]
pub struct ResetStmtMessage {
    pub statement_id: u32,
}

impl ClientMessage for ResetStmtMessage {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_int_1(out, CommandByte::StmtReset as u8);
        write_int_4(out, self.statement_id);
        Ok(())
    }

    fn description(&self) -> String {
        format!("STMT_RESET: statement {}", self.statement_id)
    }
}
