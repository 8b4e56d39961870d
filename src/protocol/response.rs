use crate::constant::{CapabilityFlags, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use zerocopy::byteorder::little_endian::U16 as U16LE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Session-track entry type for a schema change.
const SESSION_TRACK_SCHEMA: u64 = 1;

/// The payload part of an OK packet
#[derive(Debug, Clone, Copy)]
pub struct OkPayloadBytes<'a>(pub &'a [u8]);

impl<'a> OkPayloadBytes<'a> {
    pub fn assert_eof(&self) -> Result<()> {
        if self.0.first() == Some(&0xFE) {
            Ok(())
        } else {
            Err(Error::Connection("expected OK-EOF packet".into()))
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.0
    }
}

/// The OK packet parsed from OkPayloadBytes
#[derive(Debug, Clone, Default)]
pub struct OkPayload {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: ServerStatusFlags,
    pub warnings: u16,
    /// New current schema, when the server reported a tracked schema change
    pub schema_change: Option<String>,
}

impl OkPayload {
    /// Parse an OK (or OK-EOF) payload. Session-state information is only
    /// present when CLIENT_SESSION_TRACK was negotiated.
    pub fn parse(bytes: OkPayloadBytes<'_>, capabilities: CapabilityFlags) -> Result<Self> {
        let (header, data) = read_int_1(bytes.bytes())?;
        if header != 0x00 && header != 0xFE {
            return Err(Error::Connection(format!(
                "expected OK packet, got header 0x{header:02X}"
            )));
        }

        let (affected_rows, data) = read_int_lenenc(data)?;
        let (last_insert_id, data) = read_int_lenenc(data)?;
        let (status_flags, data) = read_int_2(data)?;
        let (warnings, mut data) = read_int_2(data)?;
        let status_flags = ServerStatusFlags::from_bits_truncate(status_flags);

        let mut schema_change = None;
        if capabilities.contains(CapabilityFlags::CLIENT_SESSION_TRACK) && !data.is_empty() {
            // info string, then the state-change block when flagged
            let (_info, rest) = read_string_lenenc(data)?;
            data = rest;

            if status_flags.contains(ServerStatusFlags::SERVER_SESSION_STATE_CHANGED) {
                let (mut state, _) = read_string_lenenc(data)?;
                while !state.is_empty() {
                    let (entry_type, rest) = read_int_lenenc(state)?;
                    let (entry, rest) = read_string_lenenc(rest)?;
                    state = rest;
                    if entry_type == SESSION_TRACK_SCHEMA {
                        let (schema, _) = read_string_lenenc(entry)?;
                        schema_change = Some(String::from_utf8_lossy(schema).into_owned());
                    }
                }
            }
        }

        Ok(OkPayload {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            schema_change,
        })
    }
}

#[derive(Debug)]
pub struct ErrPayloadBytes<'a>(pub &'a [u8]);

impl<'a> ErrPayloadBytes<'a> {
    pub fn from_payload(payload: &'a [u8]) -> Option<Self> {
        if payload.first() == Some(&0xFF) {
            Some(Self(payload))
        } else {
            None
        }
    }
}

/// The ERR packet parsed from ErrPayloadBytes
#[derive(Debug, Clone, thiserror::Error)]
#[error("ERROR {} ({}): {}", self.error_code, self.sql_state, self.message)]
pub struct ErrPayload {
    pub error_code: u16,
    pub sql_state: String,
    pub message: String,
}

impl TryFrom<ErrPayloadBytes<'_>> for ErrPayload {
    type Error = Error;

    fn try_from(bytes: ErrPayloadBytes<'_>) -> Result<Self> {
        let (header, data) = read_int_1(bytes.0)?;
        debug_assert_eq!(header, 0xFF);

        let (error_code, data) = read_int_2(data)?;

        // SQLSTATE only follows when the '#' marker is present
        let (sql_state, message) = if data.first() == Some(&b'#') {
            let (state, rest) = read_string_fix(&data[1..], 5)?;
            (String::from_utf8_lossy(state).into_owned(), rest)
        } else {
            ("HY000".to_string(), data)
        };

        Ok(ErrPayload {
            error_code,
            sql_state,
            message: String::from_utf8_lossy(message).into_owned(),
        })
    }
}

/// Legacy EOF packet payload after the 0xFE header (4 bytes)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct EofPacket {
    warnings: U16LE,
    status_flags: U16LE,
}

impl EofPacket {
    pub fn warnings(&self) -> u16 {
        self.warnings.get()
    }

    pub fn status_flags(&self) -> ServerStatusFlags {
        ServerStatusFlags::from_bits_truncate(self.status_flags.get())
    }
}

/// Read a legacy EOF packet (header byte 0xFE, payload length < 9) - zero-copy
pub fn read_eof_packet(payload: &[u8]) -> Result<&EofPacket> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFE || data.len() < 4 {
        return Err(Error::Connection("expected EOF packet".into()));
    }

    Ok(EofPacket::ref_from_bytes(&data[..4]).map_err(Error::from_debug)?)
}

/// Whether a payload is a legacy EOF packet (as opposed to a row whose first
/// cell starts with 0xFE).
pub fn is_eof_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&0xFE) && payload.len() < 9
}

#[cfg(test)]
#[path = "response_test.rs"]
mod response_test;
