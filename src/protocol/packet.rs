use std::io::{Read, Write};

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};

/// Largest payload a single wire packet can carry. A payload of exactly
/// this size implies a continuation packet follows.
pub const MAX_PACKET_PAYLOAD: usize = 0xFFFFFF;

/// Packet header (zero-copy)
///
/// Layout matches the wire protocol:
/// - length: 3 bytes (little-endian, payload length)
/// - sequence_id: 1 byte
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct PacketHeader {
    pub length: [u8; 3],
    pub sequence_id: u8,
}

impl PacketHeader {
    pub fn encode(length: usize, sequence_id: u8) -> Self {
        let len = u32::to_le_bytes(length as u32);
        Self {
            length: [len[0], len[1], len[2]],
            sequence_id,
        }
    }

    pub fn encode_in_place(&mut self, length: usize, sequence_id: u8) {
        let len = u32::to_le_bytes(length as u32);
        self.length = [len[0], len[1], len[2]];
        self.sequence_id = sequence_id;
    }

    pub fn length(&self) -> usize {
        u32::from_le_bytes([self.length[0], self.length[1], self.length[2], 0]) as usize
    }
}

fn sequence_mismatch(expected: u8, got: u8) -> Error {
    Error::Connection(format!(
        "packet sequence out of order (expected {expected}, got {got})"
    ))
}

/// Read a complete logical payload, concatenating packets if they span
/// multiple 16MB chunks. `seq` is the expected sequence number of the first
/// packet; it is advanced past every packet consumed. A sequence mismatch is
/// a protocol desync and tears the connection.
pub fn read_payload<R: Read>(reader: &mut R, buffer: &mut Vec<u8>, seq: &mut u8) -> Result<()> {
    buffer.clear();

    let mut header = PacketHeader::new_zeroed();
    reader.read_exact(header.as_mut_bytes())?;

    if header.sequence_id != *seq {
        return Err(sequence_mismatch(*seq, header.sequence_id));
    }
    *seq = seq.wrapping_add(1);

    let mut current_length = header.length();
    read_exact_into(reader, buffer, current_length)?;

    while current_length == MAX_PACKET_PAYLOAD {
        reader.read_exact(header.as_mut_bytes())?;
        if header.sequence_id != *seq {
            return Err(sequence_mismatch(*seq, header.sequence_id));
        }
        *seq = seq.wrapping_add(1);

        current_length = header.length();
        read_exact_into(reader, buffer, current_length)?;
    }

    Ok(())
}

fn read_exact_into<R: Read>(reader: &mut R, buffer: &mut Vec<u8>, length: usize) -> Result<()> {
    let start = buffer.len();
    buffer.resize(start + length, 0);
    reader.read_exact(&mut buffer[start..])?;
    Ok(())
}

/// Write the payload held in `buffer` (layout: 4 bytes of header space
/// followed by the payload), splitting it into 16MB chunks and appending an
/// empty final packet when the payload length is an exact multiple of the
/// chunk size. `seq` is advanced past every packet emitted.
///
/// Headers are encoded in place over bytes that have already been flushed,
/// so the payload is written with a single pass and no copy.
pub fn write_payload<W: Write>(writer: &mut W, buffer: &mut [u8], seq: &mut u8) -> Result<()> {
    let mut buffer = buffer;

    loop {
        let chunk_size = buffer[4..].len().min(MAX_PACKET_PAYLOAD);
        PacketHeader::mut_from_bytes(&mut buffer[0..4])?.encode_in_place(chunk_size, *seq);
        writer.write_all(&buffer[..4 + chunk_size])?;
        *seq = seq.wrapping_add(1);

        if chunk_size < MAX_PACKET_PAYLOAD {
            break;
        }

        buffer = &mut buffer[MAX_PACKET_PAYLOAD..];
    }
    writer.flush()?;
    Ok(())
}

/// Enforce `max_allowed_packet` before any byte of the command hits the
/// socket. `already_flushed` marks a multi-part send whose earlier parts are
/// on the wire, after which the connection cannot be reused.
pub fn check_max_packet(payload_len: usize, limit: usize, already_flushed: bool) -> Result<()> {
    if limit > 0 && payload_len > limit {
        return Err(Error::MaxPacketExceeded {
            size: payload_len,
            limit,
            must_reconnect: already_flushed,
        });
    }
    Ok(())
}

/// Read column definition packets into one buffer, each prefixed with its
/// native-endian u32 length, so definitions can be sliced without another
/// read pass.
pub fn read_column_definition_packets<R: Read>(
    reader: &mut R,
    out: &mut Vec<u8>,
    num_columns: usize,
    seq: &mut u8,
) -> Result<()> {
    out.clear();
    let mut header = PacketHeader::new_zeroed();

    for _ in 0..num_columns {
        reader.read_exact(header.as_mut_bytes())?;
        if header.sequence_id != *seq {
            return Err(sequence_mismatch(*seq, header.sequence_id));
        }
        *seq = seq.wrapping_add(1);

        let length = header.length();
        out.extend((length as u32).to_ne_bytes());

        let start = out.len();
        out.resize(start + length, 0);
        reader.read_exact(&mut out[start..])?;
    }

    Ok(())
}

#[cfg(test)]
#[path = "packet_test.rs"]
mod packet_test;
