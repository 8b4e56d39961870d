use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

/// Payloads below this size are framed uncompressed (`uncomp_len == 0`);
/// deflate overhead would exceed the gain.
pub const MIN_COMPRESS_LENGTH: usize = 50;

/// Largest uncompressed payload a single compressed frame may carry.
const MAX_FRAME_PAYLOAD: usize = 0xFFFFFF;

/// Compression wrapper negotiated with CLIENT_COMPRESS.
///
/// Frames the byte stream as `[comp_len:3 LE][comp_seq:1][uncomp_len:3 LE]`
/// followed by the (optionally deflated) payload. The compression layer
/// carries its own sequence counter, independent of the protocol packet
/// sequence, reset at each command cycle.
///
/// Writes are buffered until [`flush`](Write::flush), which emits one frame
/// per 16MB of buffered bytes. Reads are served from an internal buffer of
/// inflated bytes.
pub struct CompressedStream<S> {
    inner: S,
    seq: u8,
    read_buf: Vec<u8>,
    read_pos: usize,
    write_buf: Vec<u8>,
}

impl<S: Read + Write> CompressedStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            seq: 0,
            read_buf: Vec::new(),
            read_pos: 0,
            write_buf: Vec::new(),
        }
    }

    /// Reset the compression sequence for a new command cycle.
    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Pull one frame from the wire into the read buffer.
    fn fill(&mut self) -> io::Result<()> {
        let mut header = [0_u8; 7];
        self.inner.read_exact(&mut header)?;

        let comp_len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        let frame_seq = header[3];
        let uncomp_len = u32::from_le_bytes([header[4], header[5], header[6], 0]) as usize;

        if frame_seq != self.seq {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "compressed frame sequence out of order (expected {}, got {frame_seq})",
                    self.seq
                ),
            ));
        }
        self.seq = self.seq.wrapping_add(1);

        let mut compressed = vec![0_u8; comp_len];
        self.inner.read_exact(&mut compressed)?;

        if self.read_pos == self.read_buf.len() {
            self.read_buf.clear();
            self.read_pos = 0;
        }

        if uncomp_len == 0 {
            // frame payload was sent raw
            self.read_buf.extend_from_slice(&compressed);
        } else {
            let start = self.read_buf.len();
            let mut decoder = ZlibDecoder::new(compressed.as_slice());
            decoder.read_to_end(&mut self.read_buf)?;
            if self.read_buf.len() - start != uncomp_len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "compressed frame inflated to an unexpected length",
                ));
            }
        }
        Ok(())
    }

    fn write_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        let (body, uncomp_len) = if payload.len() >= MIN_COMPRESS_LENGTH {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(payload)?;
            (encoder.finish()?, payload.len())
        } else {
            (payload.to_vec(), 0)
        };

        let mut header = [0_u8; 7];
        header[..3].copy_from_slice(&(body.len() as u32).to_le_bytes()[..3]);
        header[3] = self.seq;
        header[4..].copy_from_slice(&(uncomp_len as u32).to_le_bytes()[..3]);
        self.seq = self.seq.wrapping_add(1);

        self.inner.write_all(&header)?;
        self.inner.write_all(&body)?;
        Ok(())
    }
}

impl<S: Read + Write> Read for CompressedStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.read_pos == self.read_buf.len() {
            self.fill()?;
        }
        let available = &self.read_buf[self.read_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.read_pos += n;
        Ok(n)
    }
}

impl<S: Read + Write> Write for CompressedStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let pending = std::mem::take(&mut self.write_buf);
        for chunk in pending.chunks(MAX_FRAME_PAYLOAD) {
            self.write_frame(chunk)?;
        }
        self.inner.flush()
    }
}

#[cfg(test)]
#[path = "compress_test.rs"]
mod compress_test;
