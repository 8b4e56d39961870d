/// A set of reusable buffers for protocol communication
///
/// `Session` uses a single `BufferSet` for all its operations.
#[derive(Debug)]
pub struct BufferSet {
    /// General-purpose read buffer
    /// Bytes are valid during an operation.
    pub read_buffer: Vec<u8>,

    /// General-purpose write buffer
    /// It always has at least 4 bytes which is reserved for the first packet header.
    /// It is followed by payload bytes without considering 16MB split.
    /// Layout: [4-byte header space][payload that is possibly larger than 16MB]
    /// Bytes are valid during an operation.
    pub write_buffer: Vec<u8>,

    /// ColumnDefinition packets in one buffer
    /// Bytes are valid during an operation.
    pub column_definition_buffer: Vec<u8>,

    mark: usize,
}

impl BufferSet {
    /// Create a new empty buffer set
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::new(),
            write_buffer: vec![0; 4],
            column_definition_buffer: Vec::new(),
            mark: 0,
        }
    }

    /// Clear the write buffer, reserve 4 bytes for the header, and return mutable access.
    #[inline]
    pub fn new_write_buffer(&mut self) -> &mut Vec<u8> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(&[0_u8; 4]);
        self.mark = self.write_buffer.len();
        &mut self.write_buffer
    }

    /// Get mutable access to the write buffer.
    #[inline]
    pub fn write_buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.write_buffer
    }

    /// Get the payload length (total buffer length minus 4-byte header).
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.write_buffer.len().saturating_sub(4)
    }

    /// Remember the current write position so a speculative section can be
    /// rolled back with [`reset_mark`](Self::reset_mark).
    #[inline]
    pub fn mark(&mut self) {
        self.mark = self.write_buffer.len();
    }

    /// Truncate the write buffer back to the last mark.
    #[inline]
    pub fn reset_mark(&mut self) {
        self.write_buffer.truncate(self.mark);
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "buffer_test.rs"]
mod buffer_test;
