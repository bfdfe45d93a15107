//! Opaque plugin state blobs and the in-memory stream they travel through

use std::io::{self, Read, Seek, SeekFrom, Write};

/// Growable in-memory byte stream with a cursor
///
/// Plugins write their state into one of these and read it back from one;
/// the bytes themselves are never interpreted by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStream {
    data: Vec<u8>,
    position: usize,
}

impl MemoryStream {
    /// Empty stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream positioned at the start of `data`
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }

    /// Cursor position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Total length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the stream holds no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Move the cursor back to the start
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Borrow the contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Take the contents
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.data.len().saturating_sub(self.position);
        let count = available.min(buf.len());
        if count == 0 {
            return Ok(0);
        }
        buf[..count].copy_from_slice(&self.data[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let end = self.position + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.position..end].copy_from_slice(buf);
        self.position = end;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => self.position as i64 + offset,
            SeekFrom::End(offset) => self.data.len() as i64 + offset,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        self.position = target as usize;
        Ok(self.position as u64)
    }
}
