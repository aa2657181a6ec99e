//! Bounds-checked little-endian reader over a borrowed blob.

use crate::errors::DecodeError;

#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Reads exactly `n` bytes or fails without moving.
    pub fn read_bytes(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining_len() {
            return Err(DecodeError::TruncatedBuffer {
                context,
                offset: self.pos,
            });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn read_raw4(&mut self, context: &'static str) -> Result<[u8; 4], DecodeError> {
        let bytes = self.read_bytes(4, context)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(raw)
    }

    pub fn read_u32(&mut self, context: &'static str) -> Result<u32, DecodeError> {
        self.read_raw4(context).map(u32::from_le_bytes)
    }

    /// Peeks a u32 without consuming it.
    pub fn peek_u32(&self) -> Option<u32> {
        let end = self.pos.checked_add(4)?;
        let bytes = self.data.get(self.pos..end)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Some(u32::from_le_bytes(raw))
    }

    /// Reads a u32-length-prefixed string, dropping NUL padding. Non-ASCII bytes are
    /// replaced rather than rejected.
    pub fn read_prefixed_string(&mut self, context: &'static str) -> Result<String, DecodeError> {
        let start = self.pos;
        let len = self.read_u32(context)? as usize;
        let bytes = match self.read_bytes(len, context) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.pos = start;
                return Err(e);
            }
        };
        let trimmed = match bytes.iter().rposition(|b| *b != 0) {
            Some(last) => &bytes[..=last],
            None => &[],
        };
        Ok(String::from_utf8_lossy(trimmed).into_owned())
    }

    /// Moves to the first offset at or after the current position where `needle` is
    /// stored as a little-endian u32. Returns the anchor offset; the reader is left just
    /// past it.
    pub fn seek_u32(&mut self, needle: u32) -> Option<usize> {
        let pattern = needle.to_le_bytes();
        let found = self.data[self.pos..]
            .windows(4)
            .position(|w| w == pattern)?;
        let anchor = self.pos + found;
        self.pos = anchor + 4;
        Some(anchor)
    }
}
