//! Bounds-checked sequential reader over an immutable byte buffer.
//!
//! Every read either returns the requested bytes or fails with
//! [`ParseError::TruncatedInput`]; the position never moves past the end.

use byteorder::{BigEndian, ByteOrder};

use super::encoding::TextEncoding;
use crate::error::{ParseError, Result};

#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.buf.len() {
            return Err(ParseError::InvalidOffset {
                offset,
                len: self.buf.len(),
            });
        }
        self.pos = offset;
        Ok(())
    }

    /// Returns the next `len` bytes without consuming them.
    pub fn peek(&self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        Ok(&self.buf[self.pos..self.pos + len])
    }

    pub fn slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = self.peek(len)?;
        self.pos += len;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.slice(len).map(|_| ())
    }

    /// Consumes everything left in the buffer.
    pub fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.slice(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.slice(2)?))
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u24(self.slice(3)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.slice(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(self.slice(8)?))
    }

    /// ID3v2 size field: 7 significant bits per byte, high bit ignored.
    pub fn read_synchsafe_u32(&mut self) -> Result<u32> {
        let bytes = self.slice(4)?;
        Ok(bytes
            .iter()
            .fold(0u32, |acc, &b| (acc << 7) | u32::from(b & 0x7F)))
    }

    pub fn read_fixed_string(&mut self, len: usize, encoding: TextEncoding) -> Result<String> {
        let bytes = self.slice(len)?;
        Ok(encoding.decode(encoding.first_value(bytes)))
    }

    /// Reads up to and including the terminator, returning the decoded text.
    pub fn read_null_terminated_string(&mut self, encoding: TextEncoding) -> Result<String> {
        let tail = &self.buf[self.pos..];
        let end = encoding
            .find_terminator(tail)
            .ok_or(ParseError::TruncatedInput {
                offset: self.buf.len(),
                needed: encoding.unit_width(),
                available: 0,
            })?;
        let text = encoding.decode(&tail[..end]);
        self.pos += end + encoding.unit_width();
        Ok(text)
    }

    fn ensure(&self, len: usize) -> Result<()> {
        if self.remaining() < len {
            return Err(ParseError::TruncatedInput {
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            });
        }
        Ok(())
    }
}
