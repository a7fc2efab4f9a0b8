//! Seekable byte stream underpinning both codec directions
//!
//! AMF is network byte order, but some embedded payloads (notably byte
//! arrays produced by little-endian hosts) flip the multi-byte accessors,
//! so the stream carries an endianness switch. Reads past the end fail
//! with `EndOfStream`; writes always succeed by growing the buffer, and a
//! write behind the cursor overwrites in place (the SOL container
//! back-patches its length field this way).

use std::io::SeekFrom;

use bytes::{Bytes, BytesMut};

use crate::error::{DecodeError, Error, Result};

/// Byte order for multi-byte reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    /// Network byte order (AMF default)
    #[default]
    Big,
    Little,
}

/// A bidirectional cursor over a growable byte buffer
#[derive(Debug, Default)]
pub struct ByteStream {
    buf: BytesMut,
    pos: usize,
    endian: Endian,
}

impl ByteStream {
    /// Create an empty stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty stream with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            pos: 0,
            endian: Endian::Big,
        }
    }

    /// Current byte order
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Switch the byte order for subsequent multi-byte accesses
    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    /// Total buffer length in bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check whether the buffer holds no bytes at all
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes between the cursor and the end of the buffer
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// True iff the cursor is at or past the end
    pub fn at_eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Current cursor position
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Move the cursor. Seeking past the end is allowed; the gap is
    /// zero-filled by the next write. Seeking before the start is an error.
    pub fn seek(&mut self, from: SeekFrom) -> Result<usize> {
        let target = match from {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(n) => self.pos as i64 + n,
            SeekFrom::End(n) => self.buf.len() as i64 + n,
        };

        if target < 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of stream",
            )));
        }

        self.pos = target as usize;
        Ok(self.pos)
    }

    /// View up to `n` bytes at the cursor without advancing
    pub fn peek(&self, n: usize) -> &[u8] {
        let end = (self.pos + n).min(self.buf.len());
        if self.pos >= end {
            return &[];
        }
        &self.buf[self.pos..end]
    }

    /// The whole buffer, cursor-independent
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Append bytes at the end of the buffer, leaving the cursor alone.
    /// This is the feed path for streaming decoders.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Drop everything after the cursor
    pub fn truncate(&mut self) {
        let pos = self.pos.min(self.buf.len());
        self.buf.truncate(pos);
    }

    /// Reset to an empty buffer
    pub fn clear(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    /// Hand the buffered bytes out as a frozen `Bytes`, resetting the stream
    pub fn take_bytes(&mut self) -> Bytes {
        self.pos = 0;
        self.buf.split().freeze()
    }

    /// Consume the stream, yielding its contents
    pub fn into_bytes(mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Read exactly `n` bytes, advancing the cursor
    pub fn read_bytes(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(Error::EndOfStream);
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..start + n])
    }

    /// Read `n` bytes as a validated UTF-8 string
    pub fn read_utf8(&mut self, n: usize) -> Result<String> {
        let bytes = self.read_bytes(n)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| Error::Decode(DecodeError::InvalidUtf8))
    }

    /// Write raw bytes at the cursor, overwriting and growing as needed
    pub fn write_bytes(&mut self, data: &[u8]) {
        if self.pos > self.buf.len() {
            // a seek went past the end; zero-fill the gap
            let pos = self.pos;
            self.buf.resize(pos, 0);
        }

        if self.pos == self.buf.len() {
            self.buf.extend_from_slice(data);
        } else {
            let end = self.pos + data.len();
            if end > self.buf.len() {
                self.buf.resize(end, 0);
            }
            self.buf[self.pos..end].copy_from_slice(data);
        }

        self.pos += data.len();
    }

    /// Read an unsigned integer of `width` bytes (1–4), honoring the
    /// endianness switch
    pub fn read_uint(&mut self, width: usize) -> Result<u32> {
        debug_assert!((1..=4).contains(&width));
        let endian = self.endian;
        let bytes = self.read_bytes(width)?;

        let mut value: u32 = 0;
        match endian {
            Endian::Big => {
                for &b in bytes {
                    value = (value << 8) | u32::from(b);
                }
            }
            Endian::Little => {
                for &b in bytes.iter().rev() {
                    value = (value << 8) | u32::from(b);
                }
            }
        }
        Ok(value)
    }

    /// Read a signed integer of `width` bytes (1–4), sign-extended
    pub fn read_int(&mut self, width: usize) -> Result<i32> {
        let raw = self.read_uint(width)?;
        let shift = 32 - width * 8;
        Ok(((raw << shift) as i32) >> shift)
    }

    /// Write the low `width` bytes of an unsigned integer
    pub fn write_uint(&mut self, value: u32, width: usize) {
        debug_assert!((1..=4).contains(&width));
        let be = value.to_be_bytes();
        let mut bytes = [0u8; 4];
        bytes[..width].copy_from_slice(&be[4 - width..]);
        if self.endian == Endian::Little {
            bytes[..width].reverse();
        }
        self.write_bytes(&bytes[..width]);
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_uint(1)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.read_uint(2)? as u16)
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        self.read_uint(3)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_uint(4)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_int(1)? as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_int(2)? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_int(4)
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_uint(u32::from(value), 2);
    }

    pub fn write_u24(&mut self, value: u32) {
        self.write_uint(value, 3);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_uint(value, 4);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_uint(value as u16 as u32, 2);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_uint(value as u32, 4);
    }

    /// Read an IEEE 754 double, honoring the endianness switch
    pub fn read_f64(&mut self) -> Result<f64> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        if self.endian == Endian::Little {
            raw.reverse();
        }
        Ok(f64::from_bits(u64::from_be_bytes(raw)))
    }

    /// Write an IEEE 754 double, honoring the endianness switch
    pub fn write_f64(&mut self, value: f64) {
        let mut raw = value.to_bits().to_be_bytes();
        if self.endian == Endian::Little {
            raw.reverse();
        }
        self.write_bytes(&raw);
    }

    /// Read an IEEE 754 single-precision float
    pub fn read_f32(&mut self) -> Result<f32> {
        let bytes = self.read_bytes(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        if self.endian == Endian::Little {
            raw.reverse();
        }
        Ok(f32::from_bits(u32::from_be_bytes(raw)))
    }

    /// Write an IEEE 754 single-precision float
    pub fn write_f32(&mut self, value: f32) {
        let mut raw = value.to_bits().to_be_bytes();
        if self.endian == Endian::Little {
            raw.reverse();
        }
        self.write_bytes(&raw);
    }
}

impl From<&[u8]> for ByteStream {
    fn from(data: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(data),
            pos: 0,
            endian: Endian::Big,
        }
    }
}

impl From<Vec<u8>> for ByteStream {
    fn from(data: Vec<u8>) -> Self {
        Self::from(data.as_slice())
    }
}

impl From<Bytes> for ByteStream {
    fn from(data: Bytes) -> Self {
        Self::from(data.as_ref())
    }
}
