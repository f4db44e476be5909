//! Decoding primitives over a byte slice.
//!
//! A `Reader` yields one token at a time (byte, LEB128 integer, float,
//! name, vector) and tracks its absolute position for diagnostics.

use crate::error::{Error, LexError, Result};

#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current absolute offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn lex(&self, kind: LexError) -> Error {
        Error::Lexing {
            offset: self.pos,
            kind,
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| self.lex(LexError::UnexpectedEof))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.lex(LexError::UnexpectedEof))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| self.lex(LexError::UnexpectedEof))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Unsigned LEB128 of at most `bits` bits.
    pub fn read_leb_u(&mut self, bits: u32) -> Result<u64> {
        let start = self.pos;
        let max_bytes = bits.div_ceil(7);
        let mut result: u64 = 0;
        let mut shift = 0;
        for _ in 0..max_bytes {
            let byte = self.read_u8()?;
            let group = (byte & 0x7F) as u64;
            if shift + 7 > bits && group >> (bits - shift) != 0 {
                return Err(Error::Lexing {
                    offset: start,
                    kind: LexError::IntegerOverflow,
                });
            }
            result |= group << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(Error::Lexing {
            offset: start,
            kind: LexError::IntegerOverflow,
        })
    }

    /// Signed LEB128 of at most `bits` bits, sign-extended from bit 6 of the
    /// final group.
    pub fn read_leb_s(&mut self, bits: u32) -> Result<i64> {
        let start = self.pos;
        let overflow = Error::Lexing {
            offset: start,
            kind: LexError::IntegerOverflow,
        };
        let max_bytes = bits.div_ceil(7);
        let mut result: i64 = 0;
        let mut shift = 0;
        for i in 0..max_bytes {
            let byte = self.read_u8()?;
            let last_allowed = i + 1 == max_bytes;
            if last_allowed && bits == 64 && byte & 0x80 == 0 && byte != 0x00 && byte != 0x7F {
                return Err(overflow);
            }
            result |= ((byte & 0x7F) as i64) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                if bits < 64 {
                    let min = -(1i64 << (bits - 1));
                    let max = (1i64 << (bits - 1)) - 1;
                    if result < min || result > max {
                        return Err(overflow);
                    }
                }
                return Ok(result);
            }
        }
        Err(overflow)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_leb_u(32)? as u32)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_leb_s(32)? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.read_leb_s(64)
    }

    /// Raw IEEE-754 single, kept as bits so NaN payloads survive.
    pub fn read_f32_bits(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_f64_bits(&mut self) -> Result<u64> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    /// Length-prefixed UTF-8 name.
    pub fn read_name(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let start = self.pos;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| Error::Lexing {
                offset: start,
                kind: LexError::InvalidUtf8,
            })
    }

    /// Length-prefixed vector; `item` runs exactly `len` times, in order.
    pub fn read_vec<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let len = self.read_u32()? as usize;
        // Every item consumes at least one byte, so a length beyond the
        // remaining input cannot be honest.
        if len > self.remaining() {
            return Err(self.lex(LexError::UnexpectedEof));
        }
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(item(self)?);
        }
        Ok(items)
    }

    /// Run `body` and require that it consumes exactly `size` bytes.
    pub fn sized<T>(&mut self, size: usize, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let start = self.pos;
        if size > self.remaining() {
            return Err(self.lex(LexError::UnexpectedEof));
        }
        let value = body(self)?;
        let consumed = self.pos - start;
        if consumed != size {
            return Err(Error::parsing(
                start,
                format!("size mismatch: declared {size} bytes, consumed {consumed}"),
            ));
        }
        Ok(value)
    }

    /// Read a u32 byte length, then decode a body of exactly that length.
    pub fn read_sized<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let size = self.read_u32()? as usize;
        self.sized(size, body)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }
}
