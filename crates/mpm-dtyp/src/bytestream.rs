//! Growable byte stream with a position cursor and explicit-endian scalar
//! accessors. This is the workhorse behind the dynamic parts of the wire
//! codecs: field records, BER content, MIB file tags.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::codepage::{self, Codepage};
use crate::{DtypError, Result};

/// Buffer growth step.
const ALLOCATION_STEP: usize = 4096;

/// Origin for [`ByteStream::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Start,
    Current,
    End,
}

/// An in-memory byte stream. Writes append at the cursor (overwriting and
/// extending as needed); reads advance the cursor and fail with
/// [`DtypError::Format`] when running past the end.
#[derive(Debug, Default, Clone)]
pub struct ByteStream {
    data: Vec<u8>,
    pos: usize,
}

macro_rules! scalar_rw {
    ($write_b:ident, $write_l:ident, $read_b:ident, $read_l:ident, $t:ty, $size:expr, $bo_write:ident, $bo_read:ident) => {
        pub fn $write_b(&mut self, value: $t) {
            let mut buf = [0u8; $size];
            BigEndian::$bo_write(&mut buf, value);
            self.write(&buf);
        }

        pub fn $write_l(&mut self, value: $t) {
            let mut buf = [0u8; $size];
            LittleEndian::$bo_write(&mut buf, value);
            self.write(&buf);
        }

        pub fn $read_b(&mut self) -> Result<$t> {
            let mut buf = [0u8; $size];
            self.read_exact(&mut buf)?;
            Ok(BigEndian::$bo_read(&buf))
        }

        pub fn $read_l(&mut self) -> Result<$t> {
            let mut buf = [0u8; $size];
            self.read_exact(&mut buf)?;
            Ok(LittleEndian::$bo_read(&buf))
        }
    };
}

impl ByteStream {
    /// Creates an empty stream with the given initial capacity.
    pub fn new(initial: usize) -> Self {
        ByteStream {
            data: Vec::with_capacity(initial),
            pos: 0,
        }
    }

    /// Creates a stream over a copy of existing data, cursor at the start.
    pub fn from_slice(data: &[u8]) -> Self {
        ByteStream {
            data: data.to_vec(),
            pos: 0,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// True when the cursor is at the end of the stream.
    pub fn eos(&self) -> bool {
        self.pos == self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Takes the underlying buffer, leaving the stream empty.
    pub fn take_buffer(&mut self) -> Vec<u8> {
        self.pos = 0;
        std::mem::take(&mut self.data)
    }

    /// Sets the cursor. Fails when the target lies outside `[0, size]`.
    pub fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<usize> {
        let base = match origin {
            SeekOrigin::Start => 0i64,
            SeekOrigin::Current => self.pos as i64,
            SeekOrigin::End => self.data.len() as i64,
        };
        let target = base + offset;
        if target < 0 || target > self.data.len() as i64 {
            return Err(DtypError::Format("seek outside of stream"));
        }
        self.pos = target as usize;
        Ok(self.pos)
    }

    /// Writes raw bytes at the cursor, growing the buffer in
    /// [`ALLOCATION_STEP`] increments when needed.
    pub fn write(&mut self, data: &[u8]) {
        let end = self.pos + data.len();
        if end > self.data.len() {
            if end > self.data.capacity() {
                let grow = (end - self.data.capacity()).max(ALLOCATION_STEP);
                self.data.reserve(grow);
            }
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(data);
        self.pos = end;
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write(&[value]);
    }

    /// Reads up to `buf.len()` bytes, returning the count actually copied.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    /// Reads exactly `buf.len()` bytes or fails without consuming anything.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.len() > self.remaining() {
            return Err(DtypError::Format("read past end of stream"));
        }
        buf.copy_from_slice(&self.data[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    scalar_rw!(write_u16_b, write_u16_l, read_u16_b, read_u16_l, u16, 2, write_u16, read_u16);
    scalar_rw!(write_u32_b, write_u32_l, read_u32_b, read_u32_l, u32, 4, write_u32, read_u32);
    scalar_rw!(write_u64_b, write_u64_l, read_u64_b, read_u64_l, u64, 8, write_u64, read_u64);
    scalar_rw!(write_i16_b, write_i16_l, read_i16_b, read_i16_l, i16, 2, write_i16, read_i16);
    scalar_rw!(write_i32_b, write_i32_l, read_i32_b, read_i32_l, i32, 4, write_i32, read_i32);
    scalar_rw!(write_i64_b, write_i64_l, read_i64_b, read_i64_l, i64, 8, write_i64, read_i64);
    scalar_rw!(write_f64_b, write_f64_l, read_f64_b, read_f64_l, f64, 8, write_f64, read_f64);

    /// Writes a signed value in LEB128 format.
    pub fn write_signed_leb128(&mut self, mut n: i64) {
        let mut encoded = [0u8; 10];
        let mut len = 0;
        loop {
            let mut byte = (n & 0x7F) as u8;
            n >>= 7;
            let more = if byte & 0x40 != 0 { n != -1 } else { n != 0 };
            if more {
                byte |= 0x80;
            }
            encoded[len] = byte;
            len += 1;
            if !more {
                break;
            }
        }
        self.write(&encoded[..len]);
    }

    /// Writes an unsigned value in LEB128 format.
    pub fn write_unsigned_leb128(&mut self, mut n: u64) {
        let mut encoded = [0u8; 10];
        let mut len = 0;
        loop {
            let mut byte = (n & 0x7F) as u8;
            n >>= 7;
            if n != 0 {
                byte |= 0x80;
            }
            encoded[len] = byte;
            len += 1;
            if n == 0 {
                break;
            }
        }
        self.write(&encoded[..len]);
    }

    pub fn read_signed_leb128(&mut self) -> Result<i64> {
        let mut result: i64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 {
                return Err(DtypError::Format("LEB128 value too long"));
            }
            result |= ((byte & 0x7F) as i64) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && (byte & 0x40) != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
        }
    }

    pub fn read_unsigned_leb128(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 {
                return Err(DtypError::Format("LEB128 value too long"));
            }
            result |= ((byte & 0x7F) as u64) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
    }

    /// Writes a string in the given codepage. When `prepend_length` is set
    /// the encoded byte count is written first: u16 big-endian below 2^15,
    /// otherwise u32 big-endian with the high bit set. When
    /// `null_terminate` is set a terminator of the codepage's natural unit
    /// width follows the content. Returns the total number of bytes written.
    pub fn write_string(
        &mut self,
        s: &str,
        cp: Codepage,
        prepend_length: bool,
        null_terminate: bool,
    ) -> usize {
        let encoded = codepage::encode_string(s, cp);
        let start = self.pos;
        if prepend_length {
            if encoded.len() < 0x8000 {
                self.write_u16_b(encoded.len() as u16);
            } else {
                self.write_u32_b(encoded.len() as u32 | 0x8000_0000);
            }
        }
        self.write(&encoded);
        if null_terminate {
            match cp.unit_width() {
                2 => self.write(&[0, 0]),
                4 => self.write(&[0, 0, 0, 0]),
                _ => self.write_u8(0),
            }
        }
        self.pos - start
    }

    /// Reads a string in the given codepage. Exactly one of the length
    /// sources applies: an explicit `byte_count`, a prepended length
    /// (`length_prepended`), or a null terminator scan (`null_terminated`).
    pub fn read_string(
        &mut self,
        cp: Codepage,
        byte_count: Option<usize>,
        length_prepended: bool,
        null_terminated: bool,
    ) -> Result<String> {
        let count = self.encoded_string_length(byte_count, length_prepended, null_terminated, cp.unit_width())?;
        let value = codepage::decode_string(&self.data[self.pos..self.pos + count], cp)?;
        self.pos += count;
        if null_terminated {
            self.pos = (self.pos + cp.unit_width()).min(self.data.len());
        }
        Ok(value)
    }

    fn encoded_string_length(
        &mut self,
        byte_count: Option<usize>,
        length_prepended: bool,
        null_terminated: bool,
        unit_width: usize,
    ) -> Result<usize> {
        let count = if length_prepended {
            if self.eos() {
                return Err(DtypError::Format("read past end of stream"));
            }
            if self.data[self.pos] & 0x80 != 0 {
                (self.read_u32_b()? & !0x8000_0000) as usize
            } else {
                self.read_u16_b()? as usize
            }
        } else if null_terminated {
            let mut offset = self.pos;
            loop {
                if offset + unit_width > self.data.len() {
                    return Err(DtypError::Format("unterminated string"));
                }
                if self.data[offset..offset + unit_width].iter().all(|b| *b == 0) {
                    break offset - self.pos;
                }
                offset += unit_width;
            }
        } else {
            byte_count.ok_or(DtypError::Format("no string length available"))?
        };

        if count > self.remaining() {
            return Err(DtypError::Format("string length exceeds remaining bytes"));
        }
        Ok(count)
    }
}

impl From<Vec<u8>> for ByteStream {
    fn from(data: Vec<u8>) -> Self {
        ByteStream { data, pos: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codepage::UnitOrder;
    use mpm_tests::assert_hex_eq;

    #[test]
    fn scalar_endianness() {
        let mut s = ByteStream::new(64);
        s.write_u16_b(0x1234);
        s.write_u16_l(0x1234);
        s.write_u32_b(0xDEADBEEF);
        s.write_u64_l(0x0102030405060708);
        s.write_f64_b(1.5);
        assert_hex_eq!(s.as_slice(), "1234 3412 deadbeef 0807060504030201 3ff8000000000000");

        s.seek(0, SeekOrigin::Start).unwrap();
        assert_eq!(s.read_u16_b().unwrap(), 0x1234);
        assert_eq!(s.read_u16_l().unwrap(), 0x1234);
        assert_eq!(s.read_u32_b().unwrap(), 0xDEADBEEF);
        assert_eq!(s.read_u64_l().unwrap(), 0x0102030405060708);
        assert_eq!(s.read_f64_b().unwrap(), 1.5);
        assert!(s.eos());
    }

    #[test]
    fn read_past_end_fails() {
        let mut s = ByteStream::from_slice(&[0x01, 0x02]);
        assert!(s.read_u32_b().is_err());
        // A failed read consumes nothing.
        assert_eq!(s.read_u16_b().unwrap(), 0x0102);
    }

    #[test]
    fn seek_origins() {
        let mut s = ByteStream::from_slice(&[0u8; 16]);
        assert_eq!(s.seek(4, SeekOrigin::Start).unwrap(), 4);
        assert_eq!(s.seek(2, SeekOrigin::Current).unwrap(), 6);
        assert_eq!(s.seek(-6, SeekOrigin::End).unwrap(), 10);
        assert!(s.seek(-1, SeekOrigin::Start).is_err());
        assert!(s.seek(1, SeekOrigin::End).is_err());
    }

    #[test]
    fn leb128_roundtrip() {
        let values: [i64; 7] = [0, 1, -1, 127, -128, 624485, i64::MIN];
        for v in values {
            let mut s = ByteStream::new(16);
            s.write_signed_leb128(v);
            s.seek(0, SeekOrigin::Start).unwrap();
            assert_eq!(s.read_signed_leb128().unwrap(), v, "value {v}");
        }

        let mut s = ByteStream::new(16);
        s.write_unsigned_leb128(624485);
        assert_hex_eq!(s.as_slice(), "e58e26");
        s.seek(0, SeekOrigin::Start).unwrap();
        assert_eq!(s.read_unsigned_leb128().unwrap(), 624485);

        let mut s = ByteStream::new(16);
        s.write_unsigned_leb128(u64::MAX);
        s.seek(0, SeekOrigin::Start).unwrap();
        assert_eq!(s.read_unsigned_leb128().unwrap(), u64::MAX);
    }

    #[test]
    fn string_with_prepended_length() {
        let mut s = ByteStream::new(64);
        let written = s.write_string("abc", Codepage::Multibyte, true, false);
        assert_eq!(written, 5);
        assert_hex_eq!(s.as_slice(), "0003 616263");

        s.seek(0, SeekOrigin::Start).unwrap();
        let value = s.read_string(Codepage::Multibyte, None, true, false).unwrap();
        assert_eq!(value, "abc");
        assert!(s.eos());
    }

    #[test]
    fn string_null_terminated_ucs2() {
        let mut s = ByteStream::new(64);
        s.write_string("hi", Codepage::Ucs2(UnitOrder::Big), false, true);
        assert_hex_eq!(s.as_slice(), "0068 0069 0000");

        s.seek(0, SeekOrigin::Start).unwrap();
        let value = s
            .read_string(Codepage::Ucs2(UnitOrder::Big), None, false, true)
            .unwrap();
        assert_eq!(value, "hi");
        assert!(s.eos());
    }

    #[test]
    fn string_length_beyond_end_fails() {
        // Prefix claims 16 bytes, only 3 present.
        let mut s = ByteStream::from_slice(&[0x00, 0x10, b'a', b'b', b'c']);
        assert!(s.read_string(Codepage::Multibyte, None, true, false).is_err());
    }
}
