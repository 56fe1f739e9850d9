//! Typed message fields and their on-wire records.
//!
//! Record layout (network byte order):
//!
//! ```text
//! field_id:u32 | type:u8 | flags:u8 | value...
//! ```
//!
//! int16 places its value directly in the two bytes after the flags; every
//! other type starts its value on the next 4-byte boundary (two pad bytes).
//! From protocol version 2 on, each record is padded so that the next one
//! begins on an 8-byte boundary.

use mpm_dtyp::{AddressFamily, ByteStream, InetAddress};

use crate::error::{MsgError, Result};
use crate::header::ALIGNMENT;

/// The "signed" marker bit in the field flags byte. Preserved on
/// round-trip, never drives interpretation.
pub const FIELD_FLAG_SIGNED: u8 = 0x01;

/// Field type tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Binary = 0,
    /// UCS-2 string (big-endian code units on the wire).
    String = 1,
    Int64 = 2,
    Int16 = 3,
    Int32 = 4,
    Float = 5,
    InetAddr = 6,
    Utf8String = 7,
}

impl TryFrom<u8> for FieldType {
    type Error = MsgError;

    fn try_from(value: u8) -> Result<FieldType> {
        match value {
            0 => Ok(FieldType::Binary),
            1 => Ok(FieldType::String),
            2 => Ok(FieldType::Int64),
            3 => Ok(FieldType::Int16),
            4 => Ok(FieldType::Int32),
            5 => Ok(FieldType::Float),
            6 => Ok(FieldType::InetAddr),
            7 => Ok(FieldType::Utf8String),
            other => Err(MsgError::UnknownFieldType(other)),
        }
    }
}

/// A field value. Integers carry host-width values; the signed marker
/// travels separately in [`Field::signed`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int16(u16),
    Int32(u32),
    Int64(u64),
    Float(f64),
    /// Sent as UCS-2 code units.
    String(String),
    /// Sent as raw UTF-8.
    Utf8String(String),
    Binary(Vec<u8>),
    InetAddr(InetAddress),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Int16(_) => FieldType::Int16,
            FieldValue::Int32(_) => FieldType::Int32,
            FieldValue::Int64(_) => FieldType::Int64,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::String(_) => FieldType::String,
            FieldValue::Utf8String(_) => FieldType::Utf8String,
            FieldValue::Binary(_) => FieldType::Binary,
            FieldValue::InetAddr(_) => FieldType::InetAddr,
        }
    }
}

/// One (id, value) pair of a structured message.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub id: u32,
    pub signed: bool,
    pub value: FieldValue,
}

/// Bytes needed to pad `size` up to the record alignment boundary.
pub(crate) fn alignment_pad(size: usize) -> usize {
    (ALIGNMENT - size % ALIGNMENT) & (ALIGNMENT - 1)
}

impl Field {
    pub fn new(id: u32, value: FieldValue) -> Field {
        Field {
            id,
            signed: false,
            value,
        }
    }

    pub fn new_signed(id: u32, value: FieldValue) -> Field {
        Field {
            id,
            signed: true,
            value,
        }
    }

    pub fn field_type(&self) -> FieldType {
        self.value.field_type()
    }

    /// Record size on the wire, without alignment padding.
    pub fn wire_size(&self) -> usize {
        match &self.value {
            FieldValue::Int16(_) => 8,
            FieldValue::Int32(_) => 12,
            FieldValue::Int64(_) | FieldValue::Float(_) => 16,
            FieldValue::InetAddr(_) => 28,
            FieldValue::String(s) => 12 + s.encode_utf16().count() * 2,
            FieldValue::Utf8String(s) => 12 + s.len(),
            FieldValue::Binary(data) => 12 + data.len(),
        }
    }

    /// Record size including the version-2 alignment padding.
    pub fn padded_size(&self, version: u8) -> usize {
        let size = self.wire_size();
        if version >= 2 { size + alignment_pad(size) } else { size }
    }

    /// Encodes the record (with padding when the version requires it).
    pub fn encode(&self, out: &mut ByteStream, version: u8) {
        let start = out.pos();
        out.write_u32_b(self.id);
        out.write_u8(self.field_type() as u8);
        out.write_u8(if self.signed { FIELD_FLAG_SIGNED } else { 0 });
        match &self.value {
            FieldValue::Int16(v) => out.write_u16_b(*v),
            FieldValue::Int32(v) => {
                out.write_u16_b(0);
                out.write_u32_b(*v);
            }
            FieldValue::Int64(v) => {
                out.write_u16_b(0);
                out.write_u64_b(*v);
            }
            FieldValue::Float(v) => {
                out.write_u16_b(0);
                out.write_f64_b(*v);
            }
            FieldValue::String(s) => {
                out.write_u16_b(0);
                let units: Vec<u16> = s.encode_utf16().collect();
                out.write_u32_b((units.len() * 2) as u32);
                for unit in units {
                    out.write_u16_b(unit);
                }
            }
            FieldValue::Utf8String(s) => {
                out.write_u16_b(0);
                out.write_u32_b(s.len() as u32);
                out.write(s.as_bytes());
            }
            FieldValue::Binary(data) => {
                out.write_u16_b(0);
                out.write_u32_b(data.len() as u32);
                out.write(data);
            }
            FieldValue::InetAddr(addr) => {
                out.write_u16_b(0);
                out.write_u8(addr.family() as u8);
                out.write_u8(addr.mask_bits());
                out.write_u16_b(0);
                match addr.family() {
                    AddressFamily::Inet => {
                        out.write_u32_b(addr.v4_bits());
                        out.write(&[0u8; 12]);
                    }
                    _ => out.write(&addr.v6_octets()),
                }
            }
        }
        if version >= 2 {
            let pad = alignment_pad(out.pos() - start);
            out.write(&[0u8; ALIGNMENT][..pad]);
        }
    }

    /// Decodes one record from `payload` at `pos`, applying the structural
    /// validation rules. Returns the field and the offset of the next
    /// record.
    pub fn decode(payload: &[u8], pos: usize, version: u8) -> Result<(Field, usize)> {
        let payload_size = payload.len();
        if pos + 8 > payload_size {
            return Err(MsgError::InvalidFormat("field header beyond payload"));
        }

        let raw_type = payload[pos + 4];
        let field_type = FieldType::try_from(raw_type)?;
        let signed = payload[pos + 5] & FIELD_FLAG_SIGNED != 0;

        let variable = matches!(
            field_type,
            FieldType::String | FieldType::Utf8String | FieldType::Binary
        );
        if variable && pos + 12 > payload_size {
            return Err(MsgError::InvalidFormat("variable field header beyond payload"));
        }

        let mut stream = ByteStream::from_slice(&payload[pos..]);
        let id = stream.read_u32_b()?;
        stream.read_u16_b()?; // type + flags, already taken above

        let field_size;
        let value = match field_type {
            FieldType::Int16 => {
                field_size = 8;
                FieldValue::Int16(stream.read_u16_b()?)
            }
            FieldType::Int32 => {
                field_size = 12;
                stream.read_u16_b()?;
                FieldValue::Int32(stream.read_u32_b()?)
            }
            FieldType::Int64 => {
                field_size = 16;
                stream.read_u16_b()?;
                FieldValue::Int64(stream.read_u64_b()?)
            }
            FieldType::Float => {
                field_size = 16;
                stream.read_u16_b()?;
                FieldValue::Float(stream.read_f64_b()?)
            }
            FieldType::InetAddr => {
                field_size = 28;
                if pos + field_size > payload_size {
                    return Err(MsgError::InvalidFormat("field runs past payload"));
                }
                stream.read_u16_b()?;
                let family = stream.read_u8()?;
                let mask_bits = stream.read_u8()?;
                stream.read_u16_b()?;
                let family = AddressFamily::from_raw(family)
                    .ok_or(MsgError::InvalidFormat("unknown address family"))?;
                let mut octets = [0u8; 16];
                stream.read_exact(&mut octets)?;
                let addr = match family {
                    AddressFamily::Inet => InetAddress::from_v4_bits(u32::from_be_bytes(
                        octets[..4].try_into().unwrap(),
                    )),
                    AddressFamily::Inet6 => {
                        InetAddress::from(std::net::Ipv6Addr::from(octets))
                    }
                    AddressFamily::Unspec => InetAddress::unspec(),
                };
                FieldValue::InetAddr(addr.with_mask_bits(mask_bits))
            }
            FieldType::String | FieldType::Utf8String | FieldType::Binary => {
                stream.read_u16_b()?;
                let length = stream.read_u32_b()? as usize;
                field_size = 12 + length;
                if pos + field_size > payload_size {
                    return Err(MsgError::InvalidFormat("field runs past payload"));
                }
                let mut data = vec![0u8; length];
                stream.read_exact(&mut data)?;
                match field_type {
                    FieldType::Binary => FieldValue::Binary(data),
                    FieldType::Utf8String => FieldValue::Utf8String(
                        String::from_utf8(data)
                            .map_err(|_| MsgError::InvalidFormat("invalid UTF-8 string field"))?,
                    ),
                    _ => {
                        if length % 2 != 0 {
                            return Err(MsgError::InvalidFormat("odd UCS-2 string length"));
                        }
                        let units: Vec<u16> = data
                            .chunks_exact(2)
                            .map(|c| u16::from_be_bytes([c[0], c[1]]))
                            .collect();
                        FieldValue::String(
                            String::from_utf16(&units)
                                .map_err(|_| MsgError::InvalidFormat("invalid UCS-2 string field"))?,
                        )
                    }
                }
            }
        };

        if pos + field_size > payload_size {
            return Err(MsgError::InvalidFormat("field runs past payload"));
        }

        let next = if version >= 2 {
            let padded = field_size + alignment_pad(field_size);
            if pos + padded > payload_size {
                return Err(MsgError::InvalidFormat("field padding runs past payload"));
            }
            pos + padded
        } else {
            pos + field_size
        };

        Ok((Field { id, signed, value }, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpm_tests::assert_hex_eq;

    fn encode_one(field: &Field, version: u8) -> Vec<u8> {
        let mut out = ByteStream::new(64);
        field.encode(&mut out, version);
        out.take_buffer()
    }

    #[test]
    fn int32_record_layout() {
        let field = Field::new(1, FieldValue::Int32(9));
        assert_hex_eq!(
            encode_one(&field, 4),
            "00000001 04 00 0000 00000009 00000000"
        );
    }

    #[test]
    fn int16_record_is_eight_bytes() {
        let field = Field::new_signed(0x0102, FieldValue::Int16(0xFFFE));
        let bytes = encode_one(&field, 4);
        assert_hex_eq!(bytes, "00000102 03 01 fffe");
        let (decoded, next) = Field::decode(&bytes, 0, 4).unwrap();
        assert_eq!(decoded, field);
        assert_eq!(next, 8);
    }

    #[test]
    fn string_is_big_endian_ucs2() {
        let field = Field::new(7, FieldValue::String("Ab".into()));
        let bytes = encode_one(&field, 4);
        assert_hex_eq!(bytes, "00000007 01 00 0000 00000004 0041 0062");
        let (decoded, next) = Field::decode(&bytes, 0, 4).unwrap();
        assert_eq!(decoded, field);
        assert_eq!(next, bytes.len());
    }

    #[test]
    fn inet_addr_v4_record() {
        let addr = InetAddress::from_v4_bits(0x0A000001).with_mask_bits(24);
        let field = Field::new(3, FieldValue::InetAddr(addr));
        let bytes = encode_one(&field, 4);
        assert_eq!(bytes.len(), 32);
        assert_hex_eq!(
            bytes,
            "00000003 06 00 0000 01 18 0000 0a000001 000000000000000000000000 00000000"
        );
        let (decoded, _) = Field::decode(&bytes, 0, 4).unwrap();
        assert_eq!(decoded, field);
    }

    #[test]
    fn no_padding_before_version_2() {
        let field = Field::new(1, FieldValue::Int32(9));
        assert_eq!(encode_one(&field, 1).len(), 12);
        assert_eq!(encode_one(&field, 2).len(), 16);
    }

    #[test]
    fn truncated_record_is_rejected() {
        let field = Field::new(9, FieldValue::Binary(vec![1, 2, 3, 4, 5, 6, 7, 8]));
        let bytes = encode_one(&field, 4);
        assert!(Field::decode(&bytes[..bytes.len() - 9], 0, 4).is_err());
        assert!(Field::decode(&bytes[..10], 0, 4).is_err());
        assert!(Field::decode(&bytes[..4], 0, 4).is_err());
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let mut bytes = encode_one(&Field::new(1, FieldValue::Int32(9)), 4);
        bytes[4] = 0x2A;
        assert!(matches!(
            Field::decode(&bytes, 0, 4),
            Err(MsgError::UnknownFieldType(0x2A))
        ));
    }
}
