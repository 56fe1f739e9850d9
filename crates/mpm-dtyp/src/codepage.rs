//! Codepage descriptors and string conversion between the host string type
//! and the on-wire encodings (UCS-2 / UCS-4 in either unit order, or a
//! multibyte encoding).

use crate::{DtypError, Result};

/// Byte order of the code units of a fixed-width encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOrder {
    /// Host byte order.
    Native,
    Big,
    Little,
}

impl UnitOrder {
    fn is_big(self) -> bool {
        match self {
            UnitOrder::Big => true,
            UnitOrder::Little => false,
            UnitOrder::Native => cfg!(target_endian = "big"),
        }
    }
}

/// A recognized string codepage.
///
/// The UCS names select fixed-width paths; any other name selects the
/// multibyte path, which in this implementation is UTF-8 (the host string
/// encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codepage {
    Ucs2(UnitOrder),
    Ucs4(UnitOrder),
    Multibyte,
}

impl Codepage {
    /// Resolves a codepage by name. Recognized names: "UCS2", "UCS-2",
    /// "UCS2BE", "UCS-2BE", "UCS2LE", "UCS-2LE" and the UCS4 equivalents,
    /// case-insensitive. Everything else selects the multibyte path.
    pub fn from_name(name: &str) -> Codepage {
        let mut upper = name.to_ascii_uppercase();
        upper.retain(|c| c != '-');
        match upper.as_str() {
            "UCS2" => Codepage::Ucs2(UnitOrder::Native),
            "UCS2BE" => Codepage::Ucs2(UnitOrder::Big),
            "UCS2LE" => Codepage::Ucs2(UnitOrder::Little),
            "UCS4" => Codepage::Ucs4(UnitOrder::Native),
            "UCS4BE" => Codepage::Ucs4(UnitOrder::Big),
            "UCS4LE" => Codepage::Ucs4(UnitOrder::Little),
            _ => Codepage::Multibyte,
        }
    }

    /// Natural width of one code unit in bytes (1, 2 or 4). This is also
    /// the width of the null terminator.
    pub fn unit_width(self) -> usize {
        match self {
            Codepage::Ucs2(_) => 2,
            Codepage::Ucs4(_) => 4,
            Codepage::Multibyte => 1,
        }
    }
}

/// Encodes a host string into the given codepage.
///
/// Byte order is applied as an element-wise swap over the produced units.
pub fn encode_string(s: &str, cp: Codepage) -> Vec<u8> {
    match cp {
        Codepage::Ucs2(order) => {
            let big = order.is_big();
            let mut out = Vec::with_capacity(s.len() * 2);
            for unit in s.encode_utf16() {
                let bytes = if big { unit.to_be_bytes() } else { unit.to_le_bytes() };
                out.extend_from_slice(&bytes);
            }
            out
        }
        Codepage::Ucs4(order) => {
            let big = order.is_big();
            let mut out = Vec::with_capacity(s.len() * 4);
            for ch in s.chars() {
                let unit = ch as u32;
                let bytes = if big { unit.to_be_bytes() } else { unit.to_le_bytes() };
                out.extend_from_slice(&bytes);
            }
            out
        }
        Codepage::Multibyte => s.as_bytes().to_vec(),
    }
}

/// Decodes a byte run in the given codepage into a host string.
pub fn decode_string(data: &[u8], cp: Codepage) -> Result<String> {
    match cp {
        Codepage::Ucs2(order) => {
            if data.len() % 2 != 0 {
                return Err(DtypError::Format("odd UCS-2 byte count"));
            }
            let big = order.is_big();
            let units: Vec<u16> = data
                .chunks_exact(2)
                .map(|c| {
                    let b = [c[0], c[1]];
                    if big { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) }
                })
                .collect();
            String::from_utf16(&units).map_err(|_| DtypError::Format("invalid UCS-2 data"))
        }
        Codepage::Ucs4(order) => {
            if data.len() % 4 != 0 {
                return Err(DtypError::Format("invalid UCS-4 byte count"));
            }
            let big = order.is_big();
            let mut out = String::with_capacity(data.len() / 4);
            for c in data.chunks_exact(4) {
                let b = [c[0], c[1], c[2], c[3]];
                let unit = if big { u32::from_be_bytes(b) } else { u32::from_le_bytes(b) };
                let ch = char::from_u32(unit).ok_or(DtypError::Format("invalid UCS-4 code point"))?;
                out.push(ch);
            }
            Ok(out)
        }
        Codepage::Multibyte => String::from_utf8(data.to_vec())
            .map_err(|_| DtypError::Format("invalid multibyte string data")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpm_tests::assert_hex_eq;

    #[test]
    fn name_resolution() {
        assert_eq!(Codepage::from_name("UCS2"), Codepage::Ucs2(UnitOrder::Native));
        assert_eq!(Codepage::from_name("ucs-2be"), Codepage::Ucs2(UnitOrder::Big));
        assert_eq!(Codepage::from_name("UCS-4LE"), Codepage::Ucs4(UnitOrder::Little));
        assert_eq!(Codepage::from_name("ISO-8859-1"), Codepage::Multibyte);
        assert_eq!(Codepage::from_name("UTF-8"), Codepage::Multibyte);
    }

    #[test]
    fn ucs2_both_orders() {
        assert_hex_eq!(encode_string("Az", Codepage::Ucs2(UnitOrder::Big)), "0041 007a");
        assert_hex_eq!(encode_string("Az", Codepage::Ucs2(UnitOrder::Little)), "4100 7a00");

        let be = encode_string("пример", Codepage::Ucs2(UnitOrder::Big));
        assert_eq!(decode_string(&be, Codepage::Ucs2(UnitOrder::Big)).unwrap(), "пример");
    }

    #[test]
    fn ucs2_surrogate_pairs_survive() {
        // Code points beyond the BMP travel as UTF-16 surrogate pairs.
        let encoded = encode_string("𝄞", Codepage::Ucs2(UnitOrder::Big));
        assert_eq!(encoded.len(), 4);
        assert_eq!(decode_string(&encoded, Codepage::Ucs2(UnitOrder::Big)).unwrap(), "𝄞");
    }

    #[test]
    fn ucs4_roundtrip() {
        let encoded = encode_string("a𝄞", Codepage::Ucs4(UnitOrder::Little));
        assert_hex_eq!(encoded, "61000000 1ed10100");
        assert_eq!(decode_string(&encoded, Codepage::Ucs4(UnitOrder::Little)).unwrap(), "a𝄞");
    }

    #[test]
    fn invalid_data_is_a_format_error() {
        // Lone high surrogate.
        assert!(decode_string(&[0xD8, 0x00], Codepage::Ucs2(UnitOrder::Big)).is_err());
        // Out-of-range UCS-4 unit.
        assert!(decode_string(&[0xFF, 0xFF, 0xFF, 0xFF], Codepage::Ucs4(UnitOrder::Big)).is_err());
        // Truncated unit.
        assert!(decode_string(&[0x00], Codepage::Ucs2(UnitOrder::Big)).is_err());
    }
}
