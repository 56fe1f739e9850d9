//! Shared helpers for byte-exact wire fixtures in unit tests.

#![forbid(unsafe_code)]

/// Decodes a hex string into bytes. Whitespace is ignored so fixtures can be
/// wrapped and grouped for readability.
///
/// Panics on invalid input; this is test-only code.
pub fn decode_hex(s: &str) -> Vec<u8> {
    let digits: Vec<u8> = s
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .map(|b| match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => panic!("invalid hex digit {:?}", b as char),
        })
        .collect();
    assert!(digits.len() % 2 == 0, "odd number of hex digits");
    digits.chunks(2).map(|p| (p[0] << 4) | p[1]).collect()
}

/// Encodes bytes as a lowercase hex string, for assertion failure output.
pub fn encode_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Asserts that `actual` equals the hex fixture `expected`, printing both
/// sides as hex on mismatch.
#[macro_export]
macro_rules! assert_hex_eq {
    ($actual:expr, $expected:expr) => {{
        let actual = &$actual[..];
        let expected = $crate::decode_hex($expected);
        assert_eq!(
            $crate::encode_hex(actual),
            $crate::encode_hex(&expected),
            "encoded bytes differ from fixture"
        );
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let bytes = decode_hex("00 42 40 00\nDEADbeef");
        assert_eq!(bytes, [0x00, 0x42, 0x40, 0x00, 0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(encode_hex(&bytes), "00424000deadbeef");
    }
}
