//! BER (X.690) identifier, length and content codecs for the SNMP
//! primitive types.

use crate::error::{Result, SnmpError};

// Universal types.
pub const ASN_INTEGER: u8 = 0x02;
pub const ASN_OCTET_STRING: u8 = 0x04;
pub const ASN_NULL: u8 = 0x05;
pub const ASN_OBJECT_ID: u8 = 0x06;
pub const ASN_SEQUENCE: u8 = 0x30;

// Application types.
pub const ASN_IP_ADDR: u8 = 0x40;
pub const ASN_COUNTER32: u8 = 0x41;
pub const ASN_GAUGE32: u8 = 0x42;
pub const ASN_TIMETICKS: u8 = 0x43;
pub const ASN_OPAQUE: u8 = 0x44;
pub const ASN_COUNTER64: u8 = 0x46;
pub const ASN_UINTEGER32: u8 = 0x47;

// Context-specific PDU tags.
pub const ASN_GET_REQUEST_PDU: u8 = 0xA0;
pub const ASN_GET_NEXT_REQUEST_PDU: u8 = 0xA1;
pub const ASN_GET_RESPONSE_PDU: u8 = 0xA2;
pub const ASN_SET_REQUEST_PDU: u8 = 0xA3;
pub const ASN_TRAP_V1_PDU: u8 = 0xA4;
pub const ASN_TRAP_V2_PDU: u8 = 0xA7;

/// Decodes a BER identifier and length at the start of `data`.
///
/// Returns `(type, content_length, header_length)`; the content begins at
/// `data[header_length..]`. Multi-byte tags (low five bits all ones) are
/// rejected since SNMP v1/v2c never uses them; long-form lengths may use up
/// to four length bytes. The content is not required to be present yet, so
/// this can pre-parse a partially received datagram.
pub fn decode_identifier(data: &[u8]) -> Result<(u8, usize, usize)> {
    if data.len() < 2 {
        return Err(SnmpError::Parse("truncated BER identifier"));
    }
    let tag = data[0];
    if tag & 0x1F == 0x1F {
        return Err(SnmpError::Parse("multi-byte BER tags are not supported"));
    }

    let first = data[1];
    if first & 0x80 == 0 {
        return Ok((tag, first as usize, 2));
    }

    let num_bytes = (first & 0x7F) as usize;
    if num_bytes == 0 || num_bytes > 4 {
        return Err(SnmpError::Parse("invalid BER length-of-length"));
    }
    if data.len() < 2 + num_bytes {
        return Err(SnmpError::Parse("truncated BER length"));
    }
    let mut length = 0usize;
    for b in &data[2..2 + num_bytes] {
        length = (length << 8) | *b as usize;
    }
    Ok((tag, length, 2 + num_bytes))
}

/// Splits the next TLV off `data`, returning `(type, content, rest)`.
pub fn next_tlv(data: &[u8]) -> Result<(u8, &[u8], &[u8])> {
    let (tag, length, header_len) = decode_identifier(data)?;
    let end = header_len + length;
    if end > data.len() {
        return Err(SnmpError::Parse("BER content beyond buffer"));
    }
    Ok((tag, &data[header_len..end], &data[end..]))
}

/// Decodes integer content into 32 bits. Accepts 1..5 content bytes; at
/// length 5 the leading byte is the unsigned sign pad and is skipped.
/// Negative values are sign-extended; zero-length content decodes to 0.
pub fn decode_int32(content: &[u8]) -> Result<u32> {
    if content.is_empty() {
        return Ok(0);
    }
    if content.len() > 5 {
        return Err(SnmpError::Parse("integer content longer than 32 bits"));
    }
    let mut value: u32 = if content[0] & 0x80 != 0 { u32::MAX } else { 0 };
    let bytes = if content.len() == 5 { &content[1..] } else { content };
    for b in bytes {
        value = (value << 8) | *b as u32;
    }
    Ok(value)
}

/// As [`decode_int32`] but into 64 bits (1..9 content bytes).
pub fn decode_int64(content: &[u8]) -> Result<u64> {
    if content.is_empty() {
        return Ok(0);
    }
    if content.len() > 9 {
        return Err(SnmpError::Parse("integer content longer than 64 bits"));
    }
    let mut value: u64 = if content[0] & 0x80 != 0 { u64::MAX } else { 0 };
    let bytes = if content.len() == 9 { &content[1..] } else { content };
    for b in bytes {
        value = (value << 8) | *b as u64;
    }
    Ok(value)
}

/// Decodes OBJECT IDENTIFIER content into an arc vector. Empty content
/// decodes to an empty vector (sub-2-arc identifiers round-trip as
/// zero-length content).
pub fn decode_oid(content: &[u8]) -> Result<Vec<u32>> {
    if content.is_empty() {
        return Ok(Vec::new());
    }
    let mut arcs = Vec::with_capacity(content.len() + 1);
    arcs.push(content[0] as u32 / 40);
    arcs.push(content[0] as u32 % 40);

    let mut value = 0u32;
    for b in &content[1..] {
        if b & 0x80 != 0 {
            value = value.wrapping_shl(7) | (*b & 0x7F) as u32;
        } else {
            arcs.push(value.wrapping_shl(7) | *b as u32);
            value = 0;
        }
    }
    Ok(arcs)
}

/// Encodes a signed 32-bit integer with the minimum number of content
/// bytes preserving the sign bit.
pub fn encode_int32_content(value: u32) -> ([u8; 5], usize) {
    let be = value.to_be_bytes();
    let sign: u8 = if be[0] & 0x80 != 0 { 0xFF } else { 0 };
    let mut start = 0;
    while start < 3 && be[start] == sign {
        start += 1;
    }

    let mut out = [0u8; 5];
    if (be[start] & 0x80) != (sign & 0x80) {
        out[0] = sign;
        out[1..1 + (4 - start)].copy_from_slice(&be[start..]);
        (out, 5 - start)
    } else {
        out[..4 - start].copy_from_slice(&be[start..]);
        (out, 4 - start)
    }
}

/// Encodes an unsigned 32-bit integer, prepending a zero byte when the top
/// content bit would read as a sign.
pub fn encode_uint32_content(value: u32) -> ([u8; 5], usize) {
    let be = value.to_be_bytes();
    let mut start = 0;
    while start < 3 && be[start] == 0 {
        start += 1;
    }

    let mut out = [0u8; 5];
    if be[start] & 0x80 != 0 {
        out[1..1 + (4 - start)].copy_from_slice(&be[start..]);
        (out, 5 - start)
    } else {
        out[..4 - start].copy_from_slice(&be[start..]);
        (out, 4 - start)
    }
}

/// As [`encode_uint32_content`] for 64-bit counters.
pub fn encode_uint64_content(value: u64) -> ([u8; 9], usize) {
    let be = value.to_be_bytes();
    let mut start = 0;
    while start < 7 && be[start] == 0 {
        start += 1;
    }

    let mut out = [0u8; 9];
    if be[start] & 0x80 != 0 {
        out[1..1 + (8 - start)].copy_from_slice(&be[start..]);
        (out, 9 - start)
    } else {
        out[..8 - start].copy_from_slice(&be[start..]);
        (out, 8 - start)
    }
}

/// Encodes OBJECT IDENTIFIER content. Arc vectors shorter than two arcs
/// produce zero-length content.
pub fn encode_oid_content(arcs: &[u32]) -> Vec<u8> {
    if arcs.len() < 2 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(arcs.len() * 5);
    out.push((arcs[0] * 40 + arcs[1]) as u8);
    for &arc in &arcs[2..] {
        let mut groups = [0u8; 5];
        let mut count = 0;
        let mut value = arc;
        loop {
            groups[count] = (value & 0x7F) as u8;
            count += 1;
            value >>= 7;
            if value == 0 {
                break;
            }
        }
        for i in (1..count).rev() {
            out.push(groups[i] | 0x80);
        }
        out.push(groups[0]);
    }
    out
}

fn encode_length(length: usize) -> ([u8; 5], usize) {
    let mut out = [0u8; 5];
    if length < 128 {
        out[0] = length as u8;
        (out, 1)
    } else {
        let be = (length as u32).to_be_bytes();
        let mut start = 0;
        while start < 3 && be[start] == 0 {
            start += 1;
        }
        let n = 4 - start;
        out[0] = 0x80 | n as u8;
        out[1..1 + n].copy_from_slice(&be[start..]);
        (out, 1 + n)
    }
}

/// Encodes identifier + length + content into a caller-supplied buffer,
/// returning the number of bytes used. Fails with
/// [`SnmpError::BufferTooSmall`] when the buffer cannot hold the result.
pub fn encode(tag: u8, content: &[u8], out: &mut [u8]) -> Result<usize> {
    let (len_bytes, len_count) = encode_length(content.len());
    let total = 1 + len_count + content.len();
    if out.len() < total {
        return Err(SnmpError::BufferTooSmall);
    }
    out[0] = tag;
    out[1..1 + len_count].copy_from_slice(&len_bytes[..len_count]);
    out[1 + len_count..total].copy_from_slice(content);
    Ok(total)
}

/// Appends identifier + length + content to a growable buffer.
pub fn encode_vec(tag: u8, content: &[u8], out: &mut Vec<u8>) {
    let (len_bytes, len_count) = encode_length(content.len());
    out.push(tag);
    out.extend_from_slice(&len_bytes[..len_count]);
    out.extend_from_slice(content);
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpm_tests::assert_hex_eq;

    fn encode_int(value: u32) -> Vec<u8> {
        let (buf, len) = encode_int32_content(value);
        buf[..len].to_vec()
    }

    #[test]
    fn integer_roundtrip() {
        for v in [0i32, 1, -1, 127, 128, -128, -129, 0x7FFFFFFF, i32::MIN] {
            let content = encode_int(v as u32);
            assert_eq!(decode_int32(&content).unwrap() as i32, v, "value {v}");
        }
        assert_hex_eq!(encode_int(0), "00");
        assert_hex_eq!(encode_int(-1i32 as u32), "ff");
        assert_hex_eq!(encode_int(128), "0080");
        assert_hex_eq!(encode_int(-129i32 as u32), "ff7f");
    }

    #[test]
    fn unsigned_roundtrip() {
        for v in [0u32, 1, 127, 128, 0x80000000, u32::MAX] {
            let (buf, len) = encode_uint32_content(v);
            assert_eq!(decode_int32(&buf[..len]).unwrap(), v, "value {v}");
        }
        // Large unsigned values carry the length-5 zero pad.
        let (buf, len) = encode_uint32_content(u32::MAX);
        assert_eq!(len, 5);
        assert_hex_eq!(buf[..len], "00ffffffff");
    }

    #[test]
    fn counter64_roundtrip() {
        for v in [0u64, 1, 0xDEADBEEF, u64::MAX] {
            let (buf, len) = encode_uint64_content(v);
            assert_eq!(decode_int64(&buf[..len]).unwrap(), v, "value {v}");
        }
    }

    #[test]
    fn zero_length_integer_decodes_to_zero() {
        assert_eq!(decode_int32(&[]).unwrap(), 0);
        assert_eq!(decode_int64(&[]).unwrap(), 0);
    }

    #[test]
    fn oid_roundtrip() {
        let arcs = [1u32, 3, 6, 1, 4, 1, 9, 300, 0x0FFFFFFF, 0xFFFFFFFF];
        let content = encode_oid_content(&arcs);
        assert_eq!(decode_oid(&content).unwrap(), arcs);

        // Known encoding: 1.3 packs into 0x2B, 300 = 0x82 0x2C.
        assert_hex_eq!(encode_oid_content(&[1, 3, 300]), "2b 822c");
    }

    #[test]
    fn short_oids_have_empty_content() {
        assert!(encode_oid_content(&[1]).is_empty());
        assert!(encode_oid_content(&[]).is_empty());
        assert_eq!(decode_oid(&[]).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn identifier_forms() {
        // Short form.
        let (tag, len, hdr) = decode_identifier(&[0x02, 0x01, 0x05]).unwrap();
        assert_eq!((tag, len, hdr), (ASN_INTEGER, 1, 2));

        // Long form, two length bytes.
        let (tag, len, hdr) = decode_identifier(&[0x30, 0x82, 0x01, 0x00]).unwrap();
        assert_eq!((tag, len, hdr), (ASN_SEQUENCE, 256, 4));

        // Multi-byte tags are rejected.
        assert!(decode_identifier(&[0x3F, 0x01]).is_err());
        // More than four length bytes are rejected.
        assert!(decode_identifier(&[0x02, 0x85, 0, 0, 0, 0, 1]).is_err());
    }

    #[test]
    fn encode_length_forms() {
        let mut buf = [0u8; 300];
        let content = [0xAAu8; 130];
        let used = encode(ASN_OCTET_STRING, &content, &mut buf).unwrap();
        assert_eq!(used, 133);
        assert_eq!(&buf[..3], &[0x04, 0x81, 130]);

        let (tag, decoded_len, hdr) = decode_identifier(&buf).unwrap();
        assert_eq!((tag, decoded_len, hdr), (ASN_OCTET_STRING, 130, 3));
    }

    #[test]
    fn encode_into_small_buffer_fails() {
        let mut buf = [0u8; 4];
        assert!(matches!(
            encode(ASN_OCTET_STRING, &[1, 2, 3, 4, 5], &mut buf),
            Err(SnmpError::BufferTooSmall)
        ));
    }
}
