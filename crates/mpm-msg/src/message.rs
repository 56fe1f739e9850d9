//! Structured MPM message: assembly, serialization, optional payload
//! compression, and parsing.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use mpm_dtyp::{AddressFamily, ByteStream, InetAddress};

use crate::error::{MsgError, Result};
use crate::field::{Field, FieldType, FieldValue, alignment_pad};
use crate::header::{ALIGNMENT, HEADER_SIZE, MessageFlags, MessageHeader, PROTOCOL_VERSION};

/// Compression is only attempted for frames larger than this.
const COMPRESSION_THRESHOLD: usize = 128;

/// A protocol message.
///
/// A message is either *structured* (a set of typed fields keyed by 32-bit
/// field id), *binary* (an opaque payload) or *control* (a bare 32-bit
/// code). Field ids are unique; setting an id again replaces the previous
/// record.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    code: u16,
    id: u32,
    flags: MessageFlags,
    version: u8,
    fields: BTreeMap<u32, Field>,
    data: Vec<u8>,
    control_data: u32,
}

impl Message {
    /// Creates an empty structured message with the current protocol
    /// version.
    pub fn new(code: u16, id: u32) -> Message {
        Message::with_version(code, id, PROTOCOL_VERSION)
    }

    pub fn with_version(code: u16, id: u32, version: u8) -> Message {
        Message {
            code,
            id,
            flags: MessageFlags::new(),
            version,
            fields: BTreeMap::new(),
            data: Vec::new(),
            control_data: 0,
        }
    }

    /// Creates a binary-mode message carrying an opaque payload.
    pub fn new_binary(code: u16, id: u32, data: Vec<u8>) -> Message {
        let mut msg = Message::new(code, id);
        msg.flags.set_binary(true);
        msg.data = data;
        msg
    }

    /// Creates a control message carrying a bare 32-bit code.
    pub fn new_control(code: u16, control_data: u32) -> Message {
        let mut msg = Message::new(code, 0);
        msg.flags.set_control(true);
        msg.control_data = control_data;
        msg
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn set_code(&mut self, code: u16) {
        self.code = code;
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn is_binary(&self) -> bool {
        self.flags.binary()
    }

    pub fn is_control(&self) -> bool {
        self.flags.control()
    }

    pub fn is_end_of_sequence(&self) -> bool {
        self.flags.end_of_sequence()
    }

    pub fn set_end_of_sequence(&mut self) {
        self.flags.set_end_of_sequence(true);
    }

    pub fn is_stream(&self) -> bool {
        self.flags.stream()
    }

    pub fn set_stream(&mut self, reverse_order: bool) {
        self.flags.set_stream(true);
        self.flags.set_reverse_order(reverse_order);
    }

    pub fn set_dont_compress(&mut self) {
        self.flags.set_dont_compress(true);
    }

    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    /// Binary-mode payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Control-mode code.
    pub fn control_data(&self) -> u32 {
        self.control_data
    }

    /// Changes the protocol version. Reducing the version below 5 re-encodes
    /// every utf8-string field as a UCS-2 string field in place.
    pub fn set_protocol_version(&mut self, version: u8) {
        if self.version >= 5 && version < 5 {
            for field in self.fields.values_mut() {
                if let FieldValue::Utf8String(s) = &mut field.value {
                    let content = std::mem::take(s);
                    field.value = FieldValue::String(content);
                }
            }
        }
        self.version = version;
    }

    // --- field assembly ---

    /// Inserts or replaces a field.
    pub fn set_field(&mut self, field: Field) {
        if self.flags.binary() {
            return;
        }
        self.fields.insert(field.id, field);
    }

    pub fn set_i16(&mut self, id: u32, value: i16) {
        self.set_field(Field::new_signed(id, FieldValue::Int16(value as u16)));
    }

    pub fn set_u16(&mut self, id: u32, value: u16) {
        self.set_field(Field::new(id, FieldValue::Int16(value)));
    }

    pub fn set_i32(&mut self, id: u32, value: i32) {
        self.set_field(Field::new_signed(id, FieldValue::Int32(value as u32)));
    }

    pub fn set_u32(&mut self, id: u32, value: u32) {
        self.set_field(Field::new(id, FieldValue::Int32(value)));
    }

    pub fn set_i64(&mut self, id: u32, value: i64) {
        self.set_field(Field::new_signed(id, FieldValue::Int64(value as u64)));
    }

    pub fn set_u64(&mut self, id: u32, value: u64) {
        self.set_field(Field::new(id, FieldValue::Int64(value)));
    }

    pub fn set_f64(&mut self, id: u32, value: f64) {
        self.set_field(Field::new(id, FieldValue::Float(value)));
    }

    /// Sets a string field in the preferred encoding for the message's
    /// protocol version: utf8-string from version 5 on, UCS-2 before.
    pub fn set_string(&mut self, id: u32, value: &str) {
        if self.version >= 5 {
            self.set_utf8_string(id, value);
        } else {
            self.set_ucs2_string(id, value);
        }
    }

    /// As [`Message::set_string`] with a maximum length in characters,
    /// enforced before conversion.
    pub fn set_string_limited(&mut self, id: u32, value: &str, max_chars: usize) {
        let limited: String = value.chars().take(max_chars).collect();
        self.set_string(id, &limited);
    }

    pub fn set_ucs2_string(&mut self, id: u32, value: &str) {
        self.set_field(Field::new(id, FieldValue::String(value.to_owned())));
    }

    pub fn set_utf8_string(&mut self, id: u32, value: &str) {
        self.set_field(Field::new(id, FieldValue::Utf8String(value.to_owned())));
    }

    pub fn set_binary(&mut self, id: u32, value: &[u8]) {
        self.set_field(Field::new(id, FieldValue::Binary(value.to_vec())));
    }

    pub fn set_inet_address(&mut self, id: u32, value: InetAddress) {
        self.set_field(Field::new(id, FieldValue::InetAddr(value)));
    }

    /// Packs a u32 slice into a binary field, elements in network byte
    /// order.
    pub fn set_u32_array(&mut self, id: u32, values: &[u32]) {
        let mut data = Vec::with_capacity(values.len() * 4);
        for v in values {
            data.extend_from_slice(&v.to_be_bytes());
        }
        self.set_binary(id, &data);
    }

    pub fn clear_fields(&mut self) {
        self.fields.clear();
        self.data.clear();
    }

    // --- field access ---

    pub fn field(&self, id: u32) -> Option<&Field> {
        self.fields.get(&id)
    }

    pub fn has_field(&self, id: u32) -> bool {
        self.fields.contains_key(&id)
    }

    pub fn field_type(&self, id: u32) -> Option<FieldType> {
        self.fields.get(&id).map(Field::field_type)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn get_u16(&self, id: u32) -> Option<u16> {
        match &self.field(id)?.value {
            FieldValue::Int16(v) => Some(*v),
            FieldValue::Int32(v) => Some(*v as u16),
            FieldValue::Int64(v) => Some(*v as u16),
            _ => None,
        }
    }

    pub fn get_i16(&self, id: u32) -> Option<i16> {
        self.get_u16(id).map(|v| v as i16)
    }

    pub fn get_u32(&self, id: u32) -> Option<u32> {
        match &self.field(id)?.value {
            FieldValue::Int16(v) => Some(*v as u32),
            FieldValue::Int32(v) => Some(*v),
            FieldValue::Int64(v) => Some(*v as u32),
            // IPv4 addresses are readable as 32-bit integers.
            FieldValue::InetAddr(a) if a.family() == AddressFamily::Inet => Some(a.v4_bits()),
            _ => None,
        }
    }

    pub fn get_i32(&self, id: u32) -> Option<i32> {
        match &self.field(id)?.value {
            FieldValue::Int16(v) => Some(*v as i16 as i32),
            FieldValue::Int32(v) => Some(*v as i32),
            FieldValue::Int64(v) => Some(*v as i32),
            _ => None,
        }
    }

    pub fn get_u64(&self, id: u32) -> Option<u64> {
        match &self.field(id)?.value {
            FieldValue::Int16(v) => Some(*v as u64),
            FieldValue::Int32(v) => Some(*v as u64),
            FieldValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, id: u32) -> Option<i64> {
        match &self.field(id)?.value {
            FieldValue::Int16(v) => Some(*v as i16 as i64),
            FieldValue::Int32(v) => Some(*v as i32 as i64),
            FieldValue::Int64(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn get_f64(&self, id: u32) -> Option<f64> {
        match &self.field(id)?.value {
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bool(&self, id: u32) -> bool {
        self.get_u64(id).is_some_and(|v| v != 0)
    }

    /// Returns a string field (either encoding).
    pub fn get_string(&self, id: u32) -> Option<String> {
        match &self.field(id)?.value {
            FieldValue::String(s) | FieldValue::Utf8String(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn get_binary(&self, id: u32) -> Option<&[u8]> {
        match &self.field(id)?.value {
            FieldValue::Binary(data) => Some(data),
            _ => None,
        }
    }

    pub fn get_inet_address(&self, id: u32) -> Option<InetAddress> {
        match &self.field(id)?.value {
            FieldValue::InetAddr(a) => Some(*a),
            FieldValue::Int32(v) => Some(InetAddress::from_v4_bits(*v)),
            _ => None,
        }
    }

    pub fn get_u32_array(&self, id: u32) -> Option<Vec<u32>> {
        let data = self.get_binary(id)?;
        Some(
            data.chunks_exact(4)
                .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    // --- wire form ---

    /// Builds the frame ready to be sent. When `allow_compression` is set,
    /// the payload is deflated under the protocol rules (version ≥ 4, frame
    /// larger than 128 bytes, neither `stream` nor `dont_compress` set) and
    /// the compressed form is kept only when it is actually smaller.
    pub fn serialize(&self, allow_compression: bool) -> Vec<u8> {
        let mut payload = ByteStream::new(256);
        let num_fields;
        if self.flags.binary() {
            payload.write(&self.data);
            num_fields = self.data.len() as u32;
        } else if self.flags.control() {
            num_fields = self.control_data;
        } else {
            for field in self.fields.values() {
                field.encode(&mut payload, self.version);
            }
            num_fields = self.fields.len() as u32;
        }

        // The frame must end on an 8-byte boundary. Version ≥ 2 field
        // records are already padded individually.
        let tail_pad = alignment_pad(HEADER_SIZE + payload.size());
        payload.write(&[0u8; ALIGNMENT][..tail_pad]);

        let total_size = HEADER_SIZE + payload.size();
        let mut flags = self.flags;
        flags.set_compressed(false);
        flags.set_version(self.version & 0x0F);

        let header = MessageHeader {
            code: self.code,
            flags: flags.as_u16(),
            size: total_size as u32,
            id: self.id,
            num_fields,
        };

        let mut frame = Vec::with_capacity(total_size);
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(payload.as_slice());

        if allow_compression
            && self.version >= 4
            && total_size > COMPRESSION_THRESHOLD
            && !flags.stream()
            && !flags.dont_compress()
        {
            if let Some(compressed) = Self::compress_frame(&header, &frame[HEADER_SIZE..]) {
                return compressed;
            }
        }
        frame
    }

    /// Deflates the payload; returns the rebuilt frame only when it beats
    /// the uncompressed one.
    fn compress_frame(header: &MessageHeader, payload: &[u8]) -> Option<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(payload).ok()?;
        let deflated = encoder.finish().ok()?;

        let raw_size = HEADER_SIZE + 4 + deflated.len();
        let compressed_size = raw_size + alignment_pad(raw_size);
        let total_size = HEADER_SIZE + payload.len();
        if compressed_size >= total_size - 4 {
            return None;
        }

        let mut flags = MessageFlags::from_u16(header.flags);
        flags.set_compressed(true);
        let compressed_header = MessageHeader {
            flags: flags.as_u16(),
            size: compressed_size as u32,
            ..*header
        };

        let mut frame = Vec::with_capacity(compressed_size);
        frame.extend_from_slice(&compressed_header.to_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&deflated);
        frame.resize(compressed_size, 0);
        Some(frame)
    }

    fn inflate(data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(expected_size);
        let mut decoder = DeflateDecoder::new(data).take(expected_size as u64 + 1);
        decoder.read_to_end(&mut out).map_err(|e| {
            log::debug!("failed to inflate message payload: {e}");
            MsgError::Compression("inflate failed")
        })?;
        if out.len() != expected_size {
            log::debug!(
                "inflated payload size {} does not match declared size {}",
                out.len(),
                expected_size
            );
            return Err(MsgError::Compression("uncompressed size mismatch"));
        }
        Ok(out)
    }

    /// Parses a complete frame. `version_hint` is used when the frame does
    /// not carry an encoded protocol version (pre-version-1 peers).
    pub fn parse(frame: &[u8], version_hint: u8) -> Result<Message> {
        if frame.len() < HEADER_SIZE {
            return Err(MsgError::InvalidFormat("frame shorter than header"));
        }
        let header = MessageHeader::parse(frame)
            .map_err(|_| MsgError::InvalidFormat("unreadable header"))?;
        if header.size as usize != frame.len() {
            return Err(MsgError::InvalidFormat("declared size does not match frame"));
        }

        let mut flags = header.message_flags();
        let version = if header.version() != 0 { header.version() } else { version_hint };
        if version > PROTOCOL_VERSION {
            return Err(MsgError::VersionMismatch(version));
        }
        let compressed = flags.compressed();
        // Clear "compressed" so the message is not mistakenly re-sent as
        // such; the payload is stored uncompressed.
        flags.set_compressed(false);

        let mut msg = Message {
            code: header.code,
            id: header.id,
            flags,
            version,
            fields: BTreeMap::new(),
            data: Vec::new(),
            control_data: 0,
        };

        if flags.binary() {
            let data_size = header.num_fields as usize;
            if compressed && !flags.stream() && version >= 4 {
                if frame.len() < HEADER_SIZE + 4 {
                    return Err(MsgError::InvalidFormat("compressed frame too short"));
                }
                msg.data = Self::inflate(&frame[HEADER_SIZE + 4..], data_size)?;
            } else {
                let payload = &frame[HEADER_SIZE..];
                if payload.len() < data_size {
                    return Err(MsgError::InvalidFormat("binary payload shorter than declared"));
                }
                msg.data = payload[..data_size].to_vec();
            }
        } else if flags.control() {
            msg.control_data = header.num_fields;
        } else {
            let payload: Vec<u8>;
            if compressed && version >= 4 {
                if frame.len() < HEADER_SIZE + 4 {
                    return Err(MsgError::InvalidFormat("compressed frame too short"));
                }
                let expected = u32::from_be_bytes(
                    frame[HEADER_SIZE..HEADER_SIZE + 4].try_into().unwrap(),
                ) as usize;
                payload = Self::inflate(&frame[HEADER_SIZE + 4..], expected)?;
            } else {
                payload = frame[HEADER_SIZE..].to_vec();
            }

            let mut pos = 0;
            for _ in 0..header.num_fields {
                let (field, next) = Field::decode(&payload, pos, version)?;
                msg.fields.insert(field.id, field);
                pos = next;
            }
        }

        Ok(msg)
    }
}
