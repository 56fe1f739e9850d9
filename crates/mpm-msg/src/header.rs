//! MPM frame header and flag word.

use std::io::Cursor;

use binrw::prelude::*;
use modular_bitfield::prelude::*;

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Highest protocol version this implementation speaks.
pub const PROTOCOL_VERSION: u8 = 5;

/// Field records are padded to this boundary from protocol version 2 on;
/// the total frame size is always a multiple of it.
pub const ALIGNMENT: usize = 8;

/// MPM frame header. All fields are big-endian on the wire.
///
/// `num_fields` is overloaded: the field count for structured messages, the
/// payload byte count for binary messages, and the control code for control
/// messages.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(big)]
pub struct MessageHeader {
    /// Command or response kind.
    pub code: u16,
    /// Low 12 bits: flag set; high 4 bits: protocol version.
    pub flags: u16,
    /// Total frame size in bytes, including this header.
    pub size: u32,
    /// Request correlator, echoed by the server.
    pub id: u32,
    pub num_fields: u32,
}

impl MessageHeader {
    pub const STRUCT_SIZE: usize = HEADER_SIZE;

    /// Parses a header from the first 16 bytes of a frame.
    pub fn parse(data: &[u8]) -> binrw::BinResult<MessageHeader> {
        MessageHeader::read(&mut Cursor::new(data))
    }

    /// Serializes the header into a 16-byte array.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut cursor = Cursor::new([0u8; HEADER_SIZE]);
        self.write(&mut cursor).expect("header serialization cannot fail");
        cursor.into_inner()
    }

    pub fn message_flags(&self) -> MessageFlags {
        MessageFlags::from_bytes(self.flags.to_le_bytes())
    }

    /// Protocol version from the high 4 bits of the flag word; 0 means "not
    /// encoded".
    pub fn version(&self) -> u8 {
        (self.flags >> 12) as u8
    }
}

/// The 16-bit flag word of the frame header.
///
/// Construction site for the low 12 flag bits and the 4-bit version field.
/// Bit 0 is the least significant bit of the wire value.
#[bitfield]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageFlags {
    /// Payload is an opaque blob; `num_fields` holds its byte count.
    pub binary: bool,
    /// Last message of a multi-frame sequence.
    pub end_of_sequence: bool,
    /// Never compress this message.
    pub dont_compress: bool,
    /// No payload; `num_fields` holds a control code.
    pub control: bool,
    /// Payload is deflate-compressed.
    pub compressed: bool,
    /// Message is part of a data stream.
    pub stream: bool,
    /// Stream content is in reverse order.
    pub reverse_order: bool,
    #[skip]
    __: B5,
    /// Protocol version, 0..15.
    pub version: B4,
}

impl MessageFlags {
    /// The flag word as a host u16 (wire value before byte-order
    /// conversion).
    pub fn as_u16(self) -> u16 {
        u16::from_le_bytes(self.into_bytes())
    }

    pub fn from_u16(value: u16) -> MessageFlags {
        MessageFlags::from_bytes(value.to_le_bytes())
    }
}

impl Default for MessageFlags {
    fn default() -> Self {
        MessageFlags::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpm_tests::assert_hex_eq;

    #[test]
    fn header_layout() {
        let header = MessageHeader {
            code: 0x0042,
            flags: MessageFlags::new().with_version(4).as_u16(),
            size: 32,
            id: 17,
            num_fields: 1,
        };
        assert_hex_eq!(header.to_bytes(), "0042 4000 00000020 00000011 00000001");
        assert_eq!(MessageHeader::parse(&header.to_bytes()).unwrap(), header);
    }

    #[test]
    fn flag_bits() {
        assert_eq!(MessageFlags::new().with_binary(true).as_u16(), 0x0001);
        assert_eq!(MessageFlags::new().with_end_of_sequence(true).as_u16(), 0x0002);
        assert_eq!(MessageFlags::new().with_dont_compress(true).as_u16(), 0x0004);
        assert_eq!(MessageFlags::new().with_control(true).as_u16(), 0x0008);
        assert_eq!(MessageFlags::new().with_compressed(true).as_u16(), 0x0010);
        assert_eq!(MessageFlags::new().with_stream(true).as_u16(), 0x0020);
        assert_eq!(MessageFlags::new().with_reverse_order(true).as_u16(), 0x0040);
        assert_eq!(MessageFlags::new().with_version(5).as_u16(), 0x5000);

        let flags = MessageFlags::from_u16(0x5010);
        assert_eq!(flags.version(), 5);
        assert!(flags.compressed());
        assert!(!flags.binary());
    }
}
