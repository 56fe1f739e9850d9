//! Checksum and digest helpers.

use crc::{CRC_32_ISO_HDLC, Crc};
use sha1::Sha1;
use sha2::{Digest, Sha256};

static CRC32_ALG: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// One-shot CRC-32 (ISO-HDLC polynomial, the common "crc32").
pub fn crc32(data: &[u8]) -> u32 {
    CRC32_ALG.checksum(data)
}

/// Incremental CRC-32 state.
pub struct Crc32 {
    digest: crc::Digest<'static, u32>,
}

impl Crc32 {
    pub fn new() -> Crc32 {
        Crc32 {
            digest: CRC32_ALG.digest(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.digest.finalize()
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Crc32::new()
    }
}

/// One-shot SHA-1 digest.
pub fn sha1_hash(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// One-shot SHA-256 digest.
pub fn sha256_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpm_tests::assert_hex_eq;

    #[test]
    fn crc32_known_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn crc32_incremental_matches_one_shot() {
        let mut state = Crc32::new();
        state.update(b"1234");
        state.update(b"56789");
        assert_eq!(state.finalize(), crc32(b"123456789"));
    }

    #[test]
    fn sha1_known_value() {
        assert_hex_eq!(sha1_hash(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn sha256_known_value() {
        assert_hex_eq!(
            sha256_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
