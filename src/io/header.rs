//! Fixed-layout header codec.
//!
//! Layout (little-endian, 128 bytes at offset 0):
//! `[magic:4][version:u16][reserved:u16][footer_offset:u64][wal_offset:u64]`
//! `[wal_size:u64][wal_checkpoint_pos:u64][wal_sequence:u64][toc_checksum:32]`
//! `[header_checksum:32][padding to 128]`
//!
//! The header checksum is blake3 over the first 80 bytes, so a torn header
//! write is detected on the next open rather than silently trusted.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::constants::{MAGIC, SPEC_VERSION};
use crate::error::{Mv2Error, Result};
use crate::types::Header;

pub const HEADER_SIZE: usize = 128;
const CHECKSUMMED_BYTES: usize = 80;

pub struct HeaderCodec;

impl HeaderCodec {
    pub fn write(file: &mut File, header: &Header) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..4].copy_from_slice(&header.magic);
        buf[4..6].copy_from_slice(&header.version.to_le_bytes());
        buf[8..16].copy_from_slice(&header.footer_offset.to_le_bytes());
        buf[16..24].copy_from_slice(&header.wal_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&header.wal_size.to_le_bytes());
        buf[32..40].copy_from_slice(&header.wal_checkpoint_pos.to_le_bytes());
        buf[40..48].copy_from_slice(&header.wal_sequence.to_le_bytes());
        buf[48..80].copy_from_slice(&header.toc_checksum);
        let digest = blake3::hash(&buf[..CHECKSUMMED_BYTES]);
        buf[80..112].copy_from_slice(digest.as_bytes());

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;
        Ok(())
    }

    pub fn read(file: &mut File) -> Result<Header> {
        let mut buf = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf).map_err(|_| Mv2Error::InvalidHeader {
            reason: "file too small to contain a header".into(),
        })?;
        Self::decode(&buf)
    }

    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Header> {
        let magic: [u8; 4] = buf[..4].try_into().map_err(|_| Mv2Error::InvalidHeader {
            reason: "truncated magic".into(),
        })?;
        if magic != MAGIC {
            return Err(Mv2Error::InvalidHeader {
                reason: "bad magic".into(),
            });
        }
        let digest = blake3::hash(&buf[..CHECKSUMMED_BYTES]);
        if buf[80..112] != *digest.as_bytes() {
            return Err(Mv2Error::ChecksumMismatch { region: "header" });
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > SPEC_VERSION {
            return Err(Mv2Error::InvalidHeader {
                reason: format!("unsupported format version {version:#06x}"),
            });
        }
        let read_u64 = |start: usize| -> u64 {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[start..start + 8]);
            u64::from_le_bytes(raw)
        };
        let mut toc_checksum = [0u8; 32];
        toc_checksum.copy_from_slice(&buf[48..80]);

        Ok(Header {
            magic,
            version,
            footer_offset: read_u64(8),
            wal_offset: read_u64(16),
            wal_size: read_u64(24),
            wal_checkpoint_pos: read_u64(32),
            wal_sequence: read_u64(40),
            toc_checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{WAL_OFFSET, WAL_SIZE_DEFAULT};
    use tempfile::tempfile;

    fn sample_header() -> Header {
        Header {
            magic: MAGIC,
            version: SPEC_VERSION,
            footer_offset: WAL_OFFSET + WAL_SIZE_DEFAULT,
            wal_offset: WAL_OFFSET,
            wal_size: WAL_SIZE_DEFAULT,
            wal_checkpoint_pos: 0,
            wal_sequence: 0,
            toc_checksum: [7u8; 32],
        }
    }

    #[test]
    fn header_roundtrip() {
        let mut file = tempfile().expect("tmp");
        let header = sample_header();
        HeaderCodec::write(&mut file, &header).expect("write");
        let read_back = HeaderCodec::read(&mut file).expect("read");
        assert_eq!(read_back, header);
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let mut file = tempfile().expect("tmp");
        HeaderCodec::write(&mut file, &sample_header()).expect("write");
        file.seek(SeekFrom::Start(10)).expect("seek");
        file.write_all(&[0xFF]).expect("corrupt");
        let err = HeaderCodec::read(&mut file).expect_err("should fail");
        assert!(matches!(err, Mv2Error::ChecksumMismatch { region: "header" }));
    }

    #[test]
    fn wrong_magic_is_invalid_header() {
        let mut file = tempfile().expect("tmp");
        HeaderCodec::write(&mut file, &sample_header()).expect("write");
        file.seek(SeekFrom::Start(0)).expect("seek");
        file.write_all(b"NOPE").expect("corrupt magic");
        let err = HeaderCodec::read(&mut file).expect_err("should fail");
        assert!(matches!(err, Mv2Error::InvalidHeader { .. }));
    }
}
