//! Serialized container structures: header, TOC, and index manifests.

use serde::{Deserialize, Serialize};

use crate::constants::FREE_TIER_CAPACITY_BYTES;
use crate::error::Result;
use crate::types::frame::Frame;

/// Fixed-layout file header. Rewritten atomically on each successful commit;
/// everything else in the file is located through it (or recovered through the
/// commit footer when the header is stale after a crash).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u16,
    /// Offset of the current commit footer; the TOC ends right before it.
    pub footer_offset: u64,
    pub wal_offset: u64,
    pub wal_size: u64,
    /// Ring position of the first byte past the last checkpointed record.
    pub wal_checkpoint_pos: u64,
    /// Highest WAL sequence folded into the committed state.
    pub wal_sequence: u64,
    pub toc_checksum: [u8; 32],
}

/// Location and integrity of the embedded lexical index artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexIndexManifest {
    pub doc_count: u64,
    pub generation: u64,
    pub bytes_offset: u64,
    pub bytes_length: u64,
    pub checksum: [u8; 32],
}

/// Location and integrity of the embedded time index track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeIndexManifest {
    pub entry_count: u64,
    pub bytes_offset: u64,
    pub bytes_length: u64,
    pub checksum: [u8; 32],
}

/// Capacity grant currently applied to this memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRef {
    pub issuer: String,
    pub seq_no: u64,
    pub capacity_bytes: u64,
    pub verified: bool,
}

impl Default for TicketRef {
    fn default() -> Self {
        Self {
            issuer: "free-tier".into(),
            seq_no: 1,
            capacity_bytes: FREE_TIER_CAPACITY_BYTES,
            verified: false,
        }
    }
}

/// Table of contents: the committed frame table plus index manifests.
///
/// Encoded with bincode (fixed-int, little-endian) and self-checksummed; the
/// checksum is computed over the encoding with the checksum field zeroed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toc {
    pub toc_version: u64,
    pub frames: Vec<Frame>,
    pub lex_index: Option<LexIndexManifest>,
    pub time_index: Option<TimeIndexManifest>,
    pub ticket_ref: TicketRef,
    pub toc_checksum: [u8; 32],
}

impl Toc {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(self, crate::disk_config())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (toc, _) = bincode::serde::decode_from_slice(bytes, crate::disk_config())?;
        Ok(toc)
    }

    /// Checksum over `bytes` as if the embedded checksum field were zero.
    #[must_use]
    pub fn calculate_checksum(bytes: &[u8]) -> [u8; 32] {
        blake3::hash(bytes).into()
    }

    pub fn verify_checksum(&self) -> Result<()> {
        let mut scratch = self.clone();
        scratch.toc_checksum = [0u8; 32];
        let bytes = scratch.encode()?;
        let expected = Self::calculate_checksum(&bytes);
        if expected == self.toc_checksum {
            Ok(())
        } else {
            Err(crate::error::Mv2Error::ChecksumMismatch { region: "toc" })
        }
    }
}
