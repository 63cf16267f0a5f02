//! Commit footer: the fixed-size trailer written after every committed TOC.
//!
//! The footer is the recovery anchor. The header names the current TOC offset,
//! but after a crash mid-commit the header may point at clobbered bytes; the
//! backwards scan in [`find_last_valid_footer`] locates the newest TOC whose
//! hash still matches.

use crate::error::{Mv2Error, Result};

pub const FOOTER_MAGIC: [u8; 8] = *b"MV2FOOT\0";
pub const FOOTER_SIZE: usize = 64;

/// Trailer binding a committed TOC to its length, hash, and generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitFooter {
    pub generation: u64,
    pub toc_len: u64,
    pub toc_hash: [u8; 32],
}

impl CommitFooter {
    #[must_use]
    pub fn new(generation: u64, toc_bytes: &[u8]) -> Self {
        Self {
            generation,
            toc_len: toc_bytes.len() as u64,
            toc_hash: blake3::hash(toc_bytes).into(),
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[..8].copy_from_slice(&FOOTER_MAGIC);
        buf[8..16].copy_from_slice(&self.generation.to_le_bytes());
        buf[16..24].copy_from_slice(&self.toc_len.to_le_bytes());
        buf[24..56].copy_from_slice(&self.toc_hash);
        let digest = blake3::hash(&buf[..56]);
        buf[56..64].copy_from_slice(&digest.as_bytes()[..8]);
        buf
    }

    /// Decode a footer from exactly [`FOOTER_SIZE`] bytes, validating the
    /// magic and the self-checksum. Returns `None` for anything that is not a
    /// well-formed footer; corruption is the caller's finding to report.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != FOOTER_SIZE || bytes[..8] != FOOTER_MAGIC {
            return None;
        }
        let digest = blake3::hash(&bytes[..56]);
        if bytes[56..64] != digest.as_bytes()[..8] {
            return None;
        }
        let generation = u64::from_le_bytes(bytes[8..16].try_into().ok()?);
        let toc_len = u64::from_le_bytes(bytes[16..24].try_into().ok()?);
        let toc_hash: [u8; 32] = bytes[24..56].try_into().ok()?;
        Some(Self {
            generation,
            toc_len,
            toc_hash,
        })
    }

    #[must_use]
    pub fn hash_matches(&self, toc_bytes: &[u8]) -> bool {
        self.toc_len == toc_bytes.len() as u64
            && blake3::hash(toc_bytes) == blake3::Hash::from(self.toc_hash)
    }

    pub fn require_hash(&self, toc_bytes: &[u8]) -> Result<()> {
        if self.hash_matches(toc_bytes) {
            return Ok(());
        }
        Err(Mv2Error::InvalidFooter {
            reason: "commit footer toc hash mismatch".into(),
        })
    }
}

/// A validated footer plus the TOC bytes it covers.
#[derive(Debug)]
pub struct FooterSlice<'a> {
    pub footer: CommitFooter,
    pub footer_offset: usize,
    pub toc_offset: usize,
    pub toc_bytes: &'a [u8],
}

/// Scan `data` backwards for the newest footer whose TOC hash validates.
#[must_use]
pub fn find_last_valid_footer(data: &[u8]) -> Option<FooterSlice<'_>> {
    if data.len() < FOOTER_SIZE {
        return None;
    }
    let mut candidate = data.len() - FOOTER_SIZE;
    loop {
        if data[candidate..candidate + 8] == FOOTER_MAGIC {
            if let Some(footer) = CommitFooter::decode(&data[candidate..candidate + FOOTER_SIZE]) {
                let toc_len = footer.toc_len as usize;
                if let Some(toc_offset) = candidate.checked_sub(toc_len) {
                    let toc_bytes = &data[toc_offset..candidate];
                    if footer.hash_matches(toc_bytes) {
                        return Some(FooterSlice {
                            footer,
                            footer_offset: candidate,
                            toc_offset,
                            toc_bytes,
                        });
                    }
                }
            }
        }
        if candidate == 0 {
            return None;
        }
        candidate -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_roundtrip() {
        let toc = b"fake toc bytes";
        let footer = CommitFooter::new(3, toc);
        let encoded = footer.encode();
        let decoded = CommitFooter::decode(&encoded).expect("decode");
        assert_eq!(decoded, footer);
        assert!(decoded.hash_matches(toc));
    }

    #[test]
    fn scan_finds_newest_footer() {
        let old_toc = b"old".to_vec();
        let new_toc = b"newer toc".to_vec();
        let mut data = Vec::new();
        data.extend_from_slice(&old_toc);
        data.extend_from_slice(&CommitFooter::new(1, &old_toc).encode());
        data.extend_from_slice(&new_toc);
        data.extend_from_slice(&CommitFooter::new(2, &new_toc).encode());

        let slice = find_last_valid_footer(&data).expect("footer");
        assert_eq!(slice.footer.generation, 2);
        assert_eq!(slice.toc_bytes, new_toc.as_slice());
    }

    #[test]
    fn corrupt_footer_is_skipped() {
        let toc = b"toc".to_vec();
        let mut data = Vec::new();
        data.extend_from_slice(&toc);
        data.extend_from_slice(&CommitFooter::new(1, &toc).encode());
        let tail = data.len() - 1;
        data[tail] ^= 0xFF;
        // Self-checksum fails, and no earlier candidate exists.
        assert!(find_last_valid_footer(&data).is_none());
    }
}
