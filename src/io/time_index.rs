//! Embedded time index track.
//!
//! The track is a flat sorted run of `(timestamp, frame_id)` pairs written at
//! commit time: `[magic:4][version:u16][reserved:2][count:u64]` followed by
//! `count` entries of `[timestamp:i64][frame_id:u64]`, then a blake3 digest of
//! everything before it. Sorted by `(timestamp, frame_id)` so timeline reads
//! are a binary search plus a linear walk.

use crate::error::{Mv2Error, Result};
use crate::types::FrameId;

const TRACK_MAGIC: [u8; 4] = *b"MV2T";
const TRACK_VERSION: u16 = 1;
const TRACK_HEADER_SIZE: usize = 16;
const ENTRY_SIZE: usize = 16;
const DIGEST_SIZE: usize = 32;

/// One committed `(timestamp, frame_id)` pair. Only the first chunk of a
/// chunked put appears in the track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeIndexEntry {
    pub timestamp: i64,
    pub frame_id: FrameId,
}

/// Serialize the track. Entries must already be sorted; this is asserted in
/// debug builds and trusted in release.
pub fn encode_track(entries: &[TimeIndexEntry]) -> Result<Vec<u8>> {
    debug_assert!(entries.windows(2).all(|pair| pair[0] <= pair[1]));

    let mut bytes =
        Vec::with_capacity(TRACK_HEADER_SIZE + entries.len() * ENTRY_SIZE + DIGEST_SIZE);
    bytes.extend_from_slice(&TRACK_MAGIC);
    bytes.extend_from_slice(&TRACK_VERSION.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 2]);
    bytes.extend_from_slice(&(entries.len() as u64).to_le_bytes());
    for entry in entries {
        bytes.extend_from_slice(&entry.timestamp.to_le_bytes());
        bytes.extend_from_slice(&entry.frame_id.to_le_bytes());
    }
    let digest = blake3::hash(&bytes);
    bytes.extend_from_slice(digest.as_bytes());
    Ok(bytes)
}

pub fn decode_track(bytes: &[u8]) -> Result<Vec<TimeIndexEntry>> {
    if bytes.len() < TRACK_HEADER_SIZE + DIGEST_SIZE {
        return Err(Mv2Error::InvalidTimeIndex {
            reason: "track shorter than header".into(),
        });
    }
    if bytes[..4] != TRACK_MAGIC {
        return Err(Mv2Error::InvalidTimeIndex {
            reason: "bad track magic".into(),
        });
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != TRACK_VERSION {
        return Err(Mv2Error::InvalidTimeIndex {
            reason: format!("unsupported track version {version}"),
        });
    }

    // Structural length check first: a truncated track is reported as
    // invalid rather than as a digest mismatch.
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[8..16]);
    let count = u64::from_le_bytes(raw) as usize;
    let expected_len = count
        .checked_mul(ENTRY_SIZE)
        .and_then(|body| body.checked_add(TRACK_HEADER_SIZE + DIGEST_SIZE));
    if expected_len != Some(bytes.len()) {
        return Err(Mv2Error::InvalidTimeIndex {
            reason: "entry count does not match track length".into(),
        });
    }

    let body_len = bytes.len() - DIGEST_SIZE;
    let digest = blake3::hash(&bytes[..body_len]);
    if bytes[body_len..] != *digest.as_bytes() {
        return Err(Mv2Error::ChecksumMismatch {
            region: "time_index",
        });
    }

    let mut entries = Vec::with_capacity(count);
    let mut previous: Option<TimeIndexEntry> = None;
    for index in 0..count {
        let start = TRACK_HEADER_SIZE + index * ENTRY_SIZE;
        let mut ts_raw = [0u8; 8];
        ts_raw.copy_from_slice(&bytes[start..start + 8]);
        let mut id_raw = [0u8; 8];
        id_raw.copy_from_slice(&bytes[start + 8..start + 16]);
        let entry = TimeIndexEntry {
            timestamp: i64::from_le_bytes(ts_raw),
            frame_id: u64::from_le_bytes(id_raw),
        };
        if previous.is_some_and(|prev| prev > entry) {
            return Err(Mv2Error::InvalidTimeIndex {
                reason: "track entries out of order".into(),
            });
        }
        previous = Some(entry);
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_track_roundtrip() {
        let bytes = encode_track(&[]).expect("encode");
        assert!(decode_track(&bytes).expect("decode").is_empty());
    }

    #[test]
    fn sorted_entries_roundtrip() {
        let entries = vec![
            TimeIndexEntry { timestamp: -50, frame_id: 2 },
            TimeIndexEntry { timestamp: 100, frame_id: 0 },
            TimeIndexEntry { timestamp: 100, frame_id: 1 },
            TimeIndexEntry { timestamp: 7_000, frame_id: 3 },
        ];
        let bytes = encode_track(&entries).expect("encode");
        assert_eq!(decode_track(&bytes).expect("decode"), entries);
    }

    #[test]
    fn flipped_byte_is_rejected() {
        let entries = vec![TimeIndexEntry { timestamp: 42, frame_id: 0 }];
        let mut bytes = encode_track(&entries).expect("encode");
        bytes[TRACK_HEADER_SIZE] ^= 0xFF;
        let err = decode_track(&bytes).expect_err("should fail");
        assert!(matches!(err, Mv2Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn truncated_track_is_invalid() {
        let entries = vec![TimeIndexEntry { timestamp: 42, frame_id: 0 }];
        let bytes = encode_track(&entries).expect("encode");
        let err = decode_track(&bytes[..bytes.len() - 1]).expect_err("should fail");
        assert!(matches!(err, Mv2Error::InvalidTimeIndex { .. }));
    }
}
