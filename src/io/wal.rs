//! Embedded write-ahead log.
//!
//! The WAL lives inside the container file as a fixed ring region. Each
//! record is `[seq:u64][len:u32][reserved:4][blake3:32][payload]`; a zeroed
//! record header is the sentinel terminating the valid run. Records are
//! appended on every mutating call and consumed as a batch at commit, which
//! advances the checkpoint sequence stored in the header.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::constants::{WAL_CHECKPOINT_PERIOD, WAL_CHECKPOINT_THRESHOLD};
use crate::error::{Mv2Error, Result};
use crate::types::Header;

pub const ENTRY_HEADER_SIZE: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalStats {
    pub region_size: u64,
    pub pending_bytes: u64,
    pub appends_since_checkpoint: u64,
    pub sequence: u64,
}

/// A decoded, checksum-verified WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub sequence: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub struct EmbeddedWal {
    file: File,
    region_offset: u64,
    region_size: u64,
    write_head: u64,
    pending_bytes: u64,
    sequence: u64,
    checkpoint_sequence: u64,
    appends_since_checkpoint: u64,
    read_only: bool,
}

impl EmbeddedWal {
    pub fn open(file: &File, header: &Header) -> Result<Self> {
        Self::open_internal(file, header, false)
    }

    pub fn open_read_only(file: &File, header: &Header) -> Result<Self> {
        Self::open_internal(file, header, true)
    }

    fn open_internal(file: &File, header: &Header, read_only: bool) -> Result<Self> {
        if header.wal_size == 0 {
            return Err(Mv2Error::InvalidHeader {
                reason: "wal_size must be non-zero".into(),
            });
        }
        let mut clone = file.try_clone()?;
        let region_offset = header.wal_offset;
        let region_size = header.wal_size;
        let checkpoint_sequence = header.wal_sequence;

        let (records, next_head) = scan_records(&mut clone, region_offset, region_size)?;
        let pending_bytes = records
            .iter()
            .filter(|record| record.sequence > checkpoint_sequence)
            .map(|record| ENTRY_HEADER_SIZE as u64 + record.payload.len() as u64)
            .sum();
        let sequence = records
            .last()
            .map_or(checkpoint_sequence, |record| record.sequence);

        let mut wal = Self {
            file: clone,
            region_offset,
            region_size,
            write_head: next_head,
            pending_bytes,
            sequence,
            checkpoint_sequence,
            appends_since_checkpoint: 0,
            read_only,
        };
        if !wal.read_only {
            wal.write_sentinel()?;
        }
        Ok(wal)
    }

    fn assert_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Mv2Error::ReadOnly {
                reason: "wal opened read-only".into(),
            });
        }
        Ok(())
    }

    /// Append a record, returning its sequence number. The record is fsynced
    /// before the call returns; durability of its effects still waits for the
    /// next commit.
    pub fn append_entry(&mut self, payload: &[u8]) -> Result<u64> {
        self.assert_writable()?;
        if payload.is_empty() {
            return Err(Mv2Error::Encode {
                reason: "wal payload must be non-empty".into(),
            });
        }
        if payload.len() > u32::MAX as usize {
            return Err(Mv2Error::CheckpointFailed {
                reason: "wal payload too large".into(),
            });
        }

        let entry_size = ENTRY_HEADER_SIZE as u64 + payload.len() as u64;
        if entry_size + ENTRY_HEADER_SIZE as u64 > self.region_size {
            return Err(Mv2Error::CheckpointFailed {
                reason: "embedded wal region too small for entry".into(),
            });
        }
        if self.pending_bytes + entry_size + ENTRY_HEADER_SIZE as u64 > self.region_size {
            return Err(Mv2Error::CheckpointFailed {
                reason: "embedded wal region full".into(),
            });
        }
        // Wrapping over pending records would lose uncommitted data; the
        // caller must checkpoint first.
        if self.write_head + entry_size + ENTRY_HEADER_SIZE as u64 > self.region_size {
            if self.pending_bytes > 0 {
                return Err(Mv2Error::CheckpointFailed {
                    reason: "embedded wal region full".into(),
                });
            }
            self.write_head = 0;
        }

        let next_sequence = self.sequence + 1;
        tracing::debug!(
            wal.write_head = self.write_head,
            wal.sequence = next_sequence,
            wal.payload_len = payload.len(),
            "wal append entry"
        );
        self.write_record(self.write_head, next_sequence, payload)?;

        self.write_head += entry_size;
        self.pending_bytes += entry_size;
        self.sequence = next_sequence;
        self.appends_since_checkpoint = self.appends_since_checkpoint.saturating_add(1);
        self.write_sentinel()?;
        self.file.sync_all()?;

        Ok(self.sequence)
    }

    /// Bytes a batch of appends can still claim without a checkpoint,
    /// reserving room for the terminating sentinel. Conservative while
    /// pending records exist because the ring cannot wrap over them.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        if self.pending_bytes == 0 {
            self.region_size.saturating_sub(ENTRY_HEADER_SIZE as u64)
        } else {
            self.region_size
                .saturating_sub(self.write_head + ENTRY_HEADER_SIZE as u64)
        }
    }

    /// True once the region occupancy or append count warrants a commit.
    #[must_use]
    pub fn should_checkpoint(&self) -> bool {
        if self.read_only || self.region_size == 0 {
            return false;
        }
        let occupancy = self.pending_bytes as f64 / self.region_size as f64;
        occupancy >= WAL_CHECKPOINT_THRESHOLD
            || self.appends_since_checkpoint >= WAL_CHECKPOINT_PERIOD
    }

    /// Fold all pending records into the header checkpoint marker. The caller
    /// is responsible for having applied them first.
    pub fn record_checkpoint(&mut self, header: &mut Header) -> Result<()> {
        self.assert_writable()?;
        self.write_head = 0;
        self.pending_bytes = 0;
        self.appends_since_checkpoint = 0;
        self.checkpoint_sequence = self.sequence;
        header.wal_checkpoint_pos = 0;
        header.wal_sequence = self.checkpoint_sequence;
        self.write_sentinel()
    }

    /// Records appended after the current checkpoint, in sequence order.
    pub fn pending_records(&mut self) -> Result<Vec<WalRecord>> {
        self.records_after(self.checkpoint_sequence)
    }

    pub fn records_after(&mut self, sequence: u64) -> Result<Vec<WalRecord>> {
        let (records, _) = scan_records(&mut self.file, self.region_offset, self.region_size)?;
        Ok(records
            .into_iter()
            .filter(|record| record.sequence > sequence)
            .collect())
    }

    #[must_use]
    pub fn stats(&self) -> WalStats {
        WalStats {
            region_size: self.region_size,
            pending_bytes: self.pending_bytes,
            appends_since_checkpoint: self.appends_since_checkpoint,
            sequence: self.sequence,
        }
    }

    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn write_record(&mut self, position: u64, sequence: u64, payload: &[u8]) -> Result<()> {
        let digest = blake3::hash(payload);
        let mut record = Vec::with_capacity(ENTRY_HEADER_SIZE + payload.len());
        record.extend_from_slice(&sequence.to_le_bytes());
        record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        record.extend_from_slice(&[0u8; 4]);
        record.extend_from_slice(digest.as_bytes());
        record.extend_from_slice(payload);
        self.seek_and_write(position, &record)
    }

    /// A zeroed record header marks the end of the valid run.
    fn write_sentinel(&mut self) -> Result<()> {
        if self.write_head + ENTRY_HEADER_SIZE as u64 > self.region_size {
            return Ok(());
        }
        let zero = [0u8; ENTRY_HEADER_SIZE];
        self.seek_and_write(self.write_head, &zero)
    }

    fn seek_and_write(&mut self, position: u64, bytes: &[u8]) -> Result<()> {
        self.assert_writable()?;
        self.file
            .seek(SeekFrom::Start(self.region_offset + position))?;
        self.file.write_all(bytes)?;
        Ok(())
    }
}

fn scan_records(file: &mut File, offset: u64, size: u64) -> Result<(Vec<WalRecord>, u64)> {
    let mut records = Vec::new();
    let mut cursor = 0u64;
    while cursor + ENTRY_HEADER_SIZE as u64 <= size {
        file.seek(SeekFrom::Start(offset + cursor))?;
        let mut header = [0u8; ENTRY_HEADER_SIZE];
        file.read_exact(&mut header)?;

        let sequence = u64::from_le_bytes(header[..8].try_into().map_err(|_| {
            Mv2Error::WalCorruption {
                offset: cursor,
                reason: "invalid wal sequence header".into(),
            }
        })?);
        let length =
            u64::from(u32::from_le_bytes(header[8..12].try_into().map_err(|_| {
                Mv2Error::WalCorruption {
                    offset: cursor,
                    reason: "invalid wal length header".into(),
                }
            })?));
        let checksum = &header[16..48];

        if sequence == 0 && length == 0 {
            break;
        }
        if length == 0 || cursor + ENTRY_HEADER_SIZE as u64 + length > size {
            tracing::error!(
                wal.scan_offset = cursor,
                wal.sequence = sequence,
                wal.length = length,
                wal.region_size = size,
                "wal record length invalid"
            );
            return Err(Mv2Error::WalCorruption {
                offset: cursor,
                reason: "wal record length invalid".into(),
            });
        }

        let mut payload = vec![0u8; length as usize];
        file.read_exact(&mut payload)?;
        if blake3::hash(&payload).as_bytes() != checksum {
            return Err(Mv2Error::WalCorruption {
                offset: cursor,
                reason: "wal record checksum mismatch".into(),
            });
        }

        records.push(WalRecord { sequence, payload });
        cursor += ENTRY_HEADER_SIZE as u64 + length;
    }
    Ok((records, cursor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{MAGIC, SPEC_VERSION, WAL_OFFSET};
    use tempfile::tempfile;

    fn header_for(size: u64) -> Header {
        Header {
            magic: MAGIC,
            version: SPEC_VERSION,
            footer_offset: WAL_OFFSET + size,
            wal_offset: WAL_OFFSET,
            wal_size: size,
            wal_checkpoint_pos: 0,
            wal_sequence: 0,
            toc_checksum: [0u8; 32],
        }
    }

    fn prepare_wal(size: u64) -> (File, Header) {
        let file = tempfile().expect("temp file");
        file.set_len(WAL_OFFSET + size).expect("set_len");
        (file, header_for(size))
    }

    #[test]
    fn append_and_recover() {
        let (file, header) = prepare_wal(1024);
        let mut wal = EmbeddedWal::open(&file, &header).expect("open wal");

        wal.append_entry(b"first").expect("append first");
        wal.append_entry(b"second").expect("append second");

        let records = wal.records_after(0).expect("records");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload, b"first");
        assert_eq!(records[0].sequence, 1);
        assert_eq!(records[1].payload, b"second");
        assert_eq!(records[1].sequence, 2);

        // Sequence and pending state survive a reopen of the same region.
        let reopened = EmbeddedWal::open(&file, &header).expect("reopen");
        assert_eq!(reopened.stats().sequence, 2);
        assert!(reopened.stats().pending_bytes > 0);
    }

    #[test]
    fn checkpoint_clears_pending() {
        let (file, mut header) = prepare_wal(1024);
        let mut wal = EmbeddedWal::open(&file, &header).expect("open wal");

        wal.append_entry(&[0xAA; 32]).expect("append a");
        wal.append_entry(&[0xBB; 32]).expect("append b");
        wal.record_checkpoint(&mut header).expect("checkpoint");
        assert_eq!(header.wal_sequence, 2);

        assert!(wal.pending_records().expect("pending").is_empty());

        wal.append_entry(&[0xCC; 32]).expect("append c");
        let records = wal.pending_records().expect("after append");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 3);
        assert_eq!(records[0].payload, vec![0xCC; 32]);
    }

    #[test]
    fn full_region_is_reported_not_overwritten() {
        let size = (ENTRY_HEADER_SIZE as u64) * 4;
        let (file, header) = prepare_wal(size);
        let mut wal = EmbeddedWal::open(&file, &header).expect("open wal");

        wal.append_entry(&[0x11; 16]).expect("first fits");
        let err = wal.append_entry(&[0x22; 64]).expect_err("second must not fit");
        assert!(matches!(err, Mv2Error::CheckpointFailed { .. }));

        // The first record is still intact.
        let records = wal.pending_records().expect("records");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn corrupted_record_reports_offset() {
        let (mut file, header) = prepare_wal(256);
        file.seek(SeekFrom::Start(header.wal_offset)).expect("seek");
        let mut record = [0u8; ENTRY_HEADER_SIZE];
        record[..8].copy_from_slice(&1u64.to_le_bytes());
        record[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        file.write_all(&record).expect("write corrupt header");
        file.sync_all().expect("sync");

        let err = EmbeddedWal::open(&file, &header).expect_err("open should fail");
        match err {
            Mv2Error::WalCorruption { offset, reason } => {
                assert_eq!(offset, 0);
                assert!(reason.contains("length"), "reason should mention length");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
