//! Mutations: put, delete, ticket application, commit, and WAL replay.
//!
//! Puts and deletes are logged to the embedded WAL and buffered on the
//! handle; they are invisible to every read path until `commit` folds the
//! batch into the frame table and indexes. Crash recovery replays the same
//! records on reopen.

use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::{CHUNK_THRESHOLD, MAX_CHUNK_COUNT, MAX_FRAME_BYTES, SEARCH_TEXT_LIMIT};
use crate::error::{Mv2Error, Result};
use crate::footer::{CommitFooter, FOOTER_SIZE};
use crate::io::wal::ENTRY_HEADER_SIZE;
use crate::io::{HeaderCodec, TimeIndexEntry, encode_track};
use crate::text::truncate_at_grapheme_boundary;
use crate::types::{
    CanonicalEncoding, Frame, FrameId, FrameStatus, LexIndexManifest, PutOptions, Ticket,
    TimeIndexManifest,
};

use super::Memory;
use super::lifecycle::seal_toc;

static ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(19|20)\d{2}-(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])\b")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

/// One logical WAL record. Inserts carry the full frame plus its stored
/// payload bytes so replay can rebuild the in-memory state without touching
/// the payload region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    Insert { frame: Frame, payload: Vec<u8> },
    Tombstone { frame_id: FrameId },
}

impl WalEntry {
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(self, crate::disk_config())?)
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        let (entry, _) = bincode::serde::decode_from_slice(bytes, crate::disk_config())?;
        Ok(entry)
    }
}

impl Memory {
    /// Write `content` as a new frame with default options, returning the id
    /// of its first (or only) frame. The frame stays buffered and unreadable
    /// until the next `commit`.
    pub fn put(&mut self, content: &[u8]) -> Result<FrameId> {
        self.put_with_options(content, &PutOptions::default())
    }

    pub fn put_with_options(&mut self, content: &[u8], options: &PutOptions) -> Result<FrameId> {
        self.ensure_writable()?;
        ensure_frameable(content.len() as u64)?;

        let chunks = split_into_chunks(content)?;
        let chunk_hashes: Vec<[u8; 32]> = chunks
            .iter()
            .map(|chunk| blake3::hash(chunk).into())
            .collect();
        if options.dedup
            && let Some(existing) = self.find_active_duplicate(&chunk_hashes)
        {
            tracing::debug!(frame_id = existing, "dedup hit; skipping ingestion");
            return Ok(existing);
        }

        let timestamp = match options.timestamp {
            Some(ts) => ts,
            None => now_epoch_seconds()?,
        };
        let mut tags = options.tags.clone();
        if options.auto_tag {
            apply_auto_tags(&mut tags, options);
        }
        let content_dates = if options.extract_dates {
            extract_iso_dates(content, options.search_text.as_deref())
        } else {
            Vec::new()
        };

        let chunk_count = chunks.len() as u32;
        let chunked = chunk_count > 1;
        let first_id = self.toc.frames.len() as FrameId + self.pending_insert_count();

        // Stage the whole chunk group before touching the WAL: a put that
        // fails capacity or space checks must leave nothing behind.
        let mut entries = Vec::with_capacity(chunks.len());
        let mut records = Vec::with_capacity(chunks.len());
        let mut total_stored = 0u64;
        for (index, chunk) in chunks.iter().enumerate() {
            let (stored, encoding) = if options.no_raw {
                (Vec::new(), CanonicalEncoding::Plain)
            } else {
                encode_payload(chunk)
            };
            total_stored += stored.len() as u64;

            let id = first_id + index as u64;
            let is_first = index == 0;
            let frame = Frame {
                id,
                timestamp,
                kind: options.kind.clone().filter(|_| is_first),
                uri: options.uri.clone().filter(|_| is_first),
                title: options.title.clone().filter(|_| is_first),
                status: FrameStatus::Active,
                payload_length: stored.len() as u64,
                tags: if is_first { tags.clone() } else { BTreeMap::new() },
                labels: if is_first {
                    options.labels.iter().cloned().collect()
                } else {
                    Default::default()
                },
                parent_id: chunked.then_some(first_id),
                chunk_index: chunked.then_some(index as u32),
                chunk_count: chunked.then_some(chunk_count),
                payload_offset: 0,
                logical_length: chunk.len() as u64,
                encoding,
                content_checksum: chunk_hashes[index],
                track: options.track.clone().filter(|_| is_first),
                search_text: options.search_text.clone().filter(|_| is_first),
                content_dates: if is_first { content_dates.clone() } else { Vec::new() },
            };

            let entry = WalEntry::Insert {
                frame,
                payload: stored,
            };
            records.push(entry.encode()?);
            entries.push(entry);
        }

        self.check_capacity(total_stored)?;
        self.reserve_wal_space(&records)?;
        for record in &records {
            self.wal.append_entry(record)?;
        }
        self.pending.extend(entries);
        self.dirty = true;

        if self.wal.should_checkpoint() {
            tracing::debug!("wal checkpoint threshold reached; committing");
            self.commit()?;
        }
        Ok(first_id)
    }

    /// Tombstone a committed frame. Deleting any chunk of a chunked put
    /// deletes the whole group at the next commit. Returns the WAL sequence
    /// of the tombstone record.
    pub fn delete_frame(&mut self, frame_id: FrameId) -> Result<u64> {
        self.ensure_writable()?;
        let Some(frame) = self.toc.frames.get(frame_id as usize) else {
            return Err(Mv2Error::FrameNotFound { frame_id });
        };
        if frame.status == FrameStatus::Deleted {
            return Ok(self.wal.sequence());
        }
        let group_root = frame.parent_id.unwrap_or(frame_id);
        if self.has_pending_tombstone(group_root) {
            return Ok(self.wal.sequence());
        }

        let record = WalEntry::Tombstone { frame_id }.encode()?;
        self.reserve_wal_space(std::slice::from_ref(&record))?;
        let sequence = self.wal.append_entry(&record)?;
        self.pending.push(WalEntry::Tombstone { frame_id });
        self.dirty = true;

        if self.wal.should_checkpoint() {
            self.commit()?;
        }
        Ok(sequence)
    }

    /// Raise (or otherwise replace) the capacity grant. Sequence numbers must
    /// strictly increase; the new grant is committed immediately.
    pub fn apply_ticket(&mut self, ticket: &Ticket) -> Result<()> {
        self.ensure_writable()?;
        let current = self.toc.ticket_ref.seq_no;
        if ticket.seq_no <= current {
            return Err(Mv2Error::TicketSequence {
                current,
                offered: ticket.seq_no,
            });
        }
        self.toc.ticket_ref.issuer = ticket.issuer.clone();
        self.toc.ticket_ref.seq_no = ticket.seq_no;
        self.toc.ticket_ref.capacity_bytes = ticket.capacity_bytes;
        self.toc.ticket_ref.verified = true;
        self.dirty = true;
        tracing::info!(
            issuer = %self.toc.ticket_ref.issuer,
            seq_no = ticket.seq_no,
            capacity_bytes = ticket.capacity_bytes,
            "applied capacity ticket"
        );
        self.commit()
    }

    /// Fold all buffered mutations into a new committed generation: WAL
    /// entries apply to the frame table and indexes in sequence order,
    /// payloads materialize into the payload region, index artifacts and the
    /// TOC are rewritten, the footer lands, and only then does the header
    /// advance. A crash anywhere before the header write leaves the previous
    /// generation fully intact.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_writable()?;
        if !self.dirty {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.pending);
        let mut inserted_roots: Vec<FrameId> = Vec::new();
        for entry in batch {
            match entry {
                WalEntry::Insert { frame, payload } => {
                    if !frame.is_chunk_continuation() {
                        inserted_roots.push(frame.id);
                    }
                    self.insert_frame(frame, payload);
                }
                WalEntry::Tombstone { frame_id } => self.apply_tombstone(frame_id),
            }
        }
        for root in inserted_roots {
            let active = self
                .toc
                .frames
                .get(root as usize)
                .is_some_and(|frame| frame.status == FrameStatus::Active);
            if active && let Some(text) = self.buffered_group_text(root) {
                self.lex_index.add_document(root, &text);
            }
        }

        // Materialize past the previous generation's footer so the old
        // commit stays recoverable until the new footer is durable.
        let mut cursor = self
            .data_end
            .max(self.header.footer_offset + FOOTER_SIZE as u64);
        let pending = std::mem::take(&mut self.pending_payloads);
        for (frame_id, stored) in &pending {
            if stored.is_empty() {
                continue;
            }
            let frame = self
                .toc
                .frames
                .get_mut(*frame_id as usize)
                .ok_or(Mv2Error::FrameNotFound { frame_id: *frame_id })?;
            self.file.seek(SeekFrom::Start(cursor))?;
            self.file.write_all(stored)?;
            frame.payload_offset = cursor;
            cursor += stored.len() as u64;
        }
        self.data_end = cursor;

        self.lex_index.bump_generation();
        let lex_bytes = self.lex_index.encode()?;
        self.file.seek(SeekFrom::Start(cursor))?;
        self.file.write_all(&lex_bytes)?;
        self.toc.lex_index = Some(LexIndexManifest {
            doc_count: self.lex_index.doc_count(),
            generation: self.lex_index.generation(),
            bytes_offset: cursor,
            bytes_length: lex_bytes.len() as u64,
            checksum: blake3::hash(&lex_bytes).into(),
        });
        cursor += lex_bytes.len() as u64;

        let track_bytes = encode_track(&self.time_entries)?;
        self.file.seek(SeekFrom::Start(cursor))?;
        self.file.write_all(&track_bytes)?;
        self.toc.time_index = Some(TimeIndexManifest {
            entry_count: self.time_entries.len() as u64,
            bytes_offset: cursor,
            bytes_length: track_bytes.len() as u64,
            checksum: blake3::hash(&track_bytes).into(),
        });
        cursor += track_bytes.len() as u64;

        self.toc.toc_version += 1;
        let toc_bytes = seal_toc(&mut self.toc)?;
        let toc_offset = cursor;
        let footer_offset = toc_offset + toc_bytes.len() as u64;
        let footer = CommitFooter::new(self.toc.toc_version, &toc_bytes);
        self.file.seek(SeekFrom::Start(toc_offset))?;
        self.file.write_all(&toc_bytes)?;
        self.file.write_all(&footer.encode())?;
        self.file.sync_all()?;

        self.header.footer_offset = footer_offset;
        self.header.toc_checksum = blake3::hash(&toc_bytes).into();
        self.wal.record_checkpoint(&mut self.header)?;
        HeaderCodec::write(&mut self.file, &self.header)?;
        self.file.set_len(footer_offset + FOOTER_SIZE as u64)?;
        self.file.sync_all()?;

        self.dirty = false;
        log::debug!("commit generation {} durable", self.toc.toc_version);
        tracing::debug!(
            generation = self.toc.toc_version,
            frames = self.toc.frames.len(),
            footer_offset,
            "committed"
        );
        Ok(())
    }

    /// Re-apply WAL records newer than the committed checkpoint. Unlike live
    /// mutations, replayed entries land directly in the frame table: the
    /// reopen contract is that logged mutations read back after a crash.
    /// Replay is idempotent: records whose frame already exists are skipped,
    /// so running it against an already-current TOC is a no-op.
    pub(crate) fn replay_wal(&mut self) -> Result<()> {
        let checkpoint = self.header.wal_sequence;
        let records = self.wal.records_after(checkpoint)?;
        if records.is_empty() {
            return Ok(());
        }
        tracing::info!(records = records.len(), "replaying wal");

        let mut inserted_roots: Vec<FrameId> = Vec::new();
        let mut applied = 0usize;
        for record in records {
            match WalEntry::decode(&record.payload)? {
                WalEntry::Insert { frame, payload } => {
                    let next_id = self.toc.frames.len() as FrameId;
                    if frame.id < next_id {
                        continue;
                    }
                    if frame.id > next_id {
                        return Err(Mv2Error::WalCorruption {
                            offset: 0,
                            reason: format!(
                                "wal insert skips frame ids ({} after {next_id})",
                                frame.id
                            ),
                        });
                    }
                    if !frame.is_chunk_continuation() {
                        inserted_roots.push(frame.id);
                    }
                    self.insert_frame(frame, payload);
                    applied += 1;
                }
                WalEntry::Tombstone { frame_id } => {
                    if self
                        .toc
                        .frames
                        .get(frame_id as usize)
                        .is_some_and(|frame| frame.status == FrameStatus::Active)
                    {
                        self.apply_tombstone(frame_id);
                        applied += 1;
                    }
                }
            }
        }
        for root in inserted_roots {
            let active = self
                .toc
                .frames
                .get(root as usize)
                .is_some_and(|frame| frame.status == FrameStatus::Active);
            if active && let Some(text) = self.buffered_group_text(root) {
                self.lex_index.add_document(root, &text);
            }
        }
        if applied > 0 && !self.read_only {
            self.dirty = true;
        }
        Ok(())
    }

    fn insert_frame(&mut self, frame: Frame, stored: Vec<u8>) {
        if !frame.is_chunk_continuation() {
            let entry = TimeIndexEntry {
                timestamp: frame.timestamp,
                frame_id: frame.id,
            };
            let position = self.time_entries.partition_point(|e| *e <= entry);
            self.time_entries.insert(position, entry);
        }
        if !stored.is_empty() {
            self.pending_payloads.insert(frame.id, stored);
        }
        self.toc.frames.push(frame);
    }

    fn apply_tombstone(&mut self, frame_id: FrameId) {
        let group_root = self
            .toc
            .frames
            .get(frame_id as usize)
            .and_then(|frame| frame.parent_id)
            .unwrap_or(frame_id);
        for frame in &mut self.toc.frames {
            let in_group = frame.id == group_root || frame.parent_id == Some(group_root);
            if in_group && frame.status == FrameStatus::Active {
                frame.status = FrameStatus::Deleted;
            }
        }
        self.lex_index.remove_document(group_root);
        self.time_entries
            .retain(|entry| entry.frame_id != group_root);
    }

    fn pending_insert_count(&self) -> u64 {
        self.pending
            .iter()
            .filter(|entry| matches!(entry, WalEntry::Insert { .. }))
            .count() as u64
    }

    /// True when a buffered tombstone already covers `group_root`.
    fn has_pending_tombstone(&self, group_root: FrameId) -> bool {
        self.pending.iter().any(|entry| match entry {
            WalEntry::Tombstone { frame_id } => {
                let root = self
                    .toc
                    .frames
                    .get(*frame_id as usize)
                    .and_then(|frame| frame.parent_id)
                    .unwrap_or(*frame_id);
                root == group_root
            }
            WalEntry::Insert { .. } => false,
        })
    }

    /// Match an incoming put chunk by chunk against existing groups, both
    /// committed and still buffered, so repeated puts dedup before a commit
    /// ever happens.
    fn find_active_duplicate(&self, chunk_hashes: &[[u8; 32]]) -> Option<FrameId> {
        self.find_committed_duplicate(chunk_hashes)
            .or_else(|| self.find_buffered_duplicate(chunk_hashes))
    }

    fn find_committed_duplicate(&self, chunk_hashes: &[[u8; 32]]) -> Option<FrameId> {
        'candidates: for frame in &self.toc.frames {
            if frame.status != FrameStatus::Active || frame.is_chunk_continuation() {
                continue;
            }
            if self.has_pending_tombstone(frame.id) {
                continue;
            }
            let count = frame.chunk_count.unwrap_or(1) as usize;
            if count != chunk_hashes.len() || frame.content_checksum != chunk_hashes[0] {
                continue;
            }
            for (offset, hash) in chunk_hashes.iter().enumerate().skip(1) {
                let sibling = self.toc.frames.get(frame.id as usize + offset);
                let matches = sibling.is_some_and(|s| {
                    s.parent_id == Some(frame.id) && s.content_checksum == *hash
                });
                if !matches {
                    continue 'candidates;
                }
            }
            return Some(frame.id);
        }
        None
    }

    fn find_buffered_duplicate(&self, chunk_hashes: &[[u8; 32]]) -> Option<FrameId> {
        let buffered: Vec<&Frame> = self
            .pending
            .iter()
            .filter_map(|entry| match entry {
                WalEntry::Insert { frame, .. } => Some(frame),
                WalEntry::Tombstone { .. } => None,
            })
            .collect();
        'candidates: for frame in &buffered {
            if frame.is_chunk_continuation() {
                continue;
            }
            let count = frame.chunk_count.unwrap_or(1) as usize;
            if count != chunk_hashes.len() || frame.content_checksum != chunk_hashes[0] {
                continue;
            }
            for (offset, hash) in chunk_hashes.iter().enumerate().skip(1) {
                let sibling_id = frame.id + offset as u64;
                let matches = buffered.iter().any(|s| {
                    s.id == sibling_id
                        && s.parent_id == Some(frame.id)
                        && s.content_checksum == *hash
                });
                if !matches {
                    continue 'candidates;
                }
            }
            return Some(frame.id);
        }
        None
    }

    fn check_capacity(&self, incoming: u64) -> Result<()> {
        let needed = self.data_end + self.buffered_stored_bytes() + incoming;
        let capacity = self.toc.ticket_ref.capacity_bytes;
        if needed > capacity {
            return Err(Mv2Error::CapacityExceeded { needed, capacity });
        }
        Ok(())
    }

    /// Stored bytes awaiting materialization: buffered inserts plus
    /// crash-replayed frames whose payloads have not been written yet.
    fn buffered_stored_bytes(&self) -> u64 {
        let replayed: u64 = self
            .pending_payloads
            .values()
            .map(|bytes| bytes.len() as u64)
            .sum();
        let buffered: u64 = self
            .pending
            .iter()
            .map(|entry| match entry {
                WalEntry::Insert { payload, .. } => payload.len() as u64,
                WalEntry::Tombstone { .. } => 0,
            })
            .sum();
        replayed + buffered
    }

    /// Make sure the WAL region can take the whole batch before any record
    /// is appended, checkpointing buffered state first when it cannot.
    fn reserve_wal_space(&mut self, records: &[Vec<u8>]) -> Result<()> {
        let needed: u64 = records
            .iter()
            .map(|record| (ENTRY_HEADER_SIZE + record.len()) as u64)
            .sum();
        if needed <= self.wal.free_bytes() {
            return Ok(());
        }
        if self.dirty {
            self.commit()?;
        }
        if needed <= self.wal.free_bytes() {
            return Ok(());
        }
        Err(Mv2Error::CheckpointFailed {
            reason: "embedded wal region too small for mutation batch".into(),
        })
    }

    /// Canonical text for a group that is applied to the frame table but not
    /// yet materialized: its search override, or the decoded chunk payloads.
    fn buffered_group_text(&self, group_root: FrameId) -> Option<String> {
        let frame = self.toc.frames.get(group_root as usize)?;
        if let Some(text) = &frame.search_text {
            return Some(truncate_at_grapheme_boundary(text, SEARCH_TEXT_LIMIT));
        }
        let chunk_count = u64::from(frame.chunk_count.unwrap_or(1));
        let mut canonical = Vec::new();
        for id in group_root..group_root + chunk_count {
            let chunk = self.toc.frames.get(id as usize)?;
            let stored = self.pending_payloads.get(&id)?;
            canonical.extend_from_slice(&decode_payload(stored, chunk.encoding).ok()?);
        }
        indexable_text(&canonical, None)
    }
}

fn now_epoch_seconds() -> Result<i64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| Mv2Error::Extraction {
            reason: format!("system clock before epoch: {err}"),
        })?;
    Ok(elapsed.as_secs() as i64)
}

/// The hard per-put ceiling. Violations are framing errors, not capacity
/// errors: no ticket can make an oversized payload fit.
fn ensure_frameable(len: u64) -> Result<()> {
    if len > MAX_FRAME_BYTES {
        return Err(Mv2Error::Encode {
            reason: format!("payload of {len} bytes exceeds the {MAX_FRAME_BYTES}-byte frame ceiling"),
        });
    }
    Ok(())
}

fn split_into_chunks(content: &[u8]) -> Result<Vec<&[u8]>> {
    if content.len() <= CHUNK_THRESHOLD {
        return Ok(vec![content]);
    }
    let chunks: Vec<&[u8]> = content.chunks(CHUNK_THRESHOLD).collect();
    if chunks.len() > MAX_CHUNK_COUNT as usize {
        return Err(Mv2Error::Encode {
            reason: format!(
                "payload needs {} chunks, limit is {MAX_CHUNK_COUNT}",
                chunks.len()
            ),
        });
    }
    Ok(chunks)
}

/// Canonical payload encoding: zstd when it actually shrinks the bytes,
/// plain otherwise.
fn encode_payload(canonical: &[u8]) -> (Vec<u8>, CanonicalEncoding) {
    if canonical.is_empty() {
        return (Vec::new(), CanonicalEncoding::Plain);
    }
    match zstd::encode_all(canonical, 3) {
        Ok(compressed) if compressed.len() < canonical.len() => {
            (compressed, CanonicalEncoding::Zstd)
        }
        _ => (canonical.to_vec(), CanonicalEncoding::Plain),
    }
}

pub(crate) fn decode_payload(stored: &[u8], encoding: CanonicalEncoding) -> Result<Vec<u8>> {
    match encoding {
        CanonicalEncoding::Plain => Ok(stored.to_vec()),
        CanonicalEncoding::Zstd => zstd::decode_all(stored).map_err(|err| Mv2Error::Decode {
            reason: format!("zstd payload: {err}"),
        }),
    }
}

fn apply_auto_tags(tags: &mut BTreeMap<String, String>, options: &PutOptions) {
    if let Some(kind) = &options.kind
        && !tags.contains_key("kind")
    {
        tags.insert("kind".into(), kind.clone());
    }
    if let Some(uri) = &options.uri
        && let Some(ext) = uri_extension(uri)
        && !tags.contains_key("ext")
    {
        tags.insert("ext".into(), ext.to_lowercase());
    }
}

fn uri_extension(uri: &str) -> Option<&str> {
    let name = uri.rsplit(['/', '\\']).next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 8 {
        return None;
    }
    Some(ext)
}

fn extract_iso_dates(content: &[u8], search_text: Option<&str>) -> Vec<String> {
    let haystack = match search_text {
        Some(text) => text.to_string(),
        None => match std::str::from_utf8(content) {
            Ok(text) => text.to_string(),
            Err(_) => return Vec::new(),
        },
    };
    let mut dates: Vec<String> = ISO_DATE
        .find_iter(&haystack)
        .map(|m| m.as_str().to_string())
        .collect();
    dates.sort_unstable();
    dates.dedup();
    dates
}

/// Canonical text for lexical indexing, capped to keep artifacts bounded.
fn indexable_text(content: &[u8], search_text: Option<&str>) -> Option<String> {
    if let Some(text) = search_text {
        return Some(truncate_at_grapheme_boundary(text, SEARCH_TEXT_LIMIT));
    }
    let text = std::str::from_utf8(content).ok()?;
    if text.trim().is_empty() {
        return None;
    }
    Some(truncate_at_grapheme_boundary(text, SEARCH_TEXT_LIMIT))
}
