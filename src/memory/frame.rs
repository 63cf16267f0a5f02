//! Frame reads: metadata, content, uri lookup, and stats.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::constants::SEARCH_TEXT_LIMIT;
use crate::error::{Mv2Error, Result};
use crate::text::truncate_at_grapheme_boundary;
use crate::types::{Frame, FrameId, FrameStatus, Stats, Toc};

use super::Memory;
use super::mutation::decode_payload;

impl Memory {
    /// Frame metadata by id, including tombstoned frames.
    pub fn frame(&self, frame_id: FrameId) -> Result<Frame> {
        self.ensure_open()?;
        self.toc
            .frames
            .get(frame_id as usize)
            .cloned()
            .ok_or(Mv2Error::FrameNotFound { frame_id })
    }

    /// The canonical content of a frame. Called on the first frame of a
    /// chunked put this returns the whole reassembled payload; called on a
    /// continuation chunk it returns that chunk alone. Tombstoned frames read
    /// as not found.
    pub fn frame_content(&mut self, frame_id: FrameId) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let frame = self
            .toc
            .frames
            .get(frame_id as usize)
            .ok_or(Mv2Error::FrameNotFound { frame_id })?
            .clone();
        if frame.status == FrameStatus::Deleted {
            return Err(Mv2Error::FrameNotFound { frame_id });
        }

        if frame.is_chunk_continuation() || frame.chunk_count.unwrap_or(1) <= 1 {
            return self.single_frame_content(&frame);
        }

        let chunk_count = frame.chunk_count.unwrap_or(1) as u64;
        let mut content = Vec::with_capacity(frame.logical_length as usize);
        for id in frame.id..frame.id + chunk_count {
            let chunk = self
                .toc
                .frames
                .get(id as usize)
                .ok_or(Mv2Error::InvalidFrame {
                    frame_id: id,
                    reason: "chunk group truncated",
                })?
                .clone();
            content.extend_from_slice(&self.single_frame_content(&chunk)?);
        }
        Ok(content)
    }

    /// Resolve a uri to its newest active frame (last write wins).
    pub fn frame_by_uri(&self, uri: &str) -> Result<Frame> {
        self.ensure_open()?;
        self.toc
            .frames
            .iter()
            .rev()
            .find(|frame| {
                frame.status == FrameStatus::Active && frame.uri.as_deref() == Some(uri)
            })
            .cloned()
            .ok_or_else(|| Mv2Error::FrameNotFoundByUri { uri: uri.into() })
    }

    fn single_frame_content(&mut self, frame: &Frame) -> Result<Vec<u8>> {
        if let Some(stored) = self.pending_payloads.get(&frame.id) {
            let canonical = decode_payload(stored, frame.encoding)?;
            verify_content(frame, &canonical)?;
            return Ok(canonical);
        }
        if frame.payload_length == 0 {
            if frame.logical_length == 0 {
                return Ok(Vec::new());
            }
            return Err(Mv2Error::InvalidFrame {
                frame_id: frame.id,
                reason: "payload not stored",
            });
        }
        let stored = read_stored_payload(&mut self.file, frame)?;
        let canonical = decode_payload(&stored, frame.encoding)?;
        verify_content(frame, &canonical)?;
        Ok(canonical)
    }

    pub fn stats(&self) -> Result<Stats> {
        self.ensure_open()?;
        let frames = &self.toc.frames;
        let frame_count = frames.len() as u64;
        let active_frame_count = frames
            .iter()
            .filter(|frame| frame.status == FrameStatus::Active)
            .count() as u64;
        let payload_bytes: u64 = frames.iter().map(|frame| frame.payload_length).sum();
        let logical_bytes: u64 = frames.iter().map(|frame| frame.logical_length).sum();
        let size_bytes = self.file.metadata()?.len();
        let capacity_bytes = self.toc.ticket_ref.capacity_bytes;

        let compression_ratio_percent = if logical_bytes > 0 {
            payload_bytes * 100 / logical_bytes
        } else {
            100
        };
        Ok(Stats {
            frame_count,
            active_frame_count,
            size_bytes,
            payload_bytes,
            logical_bytes,
            capacity_bytes,
            has_lex_index: true,
            has_vec_index: false,
            has_clip_index: false,
            has_time_index: true,
            wal_bytes: self.header.wal_size,
            lex_index_bytes: self
                .toc
                .lex_index
                .as_ref()
                .map_or(0, |manifest| manifest.bytes_length),
            vec_index_bytes: 0,
            time_index_bytes: self
                .toc
                .time_index
                .as_ref()
                .map_or(0, |manifest| manifest.bytes_length),
            vector_count: 0,
            clip_image_count: 0,
            compression_ratio_percent,
            savings_percent: 100u64.saturating_sub(compression_ratio_percent),
            storage_utilisation_percent: if capacity_bytes > 0 {
                size_bytes * 100 / capacity_bytes
            } else {
                0
            },
            remaining_capacity_bytes: capacity_bytes.saturating_sub(size_bytes),
        })
    }
}

fn verify_content(frame: &Frame, canonical: &[u8]) -> Result<()> {
    if canonical.len() as u64 != frame.logical_length {
        return Err(Mv2Error::InvalidFrame {
            frame_id: frame.id,
            reason: "payload length mismatch",
        });
    }
    if blake3::hash(canonical).as_bytes() != &frame.content_checksum {
        return Err(Mv2Error::ChecksumMismatch { region: "payload" });
    }
    Ok(())
}

fn read_stored_payload(file: &mut File, frame: &Frame) -> Result<Vec<u8>> {
    let mut stored = vec![0u8; frame.payload_length as usize];
    file.seek(SeekFrom::Start(frame.payload_offset))?;
    file.read_exact(&mut stored)?;
    Ok(stored)
}

/// Canonical text of a committed frame, reassembling chunk groups. Used when
/// rebuilding the lexical index from the frame table.
pub(crate) fn committed_frame_text(file: &mut File, toc: &Toc, frame: &Frame) -> Option<String> {
    if let Some(text) = &frame.search_text {
        return Some(truncate_at_grapheme_boundary(text, SEARCH_TEXT_LIMIT));
    }
    let chunk_count = frame.chunk_count.unwrap_or(1) as u64;
    let mut canonical = Vec::new();
    for id in frame.id..frame.id + chunk_count {
        let chunk = toc.frames.get(id as usize)?;
        if chunk.payload_offset == 0 || chunk.payload_length == 0 {
            return None;
        }
        let stored = read_stored_payload(file, chunk).ok()?;
        canonical.extend_from_slice(&decode_payload(&stored, chunk.encoding).ok()?);
    }
    let text = std::str::from_utf8(&canonical).ok()?;
    if text.trim().is_empty() {
        return None;
    }
    Some(truncate_at_grapheme_boundary(text, SEARCH_TEXT_LIMIT))
}
