//! Frame, stats, and timeline types.

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use super::common::{CanonicalEncoding, FrameId, FrameStatus};

/// An immutable content unit. The payload is frozen at commit; only `status`
/// changes afterwards (Active → Deleted, never back).
///
/// Frames are encoded with the fixed-int bincode config inside the TOC and
/// WAL records, so every field must serialize unconditionally; a sparse wire
/// shape would shift the positional layout and break decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: FrameId,
    /// Logical creation time, epoch seconds.
    pub timestamp: i64,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: FrameStatus,
    /// Stored payload length in bytes (post-compression).
    pub payload_length: u64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub parent_id: Option<FrameId>,
    #[serde(default)]
    pub chunk_index: Option<u32>,
    #[serde(default)]
    pub chunk_count: Option<u32>,

    // Internal bookkeeping below; not part of the external frame shape.
    /// Absolute offset of the stored payload; 0 until materialized at commit.
    #[serde(default)]
    pub payload_offset: u64,
    /// Uncompressed payload length.
    #[serde(default)]
    pub logical_length: u64,
    #[serde(default)]
    pub encoding: CanonicalEncoding,
    /// blake3 of the canonical (uncompressed) payload bytes.
    #[serde(default)]
    pub content_checksum: [u8; 32],
    #[serde(default)]
    pub track: Option<String>,
    /// Override text used for lexical indexing when the payload is binary.
    #[serde(default)]
    pub search_text: Option<String>,
    /// ISO dates mined from content when `extract_dates` was requested.
    #[serde(default)]
    pub content_dates: Vec<String>,
}

impl Frame {
    /// True for chunk frames that follow their parent (first) chunk.
    #[must_use]
    pub fn is_chunk_continuation(&self) -> bool {
        matches!(self.parent_id, Some(parent) if parent != self.id)
    }

    /// Hex rendering of the content checksum for display and diffing.
    #[must_use]
    pub fn content_checksum_hex(&self) -> String {
        hex::encode(self.content_checksum)
    }
}

/// Byte accounting and capability flags for a memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Stats {
    pub frame_count: u64,
    pub active_frame_count: u64,
    pub size_bytes: u64,
    pub payload_bytes: u64,
    pub logical_bytes: u64,
    pub capacity_bytes: u64,
    pub has_lex_index: bool,
    pub has_vec_index: bool,
    pub has_clip_index: bool,
    pub has_time_index: bool,
    pub wal_bytes: u64,
    pub lex_index_bytes: u64,
    pub vec_index_bytes: u64,
    pub time_index_bytes: u64,
    pub vector_count: u64,
    pub clip_image_count: u64,
    pub compression_ratio_percent: u64,
    pub savings_percent: u64,
    pub storage_utilisation_percent: u64,
    pub remaining_capacity_bytes: u64,
}

/// Chronological range query over committed frames.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimelineQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<NonZeroU64>,
    /// Inclusive lower timestamp bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    /// Inclusive upper timestamp bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(default)]
    pub reverse: bool,
}

impl TimelineQuery {
    #[must_use]
    pub fn builder() -> TimelineQueryBuilder {
        TimelineQueryBuilder::default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimelineQueryBuilder {
    inner: TimelineQuery,
}

impl TimelineQueryBuilder {
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.inner.limit = NonZeroU64::new(limit);
        self
    }

    #[must_use]
    pub fn since(mut self, since: i64) -> Self {
        self.inner.since = Some(since);
        self
    }

    #[must_use]
    pub fn until(mut self, until: i64) -> Self {
        self.inner.until = Some(until);
        self
    }

    #[must_use]
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.inner.reverse = reverse;
        self
    }

    #[must_use]
    pub fn build(self) -> TimelineQuery {
        self.inner
    }
}

/// One row of a timeline response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub frame_id: FrameId,
    pub timestamp: i64,
    /// Truncated content preview.
    pub preview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Ids of chunk frames that continue this entry's content.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_frames: Vec<FrameId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TimelineResponse {
    pub entries: Vec<TimelineEntry>,
    pub count: u64,
}
