//! Chronological reads over the time index.

use crate::constants::TIMELINE_PREVIEW_CHARS;
use crate::error::{Mv2Error, Result};
use crate::text::{normalize_whitespace, truncate_at_grapheme_boundary};
use crate::types::{FrameId, TimelineEntry, TimelineQuery, TimelineResponse};

use super::Memory;

impl Memory {
    /// Walk committed frames in timestamp order. Chunk groups
    /// appear once, anchored at their first frame, with the continuation ids
    /// listed in `child_frames`.
    pub fn timeline(&mut self, query: &TimelineQuery) -> Result<TimelineResponse> {
        self.ensure_open()?;
        if let (Some(since), Some(until)) = (query.since, query.until)
            && since > until
        {
            return Err(Mv2Error::InvalidQuery {
                reason: format!("since {since} is after until {until}"),
            });
        }

        let in_range = |timestamp: i64| {
            query.since.is_none_or(|since| timestamp >= since)
                && query.until.is_none_or(|until| timestamp <= until)
        };
        let mut selected: Vec<(i64, FrameId)> = self
            .time_entries
            .iter()
            .filter(|entry| in_range(entry.timestamp))
            .map(|entry| (entry.timestamp, entry.frame_id))
            .collect();
        if query.reverse {
            selected.reverse();
        }
        if let Some(limit) = query.limit {
            selected.truncate(limit.get() as usize);
        }

        let mut entries = Vec::with_capacity(selected.len());
        for (timestamp, frame_id) in selected {
            let frame = self
                .toc
                .frames
                .get(frame_id as usize)
                .ok_or(Mv2Error::FrameNotFound { frame_id })?
                .clone();
            let chunk_count = frame.chunk_count.unwrap_or(1) as u64;
            let child_frames: Vec<FrameId> = (frame.id + 1..frame.id + chunk_count).collect();
            entries.push(TimelineEntry {
                frame_id,
                timestamp,
                preview: self.preview_for(frame_id),
                uri: frame.uri,
                child_frames,
            });
        }
        let count = entries.len() as u64;
        Ok(TimelineResponse { entries, count })
    }

    fn preview_for(&mut self, frame_id: FrameId) -> String {
        let source = self
            .toc
            .frames
            .get(frame_id as usize)
            .and_then(|frame| frame.search_text.clone())
            .or_else(|| {
                self.frame_content(frame_id)
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
            .unwrap_or_default();
        truncate_at_grapheme_boundary(&normalize_whitespace(&source), TIMELINE_PREVIEW_CHARS)
    }
}
