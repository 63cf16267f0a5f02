//! Lexical search over the inverted index.

use crate::constants::SNIPPET_CHARS;
use crate::error::{Mv2Error, Result};
use crate::text::{normalize_whitespace, tokenize, truncate_at_grapheme_boundary};
use crate::types::{FrameId, FrameStatus, SearchHit, SearchRequest, SearchResponse};

use super::Memory;
use super::frame::committed_frame_text;

impl Memory {
    /// Rank active frames against `query` with TF-IDF. Results are
    /// deterministic: descending score, ties broken by ascending frame id.
    /// Tombstoned frames are filtered at query time.
    pub fn search(&mut self, request: &SearchRequest) -> Result<SearchResponse> {
        self.ensure_open()?;
        if request.query.trim().is_empty() {
            return Err(Mv2Error::InvalidQuery {
                reason: "query must be non-empty".into(),
            });
        }

        let candidates = self.lex_index.search(&request.query);
        let matching: Vec<_> = candidates
            .into_iter()
            .filter(|candidate| {
                self.toc
                    .frames
                    .get(candidate.frame_id as usize)
                    .is_some_and(|frame| {
                        frame.status == FrameStatus::Active
                            && request
                                .track
                                .as_deref()
                                .is_none_or(|track| frame.track.as_deref() == Some(track))
                    })
            })
            .collect();
        let total = matching.len();

        let query_tokens = tokenize(&request.query);
        let mut hits = Vec::new();
        for candidate in matching
            .into_iter()
            .skip(request.offset)
            .take(request.top_k)
        {
            let frame = self
                .toc
                .frames
                .get(candidate.frame_id as usize)
                .ok_or(Mv2Error::FrameNotFound {
                    frame_id: candidate.frame_id,
                })?
                .clone();
            hits.push(SearchHit {
                frame_id: candidate.frame_id,
                score: candidate.score,
                snippet: self.snippet_for(candidate.frame_id, &query_tokens),
                uri: frame.uri,
                title: frame.title,
            });
        }
        Ok(SearchResponse {
            hits,
            total: Some(total),
        })
    }

    pub(crate) fn snippet_for(&mut self, frame_id: FrameId, query_tokens: &[String]) -> Option<String> {
        let frame = self.toc.frames.get(frame_id as usize)?.clone();
        let text = if self.pending_payloads.contains_key(&frame_id) || frame.search_text.is_some()
        {
            frame
                .search_text
                .clone()
                .or_else(|| {
                    self.frame_content(frame_id)
                        .ok()
                        .and_then(|bytes| String::from_utf8(bytes).ok())
                })?
        } else {
            committed_frame_text(&mut self.file, &self.toc, &frame)?
        };
        Some(build_snippet(&text, query_tokens))
    }
}

/// A window of text around the first query-term occurrence, or the prefix
/// when no term matches verbatim.
fn build_snippet(text: &str, query_tokens: &[String]) -> String {
    let flat = normalize_whitespace(text);
    let lowered = flat.to_lowercase();
    let hit_offset = query_tokens
        .iter()
        .filter_map(|token| lowered.find(token.as_str()))
        .min()
        .unwrap_or(0);

    // Back up to a char boundary roughly a third of the window before the hit.
    let mut start = hit_offset.saturating_sub(SNIPPET_CHARS / 3);
    while start > 0 && !flat.is_char_boundary(start) {
        start -= 1;
    }
    let windowed = truncate_at_grapheme_boundary(&flat[start..], SNIPPET_CHARS);
    if start > 0 {
        format!("…{windowed}")
    } else {
        windowed
    }
}

#[cfg(test)]
mod tests {
    use super::build_snippet;

    #[test]
    fn snippet_centers_on_first_match() {
        let text = "x ".repeat(200) + "needle in the haystack" + &" y".repeat(200);
        let snippet = build_snippet(&text, &["needle".to_string()]);
        assert!(snippet.contains("needle"));
        assert!(snippet.starts_with('…'));
    }

    #[test]
    fn snippet_defaults_to_prefix() {
        let snippet = build_snippet("short document text", &["absent".to_string()]);
        assert_eq!(snippet, "short document text");
    }
}
