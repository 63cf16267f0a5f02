//! Public search request/response types.

use serde::{Deserialize, Serialize};

use super::common::FrameId;

fn default_top_k() -> usize {
    10
}

/// Engine selected to satisfy a search. Only the embedded lexical engine is
/// built into this crate; the variant set is kept for wire compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Auto,
    Lex,
}

/// Lexical search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Number of ranked hits to skip before collecting `top_k`.
    #[serde(default)]
    pub offset: usize,
    /// Restrict hits to frames ingested on this track.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<SearchMode>,
}

impl SearchRequest {
    #[must_use]
    pub fn new<S: Into<String>>(query: S) -> Self {
        Self {
            query: query.into(),
            top_k: default_top_k(),
            offset: 0,
            track: None,
            mode: None,
        }
    }
}

/// A single ranked hit. Ordering is descending score, ties broken by
/// ascending frame id, so identical requests against unmodified state return
/// identical sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub frame_id: FrameId,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    /// Total matches before paging, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}
