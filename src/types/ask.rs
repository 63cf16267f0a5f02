//! Request/response types for extractive question answering.

use serde::{Deserialize, Serialize};

use super::common::FrameId;
use super::search::SearchResponse;

fn default_top_k() -> usize {
    5
}

/// Retrieval + synthesis strategy. Only lexical retrieval with extractive
/// synthesis is built into this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AskMode {
    #[default]
    Extractive,
}

/// Request payload for retrieval + synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub mode: AskMode,
    /// Return retrieval context without synthesizing an answer.
    #[serde(default)]
    pub context_only: bool,
}

impl AskRequest {
    #[must_use]
    pub fn new<S: Into<String>>(question: S) -> Self {
        Self {
            question: question.into(),
            top_k: default_top_k(),
            mode: AskMode::default(),
            context_only: false,
        }
    }
}

/// Structured citation pointing back into the memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskCitation {
    pub index: usize,
    pub frame_id: FrameId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub score: f32,
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AskStats {
    pub retrieval_ms: u128,
    pub synthesis_ms: u128,
    pub latency_ms: u128,
}

/// Response containing the retrieval context, optional answer, and timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResponse {
    pub question: String,
    pub mode: AskMode,
    pub retrieval: SearchResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<AskCitation>,
    pub stats: AskStats,
}
