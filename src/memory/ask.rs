//! Extractive question answering over search results.

use std::time::Instant;

use crate::error::Result;
use crate::types::{AskCitation, AskRequest, AskResponse, AskStats, SearchRequest};

use super::Memory;

impl Memory {
    /// Answer a question extractively: retrieve the top matching frames and
    /// stitch their excerpts into an answer with one citation per source.
    /// `context_only` skips synthesis and returns the retrieval alone.
    pub fn ask(&mut self, request: &AskRequest) -> Result<AskResponse> {
        self.ensure_open()?;
        let started = Instant::now();

        let retrieval = self.search(&SearchRequest {
            query: request.question.clone(),
            top_k: request.top_k,
            offset: 0,
            track: None,
            mode: None,
        })?;
        let retrieval_ms = started.elapsed().as_millis();

        let synthesis_started = Instant::now();
        let citations: Vec<AskCitation> = retrieval
            .hits
            .iter()
            .enumerate()
            .map(|(position, hit)| AskCitation {
                index: position + 1,
                frame_id: hit.frame_id,
                uri: hit.uri.clone(),
                score: hit.score,
                excerpt: hit.snippet.clone().unwrap_or_default(),
            })
            .collect();

        let answer = if request.context_only || citations.is_empty() {
            None
        } else {
            Some(synthesize_answer(&citations))
        };
        let synthesis_ms = synthesis_started.elapsed().as_millis();

        Ok(AskResponse {
            question: request.question.clone(),
            mode: request.mode,
            retrieval,
            answer,
            citations,
            stats: AskStats {
                retrieval_ms,
                synthesis_ms,
                latency_ms: started.elapsed().as_millis(),
            },
        })
    }
}

fn synthesize_answer(citations: &[AskCitation]) -> String {
    let mut answer = String::new();
    for citation in citations {
        if citation.excerpt.is_empty() {
            continue;
        }
        if !answer.is_empty() {
            answer.push(' ');
        }
        answer.push_str(citation.excerpt.trim_start_matches('…').trim());
        answer.push_str(&format!(" [{}]", citation.index));
    }
    answer
}
