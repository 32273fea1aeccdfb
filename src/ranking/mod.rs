//! Response quality ranking and filtering.
//!
//! Each candidate gets four heuristic sub-scores in [0, 1] (coherence,
//! relevance, completeness, accuracy), averaged into a composite. Ranked
//! output is sorted by composite descending, with security-sensitive
//! candidates and low scorers filtered out.

pub mod security;

pub use security::SecurityFilter;

use crate::types::GenerationResponse;
use std::collections::HashSet;

/// Composite score below which a ranked candidate is dropped.
pub const MIN_COMPOSITE_SCORE: f64 = 0.3;

const CLOSING_PHRASES: &[&str] = &[
    "in conclusion",
    "in summary",
    "to summarize",
    "to conclude",
    "overall",
    "finally",
    "in short",
];

const EVIDENTIARY_PHRASES: &[&str] = &[
    "because",
    "according to",
    "research",
    "studies",
    "evidence",
    "data",
    "for example",
    "for instance",
];

const CONTRADICTION_PHRASES: &[&str] = &[
    "but actually",
    "on second thought",
    "i was wrong",
    "that is incorrect",
    "contradicts",
];

const HEDGING_PHRASES: &[&str] = &[
    "maybe",
    "possibly",
    "perhaps",
    "not sure",
    "i think",
    "it could be that",
];

/// The four heuristic sub-scores for one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityScores {
    pub coherence: f64,
    pub relevance: f64,
    pub completeness: f64,
    pub accuracy: f64,
}

impl QualityScores {
    pub fn composite(&self) -> f64 {
        (self.coherence + self.relevance + self.completeness + self.accuracy) / 4.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputRanker {
    filter: SecurityFilter,
}

impl OutputRanker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score one candidate against the prompt it answers.
    pub fn score(&self, prompt: &str, response: &str) -> QualityScores {
        QualityScores {
            coherence: coherence(response),
            relevance: relevance(prompt, response),
            completeness: completeness(prompt, response),
            accuracy: accuracy(response),
        }
    }

    /// Whether a candidate's content trips the security filter.
    pub fn rejects(&self, content: &str) -> Option<&'static str> {
        self.filter.first_match(content)
    }

    /// Rank candidates by composite score, dropping security-flagged
    /// content and anything under [`MIN_COMPOSITE_SCORE`]. Each survivor's
    /// confidence field carries its composite.
    pub fn rank(
        &self,
        prompt: &str,
        candidates: Vec<GenerationResponse>,
    ) -> Vec<GenerationResponse> {
        let mut scored: Vec<GenerationResponse> = candidates
            .into_iter()
            .filter(|c| {
                if let Some(pattern) = self.filter.first_match(&c.content) {
                    tracing::warn!(
                        backend = %c.backend,
                        pattern,
                        "candidate dropped by security filter"
                    );
                    return false;
                }
                true
            })
            .map(|mut c| {
                c.confidence = Some(self.score(prompt, &c.content).composite());
                c
            })
            .filter(|c| c.confidence.unwrap_or(0.0) >= MIN_COMPOSITE_SCORE)
            .collect();

        scored.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored
    }
}

/// Sentence-ending punctuation, multi-sentence structure, sane length.
fn coherence(response: &str) -> f64 {
    let mut points = 0.0;
    if response.contains(['.', '!', '?']) {
        points += 1.0;
    }
    let sentences = response
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count();
    if sentences >= 2 {
        points += 1.0;
    }
    if (50..=4000).contains(&response.len()) {
        points += 1.0;
    }
    points / 3.0
}

fn content_words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_string())
        .collect()
}

/// Token-overlap ratio between prompt and response.
fn relevance(prompt: &str, response: &str) -> f64 {
    let prompt_words = content_words(prompt);
    if prompt_words.is_empty() {
        return 0.0;
    }
    let response_words = content_words(response);
    let overlap = prompt_words.intersection(&response_words).count();
    overlap as f64 / prompt_words.len() as f64
}

/// Closing language, minimum length, early echo of the prompt's topic.
fn completeness(prompt: &str, response: &str) -> f64 {
    let lowered = response.to_lowercase();
    let mut points = 0.0;
    if CLOSING_PHRASES.iter().any(|p| lowered.contains(p)) {
        points += 1.0;
    }
    if response.len() >= 100 {
        points += 1.0;
    }
    // Does the response engage with the topic early on?
    let head_len = (response.len() / 4).max(100).min(response.len());
    let head = lowered
        .char_indices()
        .take_while(|(i, _)| *i < head_len)
        .map(|(_, c)| c)
        .collect::<String>();
    let lowered_prompt = prompt.to_lowercase();
    let echoes_topic = lowered_prompt
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 4)
        .any(|topic| head.contains(topic));
    if echoes_topic {
        points += 1.0;
    }
    points / 3.0
}

/// No self-contradiction, evidentiary language, confident phrasing.
fn accuracy(response: &str) -> f64 {
    let lowered = response.to_lowercase();
    let mut points = 0.0;
    if !CONTRADICTION_PHRASES.iter().any(|p| lowered.contains(p)) {
        points += 1.0;
    }
    if EVIDENTIARY_PHRASES.iter().any(|p| lowered.contains(p)) {
        points += 1.0;
    }
    if !HEDGING_PHRASES.iter().any(|p| lowered.contains(p)) {
        points += 1.0;
    }
    points / 3.0
}
