use super::domain::{validate_confidence, KnowledgeCandidate, SourceType};
use super::similarity::{matching_terms, query_terms, ScoringError, ScoringMode, SimilarityScorer};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Instant;

pub const LOW_CONFIDENCE_CEILING: f32 = 0.6;
pub const HIGH_CONFIDENCE_FLOOR: f32 = 0.8;

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("similarity backend failed: {source}")]
    Backend {
        #[from]
        source: ScoringError,
    },
    #[error("similarity backend returned {actual} scores for {expected} candidates")]
    ScoreCountMismatch { expected: usize, actual: usize },
    #[error("invalid resolution options: {reason}")]
    InvalidOptions { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionOptions {
    pub top_n: usize,
    pub max_response_chars: usize,
    pub file_min_similarity: f32,
    pub auto_respond_threshold: f32,
    pub fallback_text: String,
}

impl Default for ResolutionOptions {
    fn default() -> Self {
        Self {
            top_n: 3,
            max_response_chars: 1000,
            file_min_similarity: 0.5,
            auto_respond_threshold: 0.75,
            fallback_text: String::new(),
        }
    }
}

impl ResolutionOptions {
    pub fn validate(&self) -> Result<(), ResolutionError> {
        let invalid = |reason: String| ResolutionError::InvalidOptions { reason };
        if self.top_n == 0 {
            return Err(invalid("top_n must be at least 1".to_string()));
        }
        if self.max_response_chars == 0 {
            return Err(invalid("max_response_chars must be at least 1".to_string()));
        }
        validate_confidence(self.auto_respond_threshold)
            .map_err(|err| invalid(format!("auto_respond_threshold: {err}")))?;
        validate_confidence(self.file_min_similarity)
            .map_err(|err| invalid(format!("file_min_similarity: {err}")))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl ConfidenceBand {
    pub fn for_confidence(confidence: f32) -> Self {
        if confidence < LOW_CONFIDENCE_CEILING {
            Self::Low
        } else if confidence < HIGH_CONFIDENCE_FLOOR {
            Self::Medium
        } else {
            Self::High
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSuggestion {
    pub source_id: String,
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeUse {
    pub source_id: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    pub response_text: String,
    pub files_to_send: Vec<FileSuggestion>,
    pub knowledge_used: Vec<KnowledgeUse>,
    pub confidence: f32,
    pub band: ConfidenceBand,
    pub would_auto_respond: bool,
    pub processing_time_ms: u64,
    pub mode: ScoringMode,
}

struct RankedSource<'a> {
    best: &'a KnowledgeCandidate,
    score: f32,
}

/// Scores every candidate chunk, keeps the best chunk per source and ranks
/// sources by that score. Confidence is the top source's score, so it never
/// decreases when the best similarity increases.
pub fn resolve(
    query: &str,
    candidates: &[KnowledgeCandidate],
    scorer: &dyn SimilarityScorer,
    options: &ResolutionOptions,
) -> Result<ResolutionResult, ResolutionError> {
    options.validate()?;
    let started = Instant::now();

    if candidates.is_empty() {
        return Ok(empty_result(options, started));
    }

    let batch = scorer.score(query, candidates)?;
    if batch.scores.len() != candidates.len() {
        return Err(ResolutionError::ScoreCountMismatch {
            expected: candidates.len(),
            actual: batch.scores.len(),
        });
    }

    let mut per_source: BTreeMap<&str, RankedSource<'_>> = BTreeMap::new();
    for (candidate, score) in candidates.iter().zip(batch.scores.iter().copied()) {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        per_source
            .entry(candidate.source_id.as_str())
            .and_modify(|ranked| {
                if score > ranked.score {
                    ranked.best = candidate;
                    ranked.score = score;
                }
            })
            .or_insert(RankedSource {
                best: candidate,
                score,
            });
    }

    let mut ranked: Vec<RankedSource<'_>> = per_source.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.best.source_id.cmp(&b.best.source_id))
    });
    ranked.truncate(options.top_n);

    let Some(top) = ranked.first() else {
        return Ok(empty_result(options, started));
    };
    let confidence = top.score;
    let response_text = truncate_chars(top.best.content.trim(), options.max_response_chars);

    let terms = query_terms(query);
    let files_to_send = ranked
        .iter()
        .enumerate()
        .filter(|(_, source)| {
            source.best.source_type == SourceType::File
                && source.score >= options.file_min_similarity
        })
        .map(|(rank, source)| FileSuggestion {
            source_id: source.best.source_id.clone(),
            title: source.best.title.clone(),
            location: source.best.location.clone(),
            reason: file_reason(rank == 0, &matching_terms(&terms, &source.best.content)),
        })
        .collect();

    let knowledge_used = ranked
        .iter()
        .map(|source| KnowledgeUse {
            source_id: source.best.source_id.clone(),
            similarity: source.score,
        })
        .collect();

    let would_auto_respond =
        confidence >= options.auto_respond_threshold && !response_text.is_empty();

    Ok(ResolutionResult {
        response_text,
        files_to_send,
        knowledge_used,
        confidence,
        band: ConfidenceBand::for_confidence(confidence),
        would_auto_respond,
        processing_time_ms: elapsed_ms(started),
        mode: batch.mode,
    })
}

fn empty_result(options: &ResolutionOptions, started: Instant) -> ResolutionResult {
    ResolutionResult {
        response_text: options.fallback_text.clone(),
        files_to_send: Vec::new(),
        knowledge_used: Vec::new(),
        confidence: 0.0,
        band: ConfidenceBand::Low,
        would_auto_respond: false,
        processing_time_ms: elapsed_ms(started),
        mode: ScoringMode::Empty,
    }
}

fn file_reason(is_top: bool, terms: &[String]) -> String {
    let prefix = if is_top {
        "highest-similarity match"
    } else {
        "similarity match"
    };
    if terms.is_empty() {
        return prefix.to_string();
    }
    format!("{prefix} for query terms {}", terms.join(", "))
}

/// Cuts to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
