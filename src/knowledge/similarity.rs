use super::domain::KnowledgeCandidate;
use super::embedding::{cosine_similarity, tokenize, Embedder, EmbeddingError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    Embedding,
    Lexical,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoringError {
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("chunk `{chunk_id}` has {actual} dimensions, query has {expected}")]
    DimensionMismatch {
        chunk_id: String,
        expected: usize,
        actual: usize,
    },
}

/// Scores aligned with the candidate slice, each in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredBatch {
    pub scores: Vec<f32>,
    pub mode: ScoringMode,
}

pub trait SimilarityScorer {
    fn score(
        &self,
        query: &str,
        candidates: &[KnowledgeCandidate],
    ) -> Result<ScoredBatch, ScoringError>;
}

/// Distinct query terms in first-seen order. Single-character tokens are
/// dropped.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in tokenize(query) {
        if token.chars().count() < 2 || terms.contains(&token) {
            continue;
        }
        terms.push(token);
    }
    terms
}

/// Query terms that occur as tokens of `content`.
pub fn matching_terms(terms: &[String], content: &str) -> Vec<String> {
    let tokens = tokenize(content);
    terms
        .iter()
        .filter(|term| tokens.iter().any(|token| token == *term))
        .cloned()
        .collect()
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Cosine similarity between the embedded query and stored chunk vectors.
pub struct EmbeddingScorer<E> {
    embedder: E,
}

impl<E: Embedder> EmbeddingScorer<E> {
    pub fn new(embedder: E) -> Self {
        Self { embedder }
    }
}

impl<E: Embedder> SimilarityScorer for EmbeddingScorer<E> {
    fn score(
        &self,
        query: &str,
        candidates: &[KnowledgeCandidate],
    ) -> Result<ScoredBatch, ScoringError> {
        let Some(query_vector) = self.embedder.embed(query)? else {
            return Ok(ScoredBatch {
                scores: vec![0.0; candidates.len()],
                mode: ScoringMode::Embedding,
            });
        };
        let mut scores = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let score = match &candidate.embedding {
                Some(vector) if vector.len() != query_vector.len() => {
                    return Err(ScoringError::DimensionMismatch {
                        chunk_id: candidate.chunk_id.clone(),
                        expected: query_vector.len(),
                        actual: vector.len(),
                    });
                }
                Some(vector) => clamp_unit(cosine_similarity(&query_vector, vector)),
                None => 0.0,
            };
            scores.push(score);
        }
        Ok(ScoredBatch {
            scores,
            mode: ScoringMode::Embedding,
        })
    }
}

/// Fraction of distinct query terms that appear in the chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalOverlapScorer;

impl LexicalOverlapScorer {
    fn score_one(terms: &[String], content: &str) -> f32 {
        if terms.is_empty() {
            return 0.0;
        }
        matching_terms(terms, content).len() as f32 / terms.len() as f32
    }
}

impl SimilarityScorer for LexicalOverlapScorer {
    fn score(
        &self,
        query: &str,
        candidates: &[KnowledgeCandidate],
    ) -> Result<ScoredBatch, ScoringError> {
        let terms = query_terms(query);
        Ok(ScoredBatch {
            scores: candidates
                .iter()
                .map(|candidate| Self::score_one(&terms, &candidate.content))
                .collect(),
            mode: ScoringMode::Lexical,
        })
    }
}

/// Embedding similarity where both sides have a vector, lexical overlap
/// otherwise. Mixed vector dimensions fall back to lexical for that chunk.
pub struct HybridScorer<E> {
    embedder: E,
}

impl<E: Embedder> HybridScorer<E> {
    pub fn new(embedder: E) -> Self {
        Self { embedder }
    }
}

impl<E: Embedder> SimilarityScorer for HybridScorer<E> {
    fn score(
        &self,
        query: &str,
        candidates: &[KnowledgeCandidate],
    ) -> Result<ScoredBatch, ScoringError> {
        let query_vector = self.embedder.embed(query)?;
        let terms = query_terms(query);
        let mut used_vectors = false;
        let mut scores = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let score = match (&query_vector, &candidate.embedding) {
                (Some(query_vector), Some(vector)) if vector.len() == query_vector.len() => {
                    used_vectors = true;
                    clamp_unit(cosine_similarity(query_vector, vector))
                }
                _ => LexicalOverlapScorer::score_one(&terms, &candidate.content),
            };
            scores.push(score);
        }
        Ok(ScoredBatch {
            scores,
            mode: if used_vectors {
                ScoringMode::Embedding
            } else {
                ScoringMode::Lexical
            },
        })
    }
}
