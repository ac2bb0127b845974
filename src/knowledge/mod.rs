pub mod domain;
pub mod embedding;
pub mod ingest;
pub mod repository;
pub mod resolver;
pub mod similarity;

pub use domain::{
    validate_confidence, ChunkStatus, KnowledgeCandidate, KnowledgeChunk, KnowledgeDomainError,
    KnowledgeSource, NewKnowledgeSource, SourceStatus, SourceType,
};
pub use embedding::{Embedder, EmbeddingError, HashedEmbedder};
pub use ingest::{chunk_text, ingest_source_text, IngestError, IngestOptions};
pub use repository::{KnowledgeRepository, KnowledgeRepositoryError};
pub use resolver::{
    resolve, ConfidenceBand, FileSuggestion, KnowledgeUse, ResolutionError, ResolutionOptions,
    ResolutionResult,
};
pub use similarity::{
    EmbeddingScorer, HybridScorer, LexicalOverlapScorer, ScoredBatch, ScoringError, ScoringMode,
    SimilarityScorer,
};
