use super::domain::{KnowledgeSource, SourceStatus};
use super::embedding::Embedder;
use super::repository::{KnowledgeRepository, KnowledgeRepositoryError};
use crate::shared::logging::EventLog;
use serde_json::Value;

pub const DEFAULT_MAX_CHUNK_CHARS: usize = 800;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("knowledge repository error: {0}")]
    Repository(#[from] KnowledgeRepositoryError),
    #[error("knowledge source `{source_id}` has no content to index")]
    EmptyContent { source_id: String },
    #[error("no chunk of knowledge source `{source_id}` could be embedded")]
    NothingEmbedded { source_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub max_chunk_chars: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
        }
    }
}

/// Splits text into paragraph-aligned chunks of at most `max_chars`
/// characters. Oversized paragraphs are cut on whitespace where possible.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text
        .split("\n\n")
        .map(|paragraph| paragraph.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|paragraph| !paragraph.is_empty())
    {
        let paragraph_len = paragraph.chars().count();
        let current_len = current.chars().count();
        if !current.is_empty() && current_len + 1 + paragraph_len <= max_chars {
            current.push('\n');
            current.push_str(&paragraph);
            continue;
        }
        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if paragraph_len <= max_chars {
            current = paragraph;
        } else {
            chunks.extend(split_long(&paragraph, max_chars));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_long(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for word in paragraph.split(' ') {
        let word_len = word.chars().count();
        let current_len = current.chars().count();
        if !current.is_empty() && current_len + 1 + word_len <= max_chars {
            current.push(' ');
            current.push_str(word);
            continue;
        }
        if !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        if word_len <= max_chars {
            current = word.to_string();
            continue;
        }
        let chars: Vec<char> = word.chars().collect();
        for piece in chars.chunks(max_chars) {
            out.push(piece.iter().collect());
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Runs one source through processing, chunking and embedding. Any failure
/// moves the source to `error` with the failure message before returning it.
pub fn ingest_source_text(
    repo: &KnowledgeRepository,
    embedder: &dyn Embedder,
    source_id: &str,
    content: &str,
    options: IngestOptions,
    log: &EventLog,
    now: i64,
) -> Result<KnowledgeSource, IngestError> {
    repo.transition_status(source_id, SourceStatus::Processing, None, now)?;
    match run_pipeline(repo, embedder, source_id, content, options, log, now) {
        Ok(source) => {
            log.emit(
                "knowledge.source_activated",
                &[
                    ("source_id", Value::String(source_id.to_string())),
                    ("chunks_total", Value::from(source.chunks_total)),
                    ("chunks_failed", Value::from(source.chunks_failed)),
                    ("content_quality", Value::from(f64::from(source.content_quality))),
                ],
            );
            Ok(source)
        }
        Err(err) => {
            let message = err.to_string();
            log.emit(
                "knowledge.ingest_failed",
                &[
                    ("source_id", Value::String(source_id.to_string())),
                    ("error", Value::String(message.clone())),
                ],
            );
            if let Err(transition_err) =
                repo.transition_status(source_id, SourceStatus::Error, Some(&message), now)
            {
                log.emit(
                    "knowledge.error_transition_failed",
                    &[
                        ("source_id", Value::String(source_id.to_string())),
                        ("error", Value::String(transition_err.to_string())),
                    ],
                );
            }
            Err(err)
        }
    }
}

fn run_pipeline(
    repo: &KnowledgeRepository,
    embedder: &dyn Embedder,
    source_id: &str,
    content: &str,
    options: IngestOptions,
    log: &EventLog,
    now: i64,
) -> Result<KnowledgeSource, IngestError> {
    repo.transition_status(source_id, SourceStatus::Chunking, None, now)?;
    let pieces = chunk_text(content, options.max_chunk_chars);
    if pieces.is_empty() {
        return Err(IngestError::EmptyContent {
            source_id: source_id.to_string(),
        });
    }
    let chunks = repo.replace_chunks(source_id, &pieces, now)?;

    repo.transition_status(source_id, SourceStatus::Embedding, None, now)?;
    for chunk in &chunks {
        match embedder.embed(&chunk.content) {
            Ok(Some(vector)) => repo.store_chunk_embedding(&chunk.chunk_id, &vector)?,
            Ok(None) => repo.mark_chunk_failed(&chunk.chunk_id)?,
            Err(err) => {
                log.emit(
                    "knowledge.chunk_embedding_failed",
                    &[
                        ("source_id", Value::String(source_id.to_string())),
                        ("chunk_id", Value::String(chunk.chunk_id.clone())),
                        ("error", Value::String(err.to_string())),
                    ],
                );
                repo.mark_chunk_failed(&chunk.chunk_id)?;
            }
        }
    }

    let progress = repo.refresh_progress(source_id, now)?;
    if progress.chunks_processed == progress.chunks_failed {
        return Err(IngestError::NothingEmbedded {
            source_id: source_id.to_string(),
        });
    }
    Ok(repo.transition_status(source_id, SourceStatus::Active, None, now)?)
}
