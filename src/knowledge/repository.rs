use super::domain::{
    validate_content_quality, validate_transition, ChunkStatus, KnowledgeCandidate,
    KnowledgeChunk, KnowledgeDomainError, KnowledgeSource, NewKnowledgeSource, SourceStatus,
    SourceType,
};
use super::embedding::{decode_embedding, encode_embedding};
use crate::shared::ids::generate_compact_id;
use crate::shared::sqlite::open_connection;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeRepositoryError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create knowledge database parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error(transparent)]
    Domain(#[from] KnowledgeDomainError),
    #[error("failed to generate knowledge id: {0}")]
    Id(String),
    #[error("knowledge source `{source_id}` not found")]
    UnknownSource { source_id: String },
    #[error("knowledge chunk `{chunk_id}` not found")]
    UnknownChunk { chunk_id: String },
    #[error("stored knowledge row `{id}` is corrupt: {reason}")]
    CorruptRow { id: String, reason: String },
}

/// Knowledge sources and their chunks for one organization.
pub struct KnowledgeRepository {
    db_path: PathBuf,
    organization_id: String,
}

impl KnowledgeRepository {
    pub fn open(db_path: &Path, organization_id: &str) -> Result<Self, KnowledgeRepositoryError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| {
                KnowledgeRepositoryError::CreateParent {
                    path: parent.display().to_string(),
                    source,
                }
            })?;
        }
        let repo = Self {
            db_path: db_path.to_path_buf(),
            organization_id: organization_id.to_string(),
        };
        repo.ensure_schema()?;
        Ok(repo)
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    fn ensure_schema(&self) -> Result<(), KnowledgeRepositoryError> {
        self.connect()?
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS knowledge_sources (
                    source_id TEXT PRIMARY KEY,
                    organization_id TEXT NOT NULL,
                    source_type TEXT NOT NULL,
                    title TEXT NOT NULL,
                    location TEXT,
                    status TEXT NOT NULL,
                    chunks_total INTEGER NOT NULL DEFAULT 0,
                    chunks_processed INTEGER NOT NULL DEFAULT 0,
                    chunks_failed INTEGER NOT NULL DEFAULT 0,
                    content_quality REAL NOT NULL DEFAULT 0,
                    usage_count INTEGER NOT NULL DEFAULT 0,
                    last_used_at INTEGER,
                    error_message TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS knowledge_chunks (
                    chunk_id TEXT PRIMARY KEY,
                    source_id TEXT NOT NULL,
                    organization_id TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    content TEXT NOT NULL,
                    embedding BLOB,
                    status TEXT NOT NULL,
                    UNIQUE (source_id, position)
                );

                CREATE INDEX IF NOT EXISTS idx_knowledge_sources_org_status
                    ON knowledge_sources(organization_id, status);
                CREATE INDEX IF NOT EXISTS idx_knowledge_chunks_source
                    ON knowledge_chunks(organization_id, source_id, position);
                ",
            )
            .map_err(|source| KnowledgeRepositoryError::Sql { source })
    }

    pub fn create_source(
        &self,
        input: &NewKnowledgeSource,
        now: i64,
    ) -> Result<KnowledgeSource, KnowledgeRepositoryError> {
        input.validate()?;
        let source_id = generate_compact_id("ks", now).map_err(KnowledgeRepositoryError::Id)?;
        self.connect()?
            .execute(
                "
                INSERT INTO knowledge_sources (
                    source_id, organization_id, source_type, title, location, status,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                ",
                params![
                    source_id,
                    self.organization_id,
                    input.source_type.as_str(),
                    input.title.trim(),
                    input.location,
                    SourceStatus::Pending.as_str(),
                    now,
                ],
            )
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
        self.require_source(&source_id)
    }

    pub fn get_source(
        &self,
        source_id: &str,
    ) -> Result<Option<KnowledgeSource>, KnowledgeRepositoryError> {
        let raw = self
            .connect()?
            .query_row(
                &format!(
                    "SELECT {SOURCE_COLUMNS} FROM knowledge_sources
                     WHERE organization_id = ?1 AND source_id = ?2"
                ),
                params![self.organization_id, source_id],
                RawSource::from_row,
            )
            .optional()
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
        raw.map(|raw| raw.decode(&self.organization_id)).transpose()
    }

    pub fn list_sources(&self) -> Result<Vec<KnowledgeSource>, KnowledgeRepositoryError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(&format!(
                "SELECT {SOURCE_COLUMNS} FROM knowledge_sources
                 WHERE organization_id = ?1
                 ORDER BY created_at ASC, source_id ASC"
            ))
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
        let rows = statement
            .query_map(params![self.organization_id], RawSource::from_row)
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
        let mut out = Vec::new();
        for row in rows {
            let raw = row.map_err(|source| KnowledgeRepositoryError::Sql { source })?;
            out.push(raw.decode(&self.organization_id)?);
        }
        Ok(out)
    }

    /// Moves a source along its lifecycle. `error_message` is stored when
    /// entering `error` and cleared on every other transition.
    pub fn transition_status(
        &self,
        source_id: &str,
        to: SourceStatus,
        error_message: Option<&str>,
        now: i64,
    ) -> Result<KnowledgeSource, KnowledgeRepositoryError> {
        let current = self.require_source(source_id)?;
        validate_transition(current.status, to)?;
        let error_message = if to == SourceStatus::Error {
            Some(error_message.unwrap_or("ingestion failed"))
        } else {
            None
        };
        self.connect()?
            .execute(
                "
                UPDATE knowledge_sources
                SET status = ?3, error_message = ?4, updated_at = ?5
                WHERE organization_id = ?1 AND source_id = ?2
                ",
                params![
                    self.organization_id,
                    source_id,
                    to.as_str(),
                    error_message,
                    now
                ],
            )
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
        self.require_source(source_id)
    }

    /// Replaces every chunk of the source with `contents`, all pending.
    pub fn replace_chunks(
        &self,
        source_id: &str,
        contents: &[String],
        now: i64,
    ) -> Result<Vec<KnowledgeChunk>, KnowledgeRepositoryError> {
        self.require_source(source_id)?;
        let mut connection = self.connect()?;
        let tx = connection
            .transaction()
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
        tx.execute(
            "DELETE FROM knowledge_chunks WHERE organization_id = ?1 AND source_id = ?2",
            params![self.organization_id, source_id],
        )
        .map_err(|source| KnowledgeRepositoryError::Sql { source })?;

        let mut chunks = Vec::with_capacity(contents.len());
        for (position, content) in contents.iter().enumerate() {
            let position = u32::try_from(position).unwrap_or(u32::MAX);
            let chunk_id = format!("{source_id}-c{position}");
            tx.execute(
                "
                INSERT INTO knowledge_chunks (
                    chunk_id, source_id, organization_id, position, content, status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
                params![
                    chunk_id,
                    source_id,
                    self.organization_id,
                    position,
                    content,
                    ChunkStatus::Pending.as_str(),
                ],
            )
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
            chunks.push(KnowledgeChunk {
                chunk_id,
                source_id: source_id.to_string(),
                position,
                content: content.clone(),
                embedding: None,
                status: ChunkStatus::Pending,
            });
        }

        tx.execute(
            "
            UPDATE knowledge_sources
            SET chunks_total = ?3, chunks_processed = 0, chunks_failed = 0,
                content_quality = 0, updated_at = ?4
            WHERE organization_id = ?1 AND source_id = ?2
            ",
            params![
                self.organization_id,
                source_id,
                u32::try_from(contents.len()).unwrap_or(u32::MAX),
                now
            ],
        )
        .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
        tx.commit()
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
        Ok(chunks)
    }

    pub fn store_chunk_embedding(
        &self,
        chunk_id: &str,
        embedding: &[f32],
    ) -> Result<(), KnowledgeRepositoryError> {
        self.set_chunk_state(chunk_id, Some(encode_embedding(embedding)), ChunkStatus::Embedded)
    }

    pub fn mark_chunk_failed(&self, chunk_id: &str) -> Result<(), KnowledgeRepositoryError> {
        self.set_chunk_state(chunk_id, None, ChunkStatus::Failed)
    }

    fn set_chunk_state(
        &self,
        chunk_id: &str,
        embedding: Option<Vec<u8>>,
        status: ChunkStatus,
    ) -> Result<(), KnowledgeRepositoryError> {
        let updated = self
            .connect()?
            .execute(
                "
                UPDATE knowledge_chunks SET embedding = ?3, status = ?4
                WHERE organization_id = ?1 AND chunk_id = ?2
                ",
                params![self.organization_id, chunk_id, embedding, status.as_str()],
            )
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
        if updated == 0 {
            return Err(KnowledgeRepositoryError::UnknownChunk {
                chunk_id: chunk_id.to_string(),
            });
        }
        Ok(())
    }

    /// Recounts chunk states and stores processed/failed counters and the
    /// embedded share as content quality.
    pub fn refresh_progress(
        &self,
        source_id: &str,
        now: i64,
    ) -> Result<KnowledgeSource, KnowledgeRepositoryError> {
        let connection = self.connect()?;
        let (total, embedded, failed) = connection
            .query_row(
                "
                SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'embedded' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
                FROM knowledge_chunks
                WHERE organization_id = ?1 AND source_id = ?2
                ",
                params![self.organization_id, source_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
            )
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
        let quality = if total == 0 {
            0.0
        } else {
            embedded as f32 / total as f32
        };
        validate_content_quality(quality)?;
        connection
            .execute(
                "
                UPDATE knowledge_sources
                SET chunks_total = ?3, chunks_processed = ?4, chunks_failed = ?5,
                    content_quality = ?6, updated_at = ?7
                WHERE organization_id = ?1 AND source_id = ?2
                ",
                params![
                    self.organization_id,
                    source_id,
                    total,
                    embedded + failed,
                    failed,
                    f64::from(quality),
                    now
                ],
            )
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
        self.require_source(source_id)
    }

    pub fn list_chunks(
        &self,
        source_id: &str,
    ) -> Result<Vec<KnowledgeChunk>, KnowledgeRepositoryError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(
                "
                SELECT chunk_id, position, content, embedding, status
                FROM knowledge_chunks
                WHERE organization_id = ?1 AND source_id = ?2
                ORDER BY position ASC
                ",
            )
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
        let rows = statement
            .query_map(params![self.organization_id, source_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<Vec<u8>>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;

        let mut out = Vec::new();
        for row in rows {
            let (chunk_id, position, content, blob, status) =
                row.map_err(|source| KnowledgeRepositoryError::Sql { source })?;
            let status = ChunkStatus::parse(&status).ok_or_else(|| {
                KnowledgeRepositoryError::CorruptRow {
                    id: chunk_id.clone(),
                    reason: format!("unknown chunk status `{status}`"),
                }
            })?;
            let embedding = decode_blob(&chunk_id, blob)?;
            out.push(KnowledgeChunk {
                chunk_id,
                source_id: source_id.to_string(),
                position,
                content,
                embedding,
                status,
            });
        }
        Ok(out)
    }

    /// Embedded chunks of active sources; sources without any embedded chunk
    /// contribute nothing.
    pub fn list_queryable_candidates(
        &self,
    ) -> Result<Vec<KnowledgeCandidate>, KnowledgeRepositoryError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(
                "
                SELECT s.source_id, s.source_type, s.title, s.location,
                       c.chunk_id, c.content, c.embedding
                FROM knowledge_sources s
                JOIN knowledge_chunks c
                  ON c.source_id = s.source_id AND c.organization_id = s.organization_id
                WHERE s.organization_id = ?1
                  AND s.status = 'active'
                  AND c.status = 'embedded'
                ORDER BY s.source_id ASC, c.position ASC
                ",
            )
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
        let rows = statement
            .query_map(params![self.organization_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<Vec<u8>>>(6)?,
                ))
            })
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;

        let mut out = Vec::new();
        for row in rows {
            let (source_id, source_type, title, location, chunk_id, content, blob) =
                row.map_err(|source| KnowledgeRepositoryError::Sql { source })?;
            let source_type = SourceType::parse(&source_type).ok_or_else(|| {
                KnowledgeRepositoryError::CorruptRow {
                    id: source_id.clone(),
                    reason: format!("unknown source type `{source_type}`"),
                }
            })?;
            let embedding = decode_blob(&chunk_id, blob)?;
            out.push(KnowledgeCandidate {
                source_id,
                source_type,
                title,
                location,
                chunk_id,
                content,
                embedding,
            });
        }
        Ok(out)
    }

    /// Bumps usage counters for sources that backed an automatic response.
    pub fn record_usage(
        &self,
        source_ids: &[String],
        now: i64,
    ) -> Result<(), KnowledgeRepositoryError> {
        let mut connection = self.connect()?;
        let tx = connection
            .transaction()
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
        for source_id in source_ids {
            tx.execute(
                "
                UPDATE knowledge_sources
                SET usage_count = usage_count + 1, last_used_at = ?3
                WHERE organization_id = ?1 AND source_id = ?2
                ",
                params![self.organization_id, source_id, now],
            )
            .map_err(|source| KnowledgeRepositoryError::Sql { source })?;
        }
        tx.commit()
            .map_err(|source| KnowledgeRepositoryError::Sql { source })
    }

    fn require_source(&self, source_id: &str) -> Result<KnowledgeSource, KnowledgeRepositoryError> {
        self.get_source(source_id)?
            .ok_or_else(|| KnowledgeRepositoryError::UnknownSource {
                source_id: source_id.to_string(),
            })
    }

    fn connect(&self) -> Result<Connection, KnowledgeRepositoryError> {
        open_connection(&self.db_path).map_err(|source| KnowledgeRepositoryError::Open {
            path: self.db_path.display().to_string(),
            source,
        })
    }
}

fn decode_blob(
    chunk_id: &str,
    blob: Option<Vec<u8>>,
) -> Result<Option<Vec<f32>>, KnowledgeRepositoryError> {
    match blob {
        None => Ok(None),
        Some(blob) => decode_embedding(&blob).map(Some).ok_or_else(|| {
            KnowledgeRepositoryError::CorruptRow {
                id: chunk_id.to_string(),
                reason: "embedding blob length is not a multiple of 4".to_string(),
            }
        }),
    }
}

const SOURCE_COLUMNS: &str = "source_id, source_type, title, location, status, chunks_total, \
     chunks_processed, chunks_failed, content_quality, usage_count, last_used_at, \
     error_message, created_at, updated_at";

struct RawSource {
    source_id: String,
    source_type: String,
    title: String,
    location: Option<String>,
    status: String,
    chunks_total: u32,
    chunks_processed: u32,
    chunks_failed: u32,
    content_quality: f64,
    usage_count: i64,
    last_used_at: Option<i64>,
    error_message: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl RawSource {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            source_id: row.get(0)?,
            source_type: row.get(1)?,
            title: row.get(2)?,
            location: row.get(3)?,
            status: row.get(4)?,
            chunks_total: row.get(5)?,
            chunks_processed: row.get(6)?,
            chunks_failed: row.get(7)?,
            content_quality: row.get(8)?,
            usage_count: row.get(9)?,
            last_used_at: row.get(10)?,
            error_message: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn decode(self, organization_id: &str) -> Result<KnowledgeSource, KnowledgeRepositoryError> {
        let corrupt = |reason: String| KnowledgeRepositoryError::CorruptRow {
            id: self.source_id.clone(),
            reason,
        };
        let source_type = SourceType::parse(&self.source_type)
            .ok_or_else(|| corrupt(format!("unknown source type `{}`", self.source_type)))?;
        let status = SourceStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status `{}`", self.status)))?;
        Ok(KnowledgeSource {
            source_id: self.source_id,
            organization_id: organization_id.to_string(),
            source_type,
            title: self.title,
            location: self.location,
            status,
            chunks_total: self.chunks_total,
            chunks_processed: self.chunks_processed,
            chunks_failed: self.chunks_failed,
            content_quality: self.content_quality as f32,
            usage_count: u64::try_from(self.usage_count).unwrap_or(0),
            last_used_at: self.last_used_at,
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
