use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum KnowledgeDomainError {
    #[error("confidence must be in range 0.0..=1.0; got {value}")]
    ConfidenceOutOfRange { value: f32 },
    #[error("content quality must be in range 0.0..=1.0; got {value}")]
    QualityOutOfRange { value: f32 },
    #[error("required field `{field}` must be non-empty")]
    MissingField { field: &'static str },
    #[error("source type `{source_type}` requires a location")]
    MissingLocation { source_type: &'static str },
    #[error("knowledge source cannot move from `{from}` to `{to}`")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

pub fn validate_confidence(value: f32) -> Result<(), KnowledgeDomainError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(KnowledgeDomainError::ConfidenceOutOfRange { value });
    }
    Ok(())
}

pub fn validate_content_quality(value: f32) -> Result<(), KnowledgeDomainError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(KnowledgeDomainError::QualityOutOfRange { value });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    File,
    Url,
    Text,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Url => "url",
            Self::Text => "text",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "file" => Some(Self::File),
            "url" => Some(Self::Url),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    Processing,
    Chunking,
    Embedding,
    Active,
    Error,
    Disabled,
}

impl SourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Active => "active",
            Self::Error => "error",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "chunking" => Some(Self::Chunking),
            "embedding" => Some(Self::Embedding),
            "active" => Some(Self::Active),
            "error" => Some(Self::Error),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use SourceStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Chunking)
                | (Chunking, Embedding)
                | (Embedding, Active)
                | (Pending | Processing | Chunking | Embedding, Error)
                | (Error, Pending)
                | (Active, Disabled)
                | (Disabled, Active)
                | (Active, Processing)
        )
    }
}

pub fn validate_transition(
    from: SourceStatus,
    to: SourceStatus,
) -> Result<(), KnowledgeDomainError> {
    if from.can_transition_to(to) {
        return Ok(());
    }
    Err(KnowledgeDomainError::InvalidTransition {
        from: from.as_str(),
        to: to.as_str(),
    })
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Embedded,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Embedded => "embedded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "embedded" => Some(Self::Embedded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSource {
    pub source_id: String,
    pub organization_id: String,
    pub source_type: SourceType,
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
    pub status: SourceStatus,
    pub chunks_total: u32,
    pub chunks_processed: u32,
    pub chunks_failed: u32,
    pub content_quality: f32,
    pub usage_count: u64,
    #[serde(default)]
    pub last_used_at: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl KnowledgeSource {
    pub fn is_active(&self) -> bool {
        self.status == SourceStatus::Active
    }
}

/// Input for registering a new source; everything else starts at defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NewKnowledgeSource {
    pub source_type: SourceType,
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl NewKnowledgeSource {
    pub fn validate(&self) -> Result<(), KnowledgeDomainError> {
        if self.title.trim().is_empty() {
            return Err(KnowledgeDomainError::MissingField { field: "title" });
        }
        let has_location = self
            .location
            .as_deref()
            .is_some_and(|location| !location.trim().is_empty());
        if matches!(self.source_type, SourceType::File | SourceType::Url) && !has_location {
            return Err(KnowledgeDomainError::MissingLocation {
                source_type: self.source_type.as_str(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeChunk {
    pub chunk_id: String,
    pub source_id: String,
    pub position: u32,
    pub content: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    pub status: ChunkStatus,
}

/// A chunk of a queryable source, as handed to the resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeCandidate {
    pub source_id: String,
    pub source_type: SourceType,
    pub title: String,
    pub location: Option<String>,
    pub chunk_id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
}
