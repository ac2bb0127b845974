use super::domain::{ExecutionOutcome, ExecutionRecord};
use crate::actions::ActionRunReport;
use crate::shared::sqlite::open_connection;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ExecutionRepositoryError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create executions database parent {path}: {source}")]
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
    #[error("organization scope mismatch: expected {expected}, got {actual}")]
    OrganizationScopeMismatch { expected: String, actual: String },
    #[error("failed to encode {field}: {source}")]
    Encode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("stored execution `{execution_id}` is corrupt: {reason}")]
    CorruptRow {
        execution_id: String,
        reason: String,
    },
}

/// Listing filter for the execution history view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFilter {
    pub rule_id: Option<String>,
    pub include_no_match: bool,
    pub limit: usize,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            rule_id: None,
            include_no_match: false,
            limit: 50,
        }
    }
}

/// Append-only store of automation executions for one organization.
pub struct ExecutionRepository {
    db_path: PathBuf,
    organization_id: String,
}

impl ExecutionRepository {
    pub fn open(db_path: &Path, organization_id: &str) -> Result<Self, ExecutionRepositoryError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| {
                ExecutionRepositoryError::CreateParent {
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

    fn ensure_schema(&self) -> Result<(), ExecutionRepositoryError> {
        self.connect()?
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS automation_executions (
                    execution_id TEXT PRIMARY KEY,
                    organization_id TEXT NOT NULL,
                    rule_id TEXT,
                    rule_name TEXT,
                    matched_rule_ids_json TEXT NOT NULL,
                    conversation_id TEXT NOT NULL,
                    contact_id TEXT NOT NULL,
                    message_id TEXT NOT NULL,
                    outcome TEXT NOT NULL,
                    success INTEGER NOT NULL,
                    detected_intentions_json TEXT NOT NULL,
                    matched_keywords_json TEXT NOT NULL,
                    confidence_score REAL NOT NULL,
                    action_reports_json TEXT NOT NULL,
                    execution_time_ms INTEGER NOT NULL,
                    created_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_automation_executions_org_created
                    ON automation_executions(organization_id, created_at);
                CREATE INDEX IF NOT EXISTS idx_automation_executions_rule
                    ON automation_executions(organization_id, rule_id);
                ",
            )
            .map_err(|source| ExecutionRepositoryError::Sql { source })
    }

    pub fn append(&self, record: &ExecutionRecord) -> Result<(), ExecutionRepositoryError> {
        if record.organization_id != self.organization_id {
            return Err(ExecutionRepositoryError::OrganizationScopeMismatch {
                expected: self.organization_id.clone(),
                actual: record.organization_id.clone(),
            });
        }
        let encode = |field: &'static str, source: serde_json::Error| {
            ExecutionRepositoryError::Encode { field, source }
        };
        let matched_rule_ids = serde_json::to_string(&record.matched_rule_ids)
            .map_err(|err| encode("matched_rule_ids", err))?;
        let detected_intentions = serde_json::to_string(&record.detected_intentions)
            .map_err(|err| encode("detected_intentions", err))?;
        let matched_keywords = serde_json::to_string(&record.matched_keywords)
            .map_err(|err| encode("matched_keywords", err))?;
        let action_reports = serde_json::to_string(&record.action_reports)
            .map_err(|err| encode("action_reports", err))?;
        let execution_time_ms = i64::try_from(record.execution_time_ms).unwrap_or(i64::MAX);

        self.connect()?
            .execute(
                "
                INSERT INTO automation_executions (
                    execution_id, organization_id, rule_id, rule_name, matched_rule_ids_json,
                    conversation_id, contact_id, message_id, outcome, success,
                    detected_intentions_json, matched_keywords_json, confidence_score,
                    action_reports_json, execution_time_ms, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                ",
                params![
                    record.execution_id,
                    self.organization_id,
                    record.rule_id,
                    record.rule_name,
                    matched_rule_ids,
                    record.conversation_id,
                    record.contact_id,
                    record.message_id,
                    record.outcome.as_str(),
                    record.success,
                    detected_intentions,
                    matched_keywords,
                    f64::from(record.confidence_score),
                    action_reports,
                    execution_time_ms,
                    record.created_at,
                ],
            )
            .map_err(|source| ExecutionRepositoryError::Sql { source })?;
        Ok(())
    }

    pub fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, ExecutionRepositoryError> {
        let raw = self
            .connect()?
            .query_row(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM automation_executions
                     WHERE organization_id = ?1 AND execution_id = ?2"
                ),
                params![self.organization_id, execution_id],
                RawExecution::from_row,
            )
            .optional()
            .map_err(|source| ExecutionRepositoryError::Sql { source })?;
        raw.map(|raw| raw.decode(&self.organization_id)).transpose()
    }

    /// Most recent first. No-match passes are hidden unless requested.
    pub fn list_history(
        &self,
        filter: &HistoryFilter,
    ) -> Result<Vec<ExecutionRecord>, ExecutionRepositoryError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM automation_executions
                 WHERE organization_id = ?1
                   AND (?2 IS NULL OR rule_id = ?2)
                   AND (?3 = 1 OR outcome = 'matched')
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?4"
            ))
            .map_err(|source| ExecutionRepositoryError::Sql { source })?;
        let limit = i64::try_from(filter.limit).unwrap_or(i64::MAX);
        let rows = statement
            .query_map(
                params![
                    self.organization_id,
                    filter.rule_id,
                    filter.include_no_match,
                    limit
                ],
                RawExecution::from_row,
            )
            .map_err(|source| ExecutionRepositoryError::Sql { source })?;

        let mut out = Vec::new();
        for row in rows {
            let raw = row.map_err(|source| ExecutionRepositoryError::Sql { source })?;
            out.push(raw.decode(&self.organization_id)?);
        }
        Ok(out)
    }

    pub(crate) fn connect(&self) -> Result<Connection, ExecutionRepositoryError> {
        open_connection(&self.db_path).map_err(|source| ExecutionRepositoryError::Open {
            path: self.db_path.display().to_string(),
            source,
        })
    }
}

const SELECT_COLUMNS: &str = "execution_id, rule_id, rule_name, matched_rule_ids_json, \
     conversation_id, contact_id, message_id, outcome, success, detected_intentions_json, \
     matched_keywords_json, confidence_score, action_reports_json, execution_time_ms, created_at";

struct RawExecution {
    execution_id: String,
    rule_id: Option<String>,
    rule_name: Option<String>,
    matched_rule_ids_json: String,
    conversation_id: String,
    contact_id: String,
    message_id: String,
    outcome: String,
    success: bool,
    detected_intentions_json: String,
    matched_keywords_json: String,
    confidence_score: f64,
    action_reports_json: String,
    execution_time_ms: i64,
    created_at: i64,
}

impl RawExecution {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            execution_id: row.get(0)?,
            rule_id: row.get(1)?,
            rule_name: row.get(2)?,
            matched_rule_ids_json: row.get(3)?,
            conversation_id: row.get(4)?,
            contact_id: row.get(5)?,
            message_id: row.get(6)?,
            outcome: row.get(7)?,
            success: row.get(8)?,
            detected_intentions_json: row.get(9)?,
            matched_keywords_json: row.get(10)?,
            confidence_score: row.get(11)?,
            action_reports_json: row.get(12)?,
            execution_time_ms: row.get(13)?,
            created_at: row.get(14)?,
        })
    }

    fn decode(self, organization_id: &str) -> Result<ExecutionRecord, ExecutionRepositoryError> {
        let execution_id = self.execution_id;
        let corrupt = |reason: String| ExecutionRepositoryError::CorruptRow {
            execution_id: execution_id.clone(),
            reason,
        };
        let outcome = ExecutionOutcome::parse(&self.outcome)
            .ok_or_else(|| corrupt(format!("unknown outcome `{}`", self.outcome)))?;
        let matched_rule_ids: Vec<String> = serde_json::from_str(&self.matched_rule_ids_json)
            .map_err(|err| corrupt(format!("matched_rule_ids: {err}")))?;
        let detected_intentions: BTreeSet<String> =
            serde_json::from_str(&self.detected_intentions_json)
                .map_err(|err| corrupt(format!("detected_intentions: {err}")))?;
        let matched_keywords: Vec<String> = serde_json::from_str(&self.matched_keywords_json)
            .map_err(|err| corrupt(format!("matched_keywords: {err}")))?;
        let action_reports: Vec<ActionRunReport> =
            serde_json::from_str(&self.action_reports_json)
                .map_err(|err| corrupt(format!("action_reports: {err}")))?;

        Ok(ExecutionRecord {
            execution_id: execution_id.clone(),
            organization_id: organization_id.to_string(),
            rule_id: self.rule_id,
            rule_name: self.rule_name,
            matched_rule_ids,
            conversation_id: self.conversation_id,
            contact_id: self.contact_id,
            message_id: self.message_id,
            outcome,
            success: self.success,
            detected_intentions,
            matched_keywords,
            confidence_score: self.confidence_score as f32,
            action_reports,
            execution_time_ms: u64::try_from(self.execution_time_ms).unwrap_or(0),
            created_at: self.created_at,
        })
    }
}
