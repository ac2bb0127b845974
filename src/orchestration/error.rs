use crate::actions::PortError;
use crate::config::ConfigError;
use crate::crm::CrmRepositoryError;
use crate::executions::{ExecutionError, ExecutionRepositoryError};
use crate::knowledge::{IngestError, KnowledgeRepositoryError};
use crate::rules::RuleRepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("{entity} belongs to organization `{actual}`, engine serves `{expected}`")]
    TenantMismatch {
        entity: &'static str,
        expected: String,
        actual: String,
    },
    #[error("message `{message_id}` references {field} `{actual}` but `{expected}` was supplied")]
    MessageMismatch {
        message_id: String,
        field: &'static str,
        expected: String,
        actual: String,
    },
    #[error("inbound message is missing `{field}`")]
    MissingField { field: &'static str },
    #[error("organization `{organization_id}` is not configured")]
    UnknownOrganization { organization_id: String },
    #[error("rule store failed: {0}")]
    Rules(#[from] RuleRepositoryError),
    #[error("execution recording failed: {0}")]
    Execution(#[from] ExecutionError),
    #[error("execution store failed: {0}")]
    ExecutionStore(#[from] ExecutionRepositoryError),
    #[error("knowledge store failed: {0}")]
    Knowledge(#[from] KnowledgeRepositoryError),
    #[error("knowledge ingestion failed: {0}")]
    Ingest(#[from] IngestError),
    #[error("crm store failed: {0}")]
    Crm(#[from] CrmRepositoryError),
    #[error("delivery ledger failed: {0}")]
    Ledger(#[from] PortError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
