use super::domain::{ExecutionOutcome, ExecutionRecord};
use super::repository::{ExecutionRepository, ExecutionRepositoryError};
use crate::actions::ActionRunReport;
use crate::inbound::NormalizedMessage;
use crate::rules::EvaluationOutcome;
use crate::shared::ids::generate_compact_id;
use crate::shared::logging::EventLog;
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to generate execution id: {0}")]
    Id(String),
    #[error("confidence score must be in range 0.0..=1.0; got {value}")]
    ConfidenceOutOfRange { value: f32 },
    #[error(transparent)]
    Repository(#[from] ExecutionRepositoryError),
}

/// Everything one orchestration pass knows after evaluation and dispatch.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionInput<'a> {
    pub message: &'a NormalizedMessage,
    pub evaluation: &'a EvaluationOutcome,
    pub action_reports: &'a [ActionRunReport],
    pub execution_time_ms: u64,
    pub now: i64,
}

pub struct ExecutionRecorder<'a> {
    repository: &'a ExecutionRepository,
    log: &'a EventLog,
}

impl<'a> ExecutionRecorder<'a> {
    pub fn new(repository: &'a ExecutionRepository, log: &'a EventLog) -> Self {
        Self { repository, log }
    }

    /// Appends exactly one record for the pass and returns its id.
    pub fn record(&self, input: ExecutionInput<'_>) -> Result<String, ExecutionError> {
        let record = build_record(input)?;
        self.repository.append(&record)?;
        self.log.emit(
            "execution.recorded",
            &[
                ("execution_id", Value::String(record.execution_id.clone())),
                (
                    "organization_id",
                    Value::String(record.organization_id.clone()),
                ),
                ("message_id", Value::String(record.message_id.clone())),
                ("outcome", Value::String(record.outcome.as_str().to_string())),
                ("success", Value::Bool(record.success)),
                (
                    "rule_id",
                    record.rule_id.clone().map(Value::String).unwrap_or(Value::Null),
                ),
                ("execution_time_ms", Value::from(record.execution_time_ms)),
            ],
        );
        Ok(record.execution_id)
    }
}

pub fn build_record(input: ExecutionInput<'_>) -> Result<ExecutionRecord, ExecutionError> {
    let execution_id = generate_compact_id("exec", input.now).map_err(ExecutionError::Id)?;
    let evaluation = input.evaluation;
    let primary = evaluation.matched_rule();

    let mut detected_intentions = BTreeSet::new();
    let mut matched_keywords = Vec::new();
    for rule_match in &evaluation.matched {
        detected_intentions.extend(rule_match.detected_intentions.iter().cloned());
        for keyword in &rule_match.matched_keywords {
            if !matched_keywords.contains(keyword) {
                matched_keywords.push(keyword.clone());
            }
        }
    }

    let confidence_score = primary.map(|m| m.confidence).unwrap_or(0.0);
    if !(0.0..=1.0).contains(&confidence_score) {
        return Err(ExecutionError::ConfidenceOutOfRange {
            value: confidence_score,
        });
    }

    let matched = primary.is_some();
    let success = matched && !input.action_reports.iter().any(ActionRunReport::failed);

    Ok(ExecutionRecord {
        execution_id,
        organization_id: input.message.organization_id.clone(),
        rule_id: primary.map(|m| m.rule.rule_id.clone()),
        rule_name: primary.map(|m| m.rule.name.clone()),
        matched_rule_ids: evaluation
            .matched
            .iter()
            .map(|m| m.rule.rule_id.clone())
            .collect(),
        conversation_id: input.message.conversation_id.clone(),
        contact_id: input.message.contact_id.clone(),
        message_id: input.message.message_id.clone(),
        outcome: if matched {
            ExecutionOutcome::Matched
        } else {
            ExecutionOutcome::NoMatch
        },
        success,
        detected_intentions,
        matched_keywords,
        confidence_score,
        action_reports: input.action_reports.to_vec(),
        execution_time_ms: input.execution_time_ms,
        created_at: input.now,
    })
}
