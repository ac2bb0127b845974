use super::error::OrchestratorError;
use crate::actions::{
    compute_auto_reply_correlation_key, ActionDispatcher, ActionRunReport, Attachment,
    ClaimOutcome, ContactStore, DeliveryLedger, DispatchContext, MessageSender,
    OutboundMessage, OutgoingMessageRecord, OutgoingOrigin, WebhookClient,
};
use crate::config::EngineConfig;
use crate::executions::{ExecutionInput, ExecutionRecorder, ExecutionRepository};
use crate::inbound::{Contact, Conversation, InboundMessage, NormalizedMessage};
use crate::knowledge::{resolve, KnowledgeRepository, ResolutionResult, SimilarityScorer};
use crate::rules::{evaluate, EvaluationOutcome, RuleRepository};
use crate::shared::logging::EventLog;
use crate::shared::now_secs;
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;

/// Everything the engine talks to. All stores must be opened for the same
/// organization.
pub struct EngineDeps<'a> {
    pub rules: &'a RuleRepository,
    pub executions: &'a ExecutionRepository,
    pub knowledge: &'a KnowledgeRepository,
    pub contacts: &'a dyn ContactStore,
    pub sender: &'a dyn MessageSender,
    pub webhooks: &'a dyn WebhookClient,
    pub ledger: &'a dyn DeliveryLedger,
    pub scorer: &'a dyn SimilarityScorer,
    pub log: &'a EventLog,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AwaitReason {
    ResolutionDisabled,
    EmptyMessage,
    LowConfidence { confidence: f32 },
    ResolutionFailed { error: String },
    SendFailed { error: String },
    /// An earlier pass claimed this reply and never settled it.
    DeliveryPending,
}

impl AwaitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolutionDisabled => "resolution_disabled",
            Self::EmptyMessage => "empty_message",
            Self::LowConfidence { .. } => "low_confidence",
            Self::ResolutionFailed { .. } => "resolution_failed",
            Self::SendFailed { .. } => "send_failed",
            Self::DeliveryPending => "delivery_pending",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ResponseDecision {
    /// A matched rule's `send_reply` delivered (or had already delivered).
    RuleReply { rule_id: String },
    AutoResponded {
        confidence: f32,
        provider_message_id: Option<String>,
        deduplicated: bool,
    },
    AwaitHuman { reason: AwaitReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionStatus {
    NotAttempted,
    Resolved { result: ResolutionResult },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub execution_id: String,
    pub matched_rule_ids: Vec<String>,
    pub action_reports: Vec<ActionRunReport>,
    pub decision: ResponseDecision,
    pub resolution: ResolutionStatus,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

impl ProcessOutcome {
    pub fn is_no_match(&self) -> bool {
        self.matched_rule_ids.is_empty()
    }
}

pub struct AutomationEngine<'a> {
    organization_id: String,
    config: EngineConfig,
    deps: EngineDeps<'a>,
}

impl<'a> AutomationEngine<'a> {
    pub fn new(config: EngineConfig, deps: EngineDeps<'a>) -> Result<Self, OrchestratorError> {
        let organization_id = deps.rules.organization_id().to_string();
        config.validate(&organization_id)?;
        for (entity, actual) in [
            ("execution store", deps.executions.organization_id()),
            ("knowledge store", deps.knowledge.organization_id()),
        ] {
            if actual != organization_id {
                return Err(OrchestratorError::TenantMismatch {
                    entity,
                    expected: organization_id,
                    actual: actual.to_string(),
                });
            }
        }
        Ok(Self {
            organization_id,
            config,
            deps,
        })
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn process_incoming_message(
        &self,
        message: &InboundMessage,
        conversation: &Conversation,
        contact: &Contact,
    ) -> Result<ProcessOutcome, OrchestratorError> {
        self.process_incoming_message_at(message, conversation, contact, now_secs())
    }

    /// One automation pass: evaluate rules, run actions, record the
    /// execution, then decide how the message gets answered.
    pub fn process_incoming_message_at(
        &self,
        message: &InboundMessage,
        conversation: &Conversation,
        contact: &Contact,
        now: i64,
    ) -> Result<ProcessOutcome, OrchestratorError> {
        let started = Instant::now();
        self.check_tenancy(message, conversation, contact)?;
        let normalized = NormalizedMessage::from_inbound(message);

        let rule_set = self.deps.rules.load_active_rule_set()?;
        for corrupt in &rule_set.corrupt {
            self.deps.log.emit(
                "rule.corrupt",
                &[
                    ("message_id", Value::String(normalized.message_id.clone())),
                    ("rule_id", Value::String(corrupt.rule_id.clone())),
                    ("reason", Value::String(corrupt.reason.clone())),
                ],
            );
        }
        let evaluation = evaluate(
            &rule_set.rules,
            &normalized,
            contact,
            self.config.rule_execution_mode,
        );
        self.log_condition_errors(&normalized, &evaluation);

        let dispatcher = ActionDispatcher::new(
            self.deps.contacts,
            self.deps.sender,
            self.deps.webhooks,
            self.deps.ledger,
            self.deps.log,
        );
        let context = DispatchContext {
            message: &normalized,
            conversation,
            contact,
            now,
        };
        let mut action_reports = Vec::new();
        for rule_match in &evaluation.matched {
            action_reports.extend(dispatcher.dispatch(&rule_match.rule, &context));
        }

        let recorder = ExecutionRecorder::new(self.deps.executions, self.deps.log);
        let execution_id = recorder.record(ExecutionInput {
            message: &normalized,
            evaluation: &evaluation,
            action_reports: &action_reports,
            execution_time_ms: elapsed_ms(started),
            now,
        })?;

        let (decision, resolution) = match action_reports
            .iter()
            .find(|report| report.delivered_reply())
        {
            Some(report) => (
                ResponseDecision::RuleReply {
                    rule_id: report.rule_id.clone(),
                },
                ResolutionStatus::NotAttempted,
            ),
            None => self.respond_from_knowledge(&normalized, conversation, contact, now),
        };

        let elapsed = elapsed_ms(started);
        let timed_out = u128::from(elapsed) > self.config.response_deadline().as_millis();
        if timed_out {
            self.deps.log.emit(
                "engine.deadline_exceeded",
                &[
                    ("message_id", Value::String(normalized.message_id.clone())),
                    ("elapsed_ms", Value::from(elapsed)),
                    ("deadline_ms", Value::from(self.config.response_deadline_ms)),
                ],
            );
        }

        Ok(ProcessOutcome {
            execution_id,
            matched_rule_ids: evaluation
                .matched
                .iter()
                .map(|m| m.rule.rule_id.clone())
                .collect(),
            action_reports,
            decision,
            resolution,
            timed_out,
            elapsed_ms: elapsed,
        })
    }

    fn check_tenancy(
        &self,
        message: &InboundMessage,
        conversation: &Conversation,
        contact: &Contact,
    ) -> Result<(), OrchestratorError> {
        for (field, value) in [
            ("message_id", &message.message_id),
            ("conversation_id", &message.conversation_id),
            ("contact_id", &message.contact_id),
        ] {
            if value.trim().is_empty() {
                return Err(OrchestratorError::MissingField { field });
            }
        }
        for (entity, actual) in [
            ("message", &message.organization_id),
            ("conversation", &conversation.organization_id),
            ("contact", &contact.organization_id),
        ] {
            if *actual != self.organization_id {
                self.deps.log.emit(
                    "engine.tenant_mismatch",
                    &[
                        ("entity", Value::String(entity.to_string())),
                        ("expected", Value::String(self.organization_id.clone())),
                        ("actual", Value::String(actual.clone())),
                    ],
                );
                return Err(OrchestratorError::TenantMismatch {
                    entity,
                    expected: self.organization_id.clone(),
                    actual: actual.clone(),
                });
            }
        }
        for (field, expected, actual) in [
            (
                "conversation",
                &conversation.conversation_id,
                &message.conversation_id,
            ),
            ("contact", &contact.contact_id, &message.contact_id),
        ] {
            if expected != actual {
                return Err(OrchestratorError::MessageMismatch {
                    message_id: message.message_id.clone(),
                    field,
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
        Ok(())
    }

    fn log_condition_errors(&self, message: &NormalizedMessage, evaluation: &EvaluationOutcome) {
        for rule in &evaluation.rule_results {
            for result in &rule.condition_results {
                let Some(error) = &result.error else {
                    continue;
                };
                self.deps.log.emit(
                    "condition.error",
                    &[
                        ("message_id", Value::String(message.message_id.clone())),
                        ("rule_id", Value::String(rule.rule_id.clone())),
                        ("kind", Value::String(result.kind.as_str().to_string())),
                        ("error", Value::String(error.to_string())),
                    ],
                );
            }
        }
    }

    fn respond_from_knowledge(
        &self,
        message: &NormalizedMessage,
        conversation: &Conversation,
        contact: &Contact,
        now: i64,
    ) -> (ResponseDecision, ResolutionStatus) {
        let await_human = |reason: AwaitReason| ResponseDecision::AwaitHuman { reason };
        if !self.config.resolution.enabled {
            return (
                await_human(AwaitReason::ResolutionDisabled),
                ResolutionStatus::NotAttempted,
            );
        }
        if message.text.is_empty() {
            return (
                await_human(AwaitReason::EmptyMessage),
                ResolutionStatus::NotAttempted,
            );
        }

        let resolved = self
            .deps
            .knowledge
            .list_queryable_candidates()
            .map_err(|err| err.to_string())
            .and_then(|candidates| {
                resolve(
                    &message.text,
                    &candidates,
                    self.deps.scorer,
                    &self.config.resolution_options(),
                )
                .map_err(|err| err.to_string())
            });
        let result = match resolved {
            Ok(result) => result,
            Err(error) => {
                self.deps.log.emit(
                    "resolution.failed",
                    &[
                        ("message_id", Value::String(message.message_id.clone())),
                        ("error", Value::String(error.clone())),
                    ],
                );
                return (
                    await_human(AwaitReason::ResolutionFailed {
                        error: error.clone(),
                    }),
                    ResolutionStatus::Failed { error },
                );
            }
        };

        self.deps.log.emit(
            "resolution.completed",
            &[
                ("message_id", Value::String(message.message_id.clone())),
                ("confidence", Value::from(f64::from(result.confidence))),
                ("auto_respond", Value::Bool(result.would_auto_respond)),
                ("processing_time_ms", Value::from(result.processing_time_ms)),
            ],
        );

        let decision = if result.would_auto_respond {
            self.send_auto_reply(message, conversation, contact, &result, now)
        } else {
            await_human(AwaitReason::LowConfidence {
                confidence: result.confidence,
            })
        };
        (decision, ResolutionStatus::Resolved { result })
    }

    fn send_auto_reply(
        &self,
        message: &NormalizedMessage,
        conversation: &Conversation,
        contact: &Contact,
        result: &ResolutionResult,
        now: i64,
    ) -> ResponseDecision {
        let organization_id = &self.organization_id;
        let key = compute_auto_reply_correlation_key(
            organization_id,
            &conversation.conversation_id,
            &message.message_id,
        );
        let send_failed = |error: String| {
            self.deps.log.emit(
                "auto_reply.failed",
                &[
                    ("message_id", Value::String(message.message_id.clone())),
                    ("error", Value::String(error.clone())),
                ],
            );
            ResponseDecision::AwaitHuman {
                reason: AwaitReason::SendFailed { error },
            }
        };

        match self.deps.ledger.claim(organization_id, &key, now) {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(ClaimOutcome::AlreadyDelivered) => {
                return ResponseDecision::AutoResponded {
                    confidence: result.confidence,
                    provider_message_id: None,
                    deduplicated: true,
                }
            }
            Ok(ClaimOutcome::Pending) => {
                self.deps.log.emit(
                    "auto_reply.claim_pending",
                    &[
                        ("message_id", Value::String(message.message_id.clone())),
                        ("correlation_key", Value::String(key.clone())),
                    ],
                );
                return ResponseDecision::AwaitHuman {
                    reason: AwaitReason::DeliveryPending,
                };
            }
            Err(err) => return send_failed(err.to_string()),
        }

        let outbound = OutboundMessage {
            organization_id: organization_id.clone(),
            conversation_id: conversation.conversation_id.clone(),
            recipient: contact
                .phone
                .clone()
                .unwrap_or_else(|| contact.contact_id.clone()),
            text: result.response_text.clone(),
            attachments: result
                .files_to_send
                .iter()
                .map(|file| Attachment {
                    source_id: file.source_id.clone(),
                    title: file.title.clone(),
                    location: file.location.clone(),
                })
                .collect(),
            correlation_key: Some(key.clone()),
        };
        let sent = match self.deps.sender.send_message(&outbound) {
            Ok(sent) => sent,
            Err(err) => {
                if let Err(release_err) = self.deps.ledger.release(organization_id, &key) {
                    self.deps.log.emit(
                        "reply.ledger_release_failed",
                        &[
                            ("message_id", Value::String(message.message_id.clone())),
                            ("correlation_key", Value::String(key.clone())),
                            ("error", Value::String(release_err.to_string())),
                        ],
                    );
                }
                return send_failed(err.to_string());
            }
        };
        if let Err(err) = self.deps.ledger.complete(
            organization_id,
            &key,
            sent.provider_message_id.as_deref(),
            now,
        ) {
            self.deps.log.emit(
                "auto_reply.ledger_complete_failed",
                &[
                    ("message_id", Value::String(message.message_id.clone())),
                    ("error", Value::String(err.to_string())),
                ],
            );
        }

        if !sent.failed_attachments.is_empty() {
            self.deps.log.emit(
                "auto_reply.attachments_failed",
                &[
                    ("message_id", Value::String(message.message_id.clone())),
                    ("source_ids", Value::from(sent.failed_attachments.clone())),
                ],
            );
        }
        let delivered_files: Vec<String> = outbound
            .attachments
            .iter()
            .map(|attachment| attachment.source_id.clone())
            .filter(|source_id| !sent.failed_attachments.contains(source_id))
            .collect();

        let record = OutgoingMessageRecord {
            organization_id: organization_id.clone(),
            conversation_id: conversation.conversation_id.clone(),
            text: outbound.text.clone(),
            origin: OutgoingOrigin::AutoResponse,
            attachments: delivered_files.clone(),
            provider_message_id: sent.provider_message_id.clone(),
            created_at: now,
        };
        if let Err(err) = self.deps.contacts.append_outgoing_message(&record) {
            self.deps.log.emit(
                "reply.history_write_failed",
                &[
                    ("message_id", Value::String(message.message_id.clone())),
                    ("error", Value::String(err.to_string())),
                ],
            );
        }

        let mut used = Vec::new();
        if let Some(top) = result.knowledge_used.first() {
            used.push(top.source_id.clone());
        }
        for source_id in delivered_files {
            if !used.contains(&source_id) {
                used.push(source_id);
            }
        }
        if let Err(err) = self.deps.knowledge.record_usage(&used, now) {
            self.deps.log.emit(
                "knowledge.usage_write_failed",
                &[("error", Value::String(err.to_string()))],
            );
        }

        self.deps.log.emit(
            "auto_reply.sent",
            &[
                ("message_id", Value::String(message.message_id.clone())),
                ("confidence", Value::from(f64::from(result.confidence))),
                ("attachments", Value::from(record.attachments.len())),
            ],
        );
        ResponseDecision::AutoResponded {
            confidence: result.confidence,
            provider_message_id: sent.provider_message_id,
            deduplicated: false,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
