use super::ledger::compute_action_correlation_key;
use super::ports::{
    AssignmentOutcome, ClaimOutcome, ContactStore, DeliveryLedger, MessageSender,
    OutboundMessage, OutgoingMessageRecord, OutgoingOrigin, PortError, WebhookClient,
};
use super::template::{render_reply_template, TemplateError};
use crate::inbound::{Contact, Conversation, NormalizedMessage};
use crate::rules::{Action, ActionKind, AutomationRule};
use crate::shared::logging::EventLog;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionExecutionError {
    #[error("tag write failed: {0}")]
    TagWrite(PortError),
    #[error("agent assignment failed: {0}")]
    Assignment(PortError),
    #[error("reply template `{template_id}` not found")]
    TemplateMissing { template_id: String },
    #[error("reply template lookup failed: {0}")]
    TemplateLookup(PortError),
    #[error("reply template `{template_id}` failed to render: {source}")]
    TemplateRender {
        template_id: String,
        #[source]
        source: TemplateError,
    },
    #[error("rendered reply is empty")]
    EmptyReply,
    #[error("delivery ledger failed: {0}")]
    Ledger(PortError),
    #[error("reply send failed: {0}")]
    Send(PortError),
    #[error("webhook call failed: {0}")]
    Webhook(PortError),
    #[error("action type `{raw_type}` is not supported")]
    Unrecognized { raw_type: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRunReport {
    pub rule_id: String,
    pub position: usize,
    pub action_type: ActionKind,
    pub status: ActionStatus,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ActionRunReport {
    pub fn success(&self) -> bool {
        self.status == ActionStatus::Succeeded
    }

    pub fn failed(&self) -> bool {
        self.status == ActionStatus::Failed
    }

    /// Reply went out now or in an earlier delivery of the same message. A
    /// claim still pending from an earlier pass does not count.
    pub fn delivered_reply(&self) -> bool {
        self.action_type == ActionKind::SendReply
            && (self.status == ActionStatus::Succeeded
                || self.detail.as_deref() == Some(DEDUPLICATED))
    }
}

const DEDUPLICATED: &str = "deduplicated";
const DELIVERY_PENDING: &str = "delivery_pending";

#[derive(Debug, Clone, Copy)]
pub struct DispatchContext<'a> {
    pub message: &'a NormalizedMessage,
    pub conversation: &'a Conversation,
    pub contact: &'a Contact,
    pub now: i64,
}

/// Runs a matched rule's actions one after another.
pub struct ActionDispatcher<'a> {
    contacts: &'a dyn ContactStore,
    sender: &'a dyn MessageSender,
    webhooks: &'a dyn WebhookClient,
    ledger: &'a dyn DeliveryLedger,
    log: &'a EventLog,
}

enum Completed {
    Done(Option<String>),
    Skipped(String),
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(
        contacts: &'a dyn ContactStore,
        sender: &'a dyn MessageSender,
        webhooks: &'a dyn WebhookClient,
        ledger: &'a dyn DeliveryLedger,
        log: &'a EventLog,
    ) -> Self {
        Self {
            contacts,
            sender,
            webhooks,
            ledger,
            log,
        }
    }

    /// One report per declared action, in order. A failure is recorded and the
    /// next action still runs unless the rule halts on failure, in which case
    /// the remaining actions are reported as skipped.
    pub fn dispatch(
        &self,
        rule: &AutomationRule,
        context: &DispatchContext<'_>,
    ) -> Vec<ActionRunReport> {
        let mut reports = Vec::with_capacity(rule.actions.len());
        let mut halted_at: Option<usize> = None;

        for (position, action) in rule.actions.iter().enumerate() {
            let action_type = action.kind();
            if let Some(failed_position) = halted_at {
                reports.push(ActionRunReport {
                    rule_id: rule.rule_id.clone(),
                    position,
                    action_type,
                    status: ActionStatus::Skipped,
                    detail: Some(format!("halted after action {failed_position} failed")),
                    error: None,
                });
                continue;
            }

            let report = match self.run_action(rule, position, action, context) {
                Ok(Completed::Done(detail)) => ActionRunReport {
                    rule_id: rule.rule_id.clone(),
                    position,
                    action_type,
                    status: ActionStatus::Succeeded,
                    detail,
                    error: None,
                },
                Ok(Completed::Skipped(detail)) => ActionRunReport {
                    rule_id: rule.rule_id.clone(),
                    position,
                    action_type,
                    status: ActionStatus::Skipped,
                    detail: Some(detail),
                    error: None,
                },
                Err(err) => {
                    self.log.emit(
                        "action.failed",
                        &[
                            ("organization_id", Value::from(rule.organization_id.as_str())),
                            ("rule_id", Value::from(rule.rule_id.as_str())),
                            ("position", Value::from(position)),
                            ("action_type", Value::from(action_type.as_str())),
                            ("error", Value::from(err.to_string())),
                        ],
                    );
                    if rule.halt_on_action_failure {
                        halted_at = Some(position);
                    }
                    ActionRunReport {
                        rule_id: rule.rule_id.clone(),
                        position,
                        action_type,
                        status: ActionStatus::Failed,
                        detail: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            reports.push(report);
        }

        if let Some(failed_position) = halted_at {
            self.log.emit(
                "action.halted",
                &[
                    ("rule_id", Value::from(rule.rule_id.as_str())),
                    ("failed_position", Value::from(failed_position)),
                    (
                        "skipped",
                        Value::from(rule.actions.len().saturating_sub(failed_position + 1)),
                    ),
                ],
            );
        }
        reports
    }

    fn run_action(
        &self,
        rule: &AutomationRule,
        position: usize,
        action: &Action,
        context: &DispatchContext<'_>,
    ) -> Result<Completed, ActionExecutionError> {
        let organization_id = rule.organization_id.as_str();
        match action {
            Action::ApplyTag { tag } => {
                let tag = tag.trim();
                self.contacts
                    .apply_tag(organization_id, &context.contact.contact_id, tag, context.now)
                    .map_err(ActionExecutionError::TagWrite)?;
                Ok(Completed::Done(Some(format!("tag={tag}"))))
            }
            Action::AssignAgent { agent_id } => {
                let agent_id = agent_id.trim();
                let outcome = self
                    .contacts
                    .assign_agent_if_unassigned(
                        organization_id,
                        &context.conversation.conversation_id,
                        agent_id,
                        context.now,
                    )
                    .map_err(ActionExecutionError::Assignment)?;
                match outcome {
                    AssignmentOutcome::Assigned => {
                        Ok(Completed::Done(Some(format!("assigned={agent_id}"))))
                    }
                    AssignmentOutcome::AlreadyAssignedToSame => {
                        Ok(Completed::Done(Some(format!("already_assigned={agent_id}"))))
                    }
                    AssignmentOutcome::AlreadyAssigned { agent_id: current } => {
                        Ok(Completed::Skipped(format!("already_assigned:{current}")))
                    }
                }
            }
            Action::SendReply {
                template_id,
                idempotent,
            } => self.send_reply(rule, position, template_id, *idempotent, context),
            Action::CallWebhook { url, include_tags } => {
                let mut payload = json!({
                    "event": "automation.rule_matched",
                    "organization_id": organization_id,
                    "rule_id": rule.rule_id,
                    "rule_name": rule.name,
                    "conversation_id": context.conversation.conversation_id,
                    "contact_id": context.contact.contact_id,
                    "message_id": context.message.message_id,
                    "text": context.message.text,
                    "timestamp": context.message.timestamp,
                });
                if *include_tags {
                    let tags = self
                        .contacts
                        .contact_tags(organization_id, &context.contact.contact_id)
                        .map_err(ActionExecutionError::Webhook)?;
                    payload["tags"] = Value::from(tags);
                }
                let status = self
                    .webhooks
                    .post_json(url.trim(), &payload)
                    .map_err(ActionExecutionError::Webhook)?;
                Ok(Completed::Done(Some(format!("status={status}"))))
            }
            Action::Unrecognized { raw_type } => Err(ActionExecutionError::Unrecognized {
                raw_type: raw_type.clone(),
            }),
        }
    }

    fn send_reply(
        &self,
        rule: &AutomationRule,
        position: usize,
        template_id: &str,
        idempotent: bool,
        context: &DispatchContext<'_>,
    ) -> Result<Completed, ActionExecutionError> {
        let organization_id = rule.organization_id.as_str();
        let template = self
            .contacts
            .load_reply_template(organization_id, template_id)
            .map_err(ActionExecutionError::TemplateLookup)?
            .ok_or_else(|| ActionExecutionError::TemplateMissing {
                template_id: template_id.to_string(),
            })?;
        let text = render_reply_template(
            &template.body,
            context.contact,
            context.conversation,
            context.message,
            &rule.name,
        )
        .map_err(|source| ActionExecutionError::TemplateRender {
            template_id: template_id.to_string(),
            source,
        })?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(ActionExecutionError::EmptyReply);
        }

        let correlation_key = idempotent.then(|| {
            compute_action_correlation_key(
                organization_id,
                &context.conversation.conversation_id,
                &context.message.message_id,
                &rule.rule_id,
                position,
            )
        });
        if let Some(key) = &correlation_key {
            let claim = self
                .ledger
                .claim(organization_id, key, context.now)
                .map_err(ActionExecutionError::Ledger)?;
            match claim {
                ClaimOutcome::Claimed => {}
                ClaimOutcome::AlreadyDelivered => {
                    return Ok(Completed::Skipped(DEDUPLICATED.to_string()))
                }
                ClaimOutcome::Pending => {
                    self.log.emit(
                        "reply.claim_pending",
                        &[
                            ("rule_id", Value::from(rule.rule_id.as_str())),
                            ("message_id", Value::from(context.message.message_id.as_str())),
                            ("correlation_key", Value::from(key.as_str())),
                        ],
                    );
                    return Ok(Completed::Skipped(DELIVERY_PENDING.to_string()));
                }
            }
        }

        let outbound = OutboundMessage {
            organization_id: organization_id.to_string(),
            conversation_id: context.conversation.conversation_id.clone(),
            recipient: context
                .contact
                .phone
                .clone()
                .unwrap_or_else(|| context.contact.contact_id.clone()),
            text: text.clone(),
            attachments: Vec::new(),
            correlation_key: correlation_key.clone(),
        };
        let sent = match self.sender.send_message(&outbound) {
            Ok(sent) => sent,
            Err(err) => {
                if let Some(key) = &correlation_key {
                    if let Err(release_err) = self.ledger.release(organization_id, key) {
                        self.log.emit(
                            "reply.ledger_release_failed",
                            &[
                                ("rule_id", Value::from(rule.rule_id.as_str())),
                                ("message_id", Value::from(context.message.message_id.as_str())),
                                ("correlation_key", Value::from(key.as_str())),
                                ("error", Value::from(release_err.to_string())),
                            ],
                        );
                    }
                }
                return Err(ActionExecutionError::Send(err));
            }
        };
        if let Some(key) = &correlation_key {
            if let Err(err) = self.ledger.complete(
                organization_id,
                key,
                sent.provider_message_id.as_deref(),
                context.now,
            ) {
                self.log.emit(
                    "reply.ledger_complete_failed",
                    &[
                        ("rule_id", Value::from(rule.rule_id.as_str())),
                        ("message_id", Value::from(context.message.message_id.as_str())),
                        ("correlation_key", Value::from(key.as_str())),
                        ("error", Value::from(err.to_string())),
                    ],
                );
            }
        }

        let record = OutgoingMessageRecord {
            organization_id: organization_id.to_string(),
            conversation_id: context.conversation.conversation_id.clone(),
            text,
            origin: OutgoingOrigin::RuleReply {
                rule_id: rule.rule_id.clone(),
            },
            attachments: Vec::new(),
            provider_message_id: sent.provider_message_id.clone(),
            created_at: context.now,
        };
        if let Err(err) = self.contacts.append_outgoing_message(&record) {
            self.log.emit(
                "reply.history_write_failed",
                &[
                    ("rule_id", Value::from(rule.rule_id.as_str())),
                    ("conversation_id", Value::from(record.conversation_id.as_str())),
                    ("error", Value::from(err.to_string())),
                ],
            );
            return Ok(Completed::Done(Some(format!(
                "sent; history write failed: {err}"
            ))));
        }
        Ok(Completed::Done(Some(format!("template={template_id}"))))
    }
}
