use crate::inbound::{Contact, Conversation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("store unavailable: {0}")]
    Store(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("cross-organization access denied: expected {expected}, got {actual}")]
    ScopeDenied { expected: String, actual: String },
    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentOutcome {
    Assigned,
    AlreadyAssignedToSame,
    AlreadyAssigned { agent_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReplyTemplate {
    pub template_id: String,
    pub organization_id: String,
    pub name: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutgoingOrigin {
    RuleReply { rule_id: String },
    AutoResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Attachment {
    pub source_id: String,
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
}

/// Message handed to the outbound gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutboundMessage {
    pub organization_id: String,
    pub conversation_id: String,
    pub recipient: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub correlation_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SentMessage {
    pub provider_message_id: Option<String>,
    /// Source ids of attachments the gateway refused after the text went out.
    pub failed_attachments: Vec<String>,
}

/// Outgoing message as appended to the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutgoingMessageRecord {
    pub organization_id: String,
    pub conversation_id: String,
    pub text: String,
    pub origin: OutgoingOrigin,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    pub created_at: i64,
}

/// Contact/conversation persistence used by actions. Every call names the
/// organization so implementations can refuse cross-tenant access.
pub trait ContactStore {
    fn load_contact(
        &self,
        organization_id: &str,
        contact_id: &str,
    ) -> Result<Option<Contact>, PortError>;

    fn load_conversation(
        &self,
        organization_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, PortError>;

    /// Set-insert; applying an existing tag is a no-op.
    fn apply_tag(
        &self,
        organization_id: &str,
        contact_id: &str,
        tag: &str,
        now: i64,
    ) -> Result<(), PortError>;

    fn contact_tags(&self, organization_id: &str, contact_id: &str)
        -> Result<Vec<String>, PortError>;

    /// Assigns only when the conversation has no agent yet, atomically.
    fn assign_agent_if_unassigned(
        &self,
        organization_id: &str,
        conversation_id: &str,
        agent_id: &str,
        now: i64,
    ) -> Result<AssignmentOutcome, PortError>;

    fn append_outgoing_message(&self, record: &OutgoingMessageRecord) -> Result<(), PortError>;

    fn load_reply_template(
        &self,
        organization_id: &str,
        template_id: &str,
    ) -> Result<Option<ReplyTemplate>, PortError>;
}

pub trait MessageSender {
    fn send_message(&self, message: &OutboundMessage) -> Result<SentMessage, PortError>;
}

pub trait WebhookClient {
    /// Returns the response status on 2xx/3xx.
    fn post_json(&self, url: &str, payload: &Value) -> Result<u16, PortError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// An earlier pass sent this reply.
    AlreadyDelivered,
    /// An earlier pass claimed the key but never completed or released it.
    Pending,
}

/// Correlation-key ledger that keeps retried replies from being sent twice.
pub trait DeliveryLedger {
    fn claim(
        &self,
        organization_id: &str,
        key: &str,
        now: i64,
    ) -> Result<ClaimOutcome, PortError>;

    fn complete(
        &self,
        organization_id: &str,
        key: &str,
        provider_message_id: Option<&str>,
        now: i64,
    ) -> Result<(), PortError>;

    /// Drops a claim after a failed send so a retry can deliver.
    fn release(&self, organization_id: &str, key: &str) -> Result<(), PortError>;
}
