#![allow(dead_code)]

use comodin_automation::actions::{
    ClaimOutcome, DeliveryLedger, MessageSender, OutboundMessage, PortError, SentMessage,
    SqliteDeliveryLedger, WebhookClient,
};
use comodin_automation::crm::CrmRepository;
use comodin_automation::executions::ExecutionRepository;
use comodin_automation::inbound::{Contact, Conversation, InboundMessage};
use comodin_automation::knowledge::KnowledgeRepository;
use comodin_automation::rules::RuleRepository;
use comodin_automation::shared::logging::EventLog;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

pub const ORG: &str = "org-acme";

#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub fail: AtomicBool,
    /// Text goes out but every attachment is refused.
    pub fail_attachments: bool,
    pub delay: Option<Duration>,
}

impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().expect("sender lock").clone()
    }
}

impl MessageSender for RecordingSender {
    fn send_message(&self, message: &OutboundMessage) -> Result<SentMessage, PortError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Delivery("gateway returned 503".to_string()));
        }
        let mut sent = self.sent.lock().expect("sender lock");
        sent.push(message.clone());
        let failed_attachments = if self.fail_attachments {
            message
                .attachments
                .iter()
                .map(|attachment| attachment.source_id.clone())
                .collect()
        } else {
            Vec::new()
        };
        Ok(SentMessage {
            provider_message_id: Some(format!("wamid-{}", sent.len())),
            failed_attachments,
        })
    }
}

#[derive(Default)]
pub struct RecordingWebhooks {
    pub calls: Mutex<Vec<(String, Value)>>,
    pub fail: bool,
}

impl RecordingWebhooks {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().expect("webhook lock").clone()
    }
}

impl WebhookClient for RecordingWebhooks {
    fn post_json(&self, url: &str, payload: &Value) -> Result<u16, PortError> {
        if self.fail {
            return Err(PortError::Delivery(format!("POST {url} failed: connection refused")));
        }
        self.calls
            .lock()
            .expect("webhook lock")
            .push((url.to_string(), payload.clone()));
        Ok(200)
    }
}

/// Ledger whose `release` always fails, leaving claims pending.
pub struct StuckLedger<'a> {
    pub inner: &'a SqliteDeliveryLedger,
}

impl DeliveryLedger for StuckLedger<'_> {
    fn claim(
        &self,
        organization_id: &str,
        key: &str,
        now: i64,
    ) -> Result<ClaimOutcome, PortError> {
        self.inner.claim(organization_id, key, now)
    }

    fn complete(
        &self,
        organization_id: &str,
        key: &str,
        provider_message_id: Option<&str>,
        now: i64,
    ) -> Result<(), PortError> {
        self.inner.complete(organization_id, key, provider_message_id, now)
    }

    fn release(&self, _organization_id: &str, _key: &str) -> Result<(), PortError> {
        Err(PortError::Store("database is locked".to_string()))
    }
}

/// SQLite-backed stores for one organization under a temp dir.
pub struct Harness {
    pub dir: TempDir,
    pub database: PathBuf,
    pub rules: RuleRepository,
    pub executions: ExecutionRepository,
    pub knowledge: KnowledgeRepository,
    pub crm: CrmRepository,
    pub ledger: SqliteDeliveryLedger,
    pub log: EventLog,
}

impl Harness {
    pub fn new() -> Self {
        Self::for_organization(ORG)
    }

    pub fn for_organization(organization_id: &str) -> Self {
        let dir = tempdir().expect("temp dir");
        let database = dir.path().join("state/automation.db");
        Self {
            rules: RuleRepository::open(&database, organization_id).expect("rules"),
            executions: ExecutionRepository::open(&database, organization_id).expect("executions"),
            knowledge: KnowledgeRepository::open(&database, organization_id).expect("knowledge"),
            crm: CrmRepository::open(&database, organization_id).expect("crm"),
            ledger: SqliteDeliveryLedger::open(&database).expect("ledger"),
            log: EventLog::new(dir.path().join("logs/automation.log")),
            database,
            dir,
        }
    }

    pub fn log_lines(&self) -> Vec<Value> {
        let Some(path) = self.log.path() else {
            return Vec::new();
        };
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).expect("log line is json"))
            .collect()
    }

    /// Stores a contact and its conversation and returns both.
    pub fn seed_contact(&self, contact_id: &str, is_vip: bool) -> (Contact, Conversation) {
        let mut contact = Contact::new(ORG, contact_id);
        contact.name = Some("Lucía".to_string());
        contact.phone = Some("5215550001".to_string());
        contact.is_vip = is_vip;
        self.crm.upsert_contact(&contact, 100).expect("upsert contact");
        let conversation = Conversation::new(ORG, format!("conv-{contact_id}"), contact_id);
        self.crm
            .upsert_conversation(&conversation)
            .expect("upsert conversation");
        (contact, conversation)
    }
}

pub fn inbound(message_id: &str, conversation: &Conversation, text: &str) -> InboundMessage {
    InboundMessage {
        message_id: message_id.to_string(),
        organization_id: conversation.organization_id.clone(),
        conversation_id: conversation.conversation_id.clone(),
        contact_id: conversation.contact_id.clone(),
        text: text.to_string(),
        // Wednesday 2024-05-15 15:00:00 UTC
        timestamp: 1_715_785_200,
        detected_intents: Vec::new(),
        sentiment: None,
        channel_metadata: Map::new(),
    }
}
