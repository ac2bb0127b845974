use super::engine::{AutomationEngine, EngineDeps};
use super::error::OrchestratorError;
use crate::actions::{
    HttpMessageSender, HttpWebhookClient, MessageSender, OutboundMessage, PortError, SentMessage,
    SqliteDeliveryLedger,
};
use crate::config::{EngineConfig, ScorerKind, Settings, StatePaths};
use crate::crm::CrmRepository;
use crate::executions::ExecutionRepository;
use crate::knowledge::{
    ingest_source_text, EmbeddingScorer, HashedEmbedder, HybridScorer, IngestOptions,
    KnowledgeRepository, KnowledgeSource, LexicalOverlapScorer, SimilarityScorer,
};
use crate::rules::RuleRepository;
use crate::shared::ids::OrganizationId;
use crate::shared::logging::EventLog;
use crate::shared::now_secs;

/// Sender used when no gateway is configured; every send fails so replies
/// fall back to a human.
struct UnconfiguredSender;

impl MessageSender for UnconfiguredSender {
    fn send_message(&self, _message: &OutboundMessage) -> Result<SentMessage, PortError> {
        Err(PortError::Delivery(
            "no messaging gateway configured".to_string(),
        ))
    }
}

/// Owned stores and adapters for one organization, opened from settings.
pub struct OrganizationRuntime {
    pub paths: StatePaths,
    pub config: EngineConfig,
    pub rules: RuleRepository,
    pub executions: ExecutionRepository,
    pub knowledge: KnowledgeRepository,
    pub crm: CrmRepository,
    pub ledger: SqliteDeliveryLedger,
    pub log: EventLog,
    embedder: HashedEmbedder,
    scorer: Box<dyn SimilarityScorer>,
    sender: Box<dyn MessageSender>,
    webhooks: HttpWebhookClient,
}

impl OrganizationRuntime {
    pub fn open(settings: &Settings, organization_id: &str) -> Result<Self, OrchestratorError> {
        settings.validate()?;
        OrganizationId::parse(organization_id).map_err(|_| {
            OrchestratorError::UnknownOrganization {
                organization_id: organization_id.to_string(),
            }
        })?;
        let config = settings.engine_config_for(organization_id);
        let paths = settings.state_paths();
        let database = &paths.database;

        let embedder = HashedEmbedder::new(config.resolution.embedding_dimensions);
        let scorer: Box<dyn SimilarityScorer> = match config.resolution.scorer {
            ScorerKind::Embedding => Box::new(EmbeddingScorer::new(embedder)),
            ScorerKind::Lexical => Box::new(LexicalOverlapScorer),
            ScorerKind::Hybrid => Box::new(HybridScorer::new(embedder)),
        };
        let sender: Box<dyn MessageSender> = match &config.gateway {
            Some(gateway) => Box::new(HttpMessageSender::new(
                &gateway.api_base,
                &gateway.instance,
                &gateway.api_key()?,
                gateway.timeout(),
            )),
            None => Box::new(UnconfiguredSender),
        };

        Ok(Self {
            rules: RuleRepository::open(database, organization_id)?,
            executions: ExecutionRepository::open(database, organization_id)?,
            knowledge: KnowledgeRepository::open(database, organization_id)?,
            crm: CrmRepository::open(database, organization_id)?,
            ledger: SqliteDeliveryLedger::open(database)?,
            log: EventLog::new(paths.log.clone()),
            webhooks: HttpWebhookClient::new(config.webhook_timeout()),
            embedder,
            scorer,
            sender,
            paths,
            config,
        })
    }

    pub fn engine(&self) -> Result<AutomationEngine<'_>, OrchestratorError> {
        AutomationEngine::new(
            self.config.clone(),
            EngineDeps {
                rules: &self.rules,
                executions: &self.executions,
                knowledge: &self.knowledge,
                contacts: &self.crm,
                sender: self.sender.as_ref(),
                webhooks: &self.webhooks,
                ledger: &self.ledger,
                scorer: self.scorer.as_ref(),
                log: &self.log,
            },
        )
    }

    /// Indexes text for a registered source with the configured embedder.
    pub fn ingest_text(
        &self,
        source_id: &str,
        content: &str,
    ) -> Result<KnowledgeSource, OrchestratorError> {
        let options = IngestOptions {
            max_chunk_chars: self.config.resolution.max_chunk_chars,
        };
        Ok(ingest_source_text(
            &self.knowledge,
            &self.embedder,
            source_id,
            content,
            options,
            &self.log,
            now_secs(),
        )?)
    }
}
