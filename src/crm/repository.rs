use crate::actions::ports::{
    AssignmentOutcome, ContactStore, OutgoingMessageRecord, OutgoingOrigin, PortError,
    ReplyTemplate,
};
use crate::inbound::{Contact, Conversation};
use crate::shared::sqlite::open_connection;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CrmRepositoryError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create crm database parent {path}: {source}")]
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
    #[error("required field `{field}` must be non-empty")]
    MissingField { field: &'static str },
    #[error("stored {field} for `{id}` does not decode: {reason}")]
    CorruptRow {
        field: &'static str,
        id: String,
        reason: String,
    },
}

impl From<CrmRepositoryError> for PortError {
    fn from(value: CrmRepositoryError) -> Self {
        match value {
            CrmRepositoryError::OrganizationScopeMismatch { expected, actual } => {
                PortError::ScopeDenied { expected, actual }
            }
            other => PortError::Store(other.to_string()),
        }
    }
}

/// Contacts, conversations, tags, reply templates and outgoing history for
/// one organization.
pub struct CrmRepository {
    db_path: PathBuf,
    organization_id: String,
}

impl CrmRepository {
    pub fn open(db_path: &Path, organization_id: &str) -> Result<Self, CrmRepositoryError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| CrmRepositoryError::CreateParent {
                path: parent.display().to_string(),
                source,
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

    fn ensure_schema(&self) -> Result<(), CrmRepositoryError> {
        self.connect()?
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS contacts (
                    organization_id TEXT NOT NULL,
                    contact_id TEXT NOT NULL,
                    name TEXT,
                    phone TEXT,
                    is_vip INTEGER NOT NULL,
                    custom_fields_json TEXT NOT NULL,
                    PRIMARY KEY (organization_id, contact_id)
                );

                CREATE TABLE IF NOT EXISTS contact_tags (
                    organization_id TEXT NOT NULL,
                    contact_id TEXT NOT NULL,
                    tag_key TEXT NOT NULL,
                    tag TEXT NOT NULL,
                    applied_at INTEGER NOT NULL,
                    PRIMARY KEY (organization_id, contact_id, tag_key)
                );

                CREATE TABLE IF NOT EXISTS conversations (
                    organization_id TEXT NOT NULL,
                    conversation_id TEXT NOT NULL,
                    contact_id TEXT NOT NULL,
                    assigned_agent_id TEXT,
                    assigned_at INTEGER,
                    PRIMARY KEY (organization_id, conversation_id)
                );

                CREATE TABLE IF NOT EXISTS outgoing_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    organization_id TEXT NOT NULL,
                    conversation_id TEXT NOT NULL,
                    text TEXT NOT NULL,
                    origin_json TEXT NOT NULL,
                    attachments_json TEXT NOT NULL,
                    provider_message_id TEXT,
                    created_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS reply_templates (
                    organization_id TEXT NOT NULL,
                    template_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    body TEXT NOT NULL,
                    PRIMARY KEY (organization_id, template_id)
                );

                CREATE INDEX IF NOT EXISTS idx_outgoing_messages_conversation
                    ON outgoing_messages(organization_id, conversation_id, id);
                ",
            )
            .map_err(|source| CrmRepositoryError::Sql { source })
    }

    /// Upserts contact fields and adds (never removes) the contact's tags.
    pub fn upsert_contact(&self, contact: &Contact, now: i64) -> Result<(), CrmRepositoryError> {
        self.ensure_scope(&contact.organization_id)?;
        if contact.contact_id.trim().is_empty() {
            return Err(CrmRepositoryError::MissingField {
                field: "contact_id",
            });
        }
        let custom_fields = Value::Object(contact.custom_fields.clone()).to_string();
        let mut connection = self.connect()?;
        let tx = connection
            .transaction()
            .map_err(|source| CrmRepositoryError::Sql { source })?;
        tx.execute(
            "
            INSERT INTO contacts (organization_id, contact_id, name, phone, is_vip, custom_fields_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(organization_id, contact_id) DO UPDATE SET
                name=excluded.name,
                phone=excluded.phone,
                is_vip=excluded.is_vip,
                custom_fields_json=excluded.custom_fields_json
            ",
            params![
                self.organization_id,
                contact.contact_id,
                contact.name,
                contact.phone,
                contact.is_vip,
                custom_fields,
            ],
        )
        .map_err(|source| CrmRepositoryError::Sql { source })?;
        for tag in &contact.tags {
            insert_tag(&tx, &self.organization_id, &contact.contact_id, tag, now)?;
        }
        tx.commit()
            .map_err(|source| CrmRepositoryError::Sql { source })
    }

    pub fn get_contact(&self, contact_id: &str) -> Result<Option<Contact>, CrmRepositoryError> {
        let connection = self.connect()?;
        let row = connection
            .query_row(
                "
                SELECT name, phone, is_vip, custom_fields_json FROM contacts
                WHERE organization_id = ?1 AND contact_id = ?2
                ",
                params![self.organization_id, contact_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|source| CrmRepositoryError::Sql { source })?;
        let Some((name, phone, is_vip, custom_fields_json)) = row else {
            return Ok(None);
        };
        let custom_fields: Map<String, Value> = serde_json::from_str(&custom_fields_json)
            .map_err(|err| CrmRepositoryError::CorruptRow {
                field: "custom_fields",
                id: contact_id.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Some(Contact {
            contact_id: contact_id.to_string(),
            organization_id: self.organization_id.clone(),
            name,
            phone,
            is_vip,
            tags: self.tags_for(&connection, contact_id)?,
            custom_fields,
        }))
    }

    pub fn upsert_conversation(&self, conversation: &Conversation) -> Result<(), CrmRepositoryError> {
        self.ensure_scope(&conversation.organization_id)?;
        if conversation.conversation_id.trim().is_empty() {
            return Err(CrmRepositoryError::MissingField {
                field: "conversation_id",
            });
        }
        self.connect()?
            .execute(
                "
                INSERT INTO conversations (organization_id, conversation_id, contact_id, assigned_agent_id)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(organization_id, conversation_id) DO UPDATE SET
                    contact_id=excluded.contact_id
                ",
                params![
                    self.organization_id,
                    conversation.conversation_id,
                    conversation.contact_id,
                    conversation.assigned_agent_id,
                ],
            )
            .map_err(|source| CrmRepositoryError::Sql { source })?;
        Ok(())
    }

    pub fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, CrmRepositoryError> {
        self.connect()?
            .query_row(
                "
                SELECT contact_id, assigned_agent_id FROM conversations
                WHERE organization_id = ?1 AND conversation_id = ?2
                ",
                params![self.organization_id, conversation_id],
                |row| {
                    Ok(Conversation {
                        conversation_id: conversation_id.to_string(),
                        organization_id: self.organization_id.clone(),
                        contact_id: row.get(0)?,
                        assigned_agent_id: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(|source| CrmRepositoryError::Sql { source })
    }

    /// Human handback: clears the assignment so automation may assign again.
    pub fn release_assignment(&self, conversation_id: &str) -> Result<(), CrmRepositoryError> {
        self.connect()?
            .execute(
                "
                UPDATE conversations SET assigned_agent_id = NULL, assigned_at = NULL
                WHERE organization_id = ?1 AND conversation_id = ?2
                ",
                params![self.organization_id, conversation_id],
            )
            .map_err(|source| CrmRepositoryError::Sql { source })?;
        Ok(())
    }

    pub fn save_template(&self, template: &ReplyTemplate) -> Result<(), CrmRepositoryError> {
        self.ensure_scope(&template.organization_id)?;
        if template.template_id.trim().is_empty() {
            return Err(CrmRepositoryError::MissingField {
                field: "template_id",
            });
        }
        if template.body.trim().is_empty() {
            return Err(CrmRepositoryError::MissingField { field: "body" });
        }
        self.connect()?
            .execute(
                "
                INSERT INTO reply_templates (organization_id, template_id, name, body)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(organization_id, template_id) DO UPDATE SET
                    name=excluded.name,
                    body=excluded.body
                ",
                params![
                    self.organization_id,
                    template.template_id,
                    template.name,
                    template.body
                ],
            )
            .map_err(|source| CrmRepositoryError::Sql { source })?;
        Ok(())
    }

    pub fn list_outgoing_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<OutgoingMessageRecord>, CrmRepositoryError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(
                "
                SELECT text, origin_json, attachments_json, provider_message_id, created_at
                FROM outgoing_messages
                WHERE organization_id = ?1 AND conversation_id = ?2
                ORDER BY id ASC
                ",
            )
            .map_err(|source| CrmRepositoryError::Sql { source })?;
        let rows = statement
            .query_map(params![self.organization_id, conversation_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(|source| CrmRepositoryError::Sql { source })?;

        let mut out = Vec::new();
        for row in rows {
            let (text, origin_json, attachments_json, provider_message_id, created_at) =
                row.map_err(|source| CrmRepositoryError::Sql { source })?;
            let corrupt = |field: &'static str, err: serde_json::Error| {
                CrmRepositoryError::CorruptRow {
                    field,
                    id: conversation_id.to_string(),
                    reason: err.to_string(),
                }
            };
            let origin: OutgoingOrigin =
                serde_json::from_str(&origin_json).map_err(|err| corrupt("origin", err))?;
            let attachments: Vec<String> = serde_json::from_str(&attachments_json)
                .map_err(|err| corrupt("attachments", err))?;
            out.push(OutgoingMessageRecord {
                organization_id: self.organization_id.clone(),
                conversation_id: conversation_id.to_string(),
                text,
                origin,
                attachments,
                provider_message_id,
                created_at,
            });
        }
        Ok(out)
    }

    fn tags_for(
        &self,
        connection: &Connection,
        contact_id: &str,
    ) -> Result<Vec<String>, CrmRepositoryError> {
        let mut statement = connection
            .prepare(
                "
                SELECT tag FROM contact_tags
                WHERE organization_id = ?1 AND contact_id = ?2
                ORDER BY applied_at ASC, tag_key ASC
                ",
            )
            .map_err(|source| CrmRepositoryError::Sql { source })?;
        let rows = statement
            .query_map(params![self.organization_id, contact_id], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|source| CrmRepositoryError::Sql { source })?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(row.map_err(|source| CrmRepositoryError::Sql { source })?);
        }
        Ok(tags)
    }

    fn ensure_scope(&self, organization_id: &str) -> Result<(), CrmRepositoryError> {
        if organization_id != self.organization_id {
            return Err(CrmRepositoryError::OrganizationScopeMismatch {
                expected: self.organization_id.clone(),
                actual: organization_id.to_string(),
            });
        }
        Ok(())
    }

    fn connect(&self) -> Result<Connection, CrmRepositoryError> {
        open_connection(&self.db_path).map_err(|source| CrmRepositoryError::Open {
            path: self.db_path.display().to_string(),
            source,
        })
    }
}

fn insert_tag(
    connection: &Connection,
    organization_id: &str,
    contact_id: &str,
    tag: &str,
    now: i64,
) -> Result<(), CrmRepositoryError> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(CrmRepositoryError::MissingField { field: "tag" });
    }
    connection
        .execute(
            "
            INSERT INTO contact_tags (organization_id, contact_id, tag_key, tag, applied_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(organization_id, contact_id, tag_key) DO NOTHING
            ",
            params![organization_id, contact_id, tag.to_lowercase(), tag, now],
        )
        .map_err(|source| CrmRepositoryError::Sql { source })?;
    Ok(())
}

impl ContactStore for CrmRepository {
    fn load_contact(
        &self,
        organization_id: &str,
        contact_id: &str,
    ) -> Result<Option<Contact>, PortError> {
        self.ensure_scope(organization_id)?;
        Ok(self.get_contact(contact_id)?)
    }

    fn load_conversation(
        &self,
        organization_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, PortError> {
        self.ensure_scope(organization_id)?;
        Ok(self.get_conversation(conversation_id)?)
    }

    fn apply_tag(
        &self,
        organization_id: &str,
        contact_id: &str,
        tag: &str,
        now: i64,
    ) -> Result<(), PortError> {
        self.ensure_scope(organization_id)?;
        let connection = self.connect()?;
        let known: Option<i64> = connection
            .query_row(
                "SELECT 1 FROM contacts WHERE organization_id = ?1 AND contact_id = ?2",
                params![self.organization_id, contact_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|source| CrmRepositoryError::Sql { source })?;
        if known.is_none() {
            return Err(PortError::NotFound {
                kind: "contact",
                id: contact_id.to_string(),
            });
        }
        insert_tag(&connection, &self.organization_id, contact_id, tag, now)?;
        Ok(())
    }

    fn contact_tags(
        &self,
        organization_id: &str,
        contact_id: &str,
    ) -> Result<Vec<String>, PortError> {
        self.ensure_scope(organization_id)?;
        let connection = self.connect()?;
        Ok(self.tags_for(&connection, contact_id)?)
    }

    fn assign_agent_if_unassigned(
        &self,
        organization_id: &str,
        conversation_id: &str,
        agent_id: &str,
        now: i64,
    ) -> Result<AssignmentOutcome, PortError> {
        self.ensure_scope(organization_id)?;
        let connection = self.connect()?;
        let updated = connection
            .execute(
                "
                UPDATE conversations SET assigned_agent_id = ?3, assigned_at = ?4
                WHERE organization_id = ?1 AND conversation_id = ?2
                  AND assigned_agent_id IS NULL
                ",
                params![self.organization_id, conversation_id, agent_id, now],
            )
            .map_err(|source| CrmRepositoryError::Sql { source })?;
        if updated == 1 {
            return Ok(AssignmentOutcome::Assigned);
        }

        let current: Option<Option<String>> = connection
            .query_row(
                "
                SELECT assigned_agent_id FROM conversations
                WHERE organization_id = ?1 AND conversation_id = ?2
                ",
                params![self.organization_id, conversation_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|source| CrmRepositoryError::Sql { source })?;
        match current {
            None => Err(PortError::NotFound {
                kind: "conversation",
                id: conversation_id.to_string(),
            }),
            Some(Some(existing)) if existing == agent_id => {
                Ok(AssignmentOutcome::AlreadyAssignedToSame)
            }
            Some(Some(existing)) => Ok(AssignmentOutcome::AlreadyAssigned { agent_id: existing }),
            Some(None) => Err(PortError::Store(format!(
                "conversation `{conversation_id}` assignment changed concurrently"
            ))),
        }
    }

    fn append_outgoing_message(&self, record: &OutgoingMessageRecord) -> Result<(), PortError> {
        self.ensure_scope(&record.organization_id)?;
        let origin_json = serde_json::to_string(&record.origin)
            .map_err(|err| PortError::Store(format!("origin does not encode: {err}")))?;
        let attachments_json = serde_json::to_string(&record.attachments)
            .map_err(|err| PortError::Store(format!("attachments do not encode: {err}")))?;
        self.connect()?
            .execute(
                "
                INSERT INTO outgoing_messages (
                    organization_id, conversation_id, text, origin_json,
                    attachments_json, provider_message_id, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
                params![
                    self.organization_id,
                    record.conversation_id,
                    record.text,
                    origin_json,
                    attachments_json,
                    record.provider_message_id,
                    record.created_at,
                ],
            )
            .map_err(|source| CrmRepositoryError::Sql { source })?;
        Ok(())
    }

    fn load_reply_template(
        &self,
        organization_id: &str,
        template_id: &str,
    ) -> Result<Option<ReplyTemplate>, PortError> {
        self.ensure_scope(organization_id)?;
        let template = self
            .connect()?
            .query_row(
                "
                SELECT name, body FROM reply_templates
                WHERE organization_id = ?1 AND template_id = ?2
                ",
                params![self.organization_id, template_id],
                |row| {
                    Ok(ReplyTemplate {
                        template_id: template_id.to_string(),
                        organization_id: self.organization_id.clone(),
                        name: row.get(0)?,
                        body: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(|source| CrmRepositoryError::Sql { source })?;
        Ok(template)
    }
}
