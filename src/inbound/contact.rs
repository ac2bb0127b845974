use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Contact {
    pub contact_id: String,
    pub organization_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub is_vip: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
}

impl Contact {
    pub fn new(organization_id: impl Into<String>, contact_id: impl Into<String>) -> Self {
        Self {
            contact_id: contact_id.into(),
            organization_id: organization_id.into(),
            name: None,
            phone: None,
            is_vip: false,
            tags: Vec::new(),
            custom_fields: Map::new(),
        }
    }

    /// JSON view used for attribute conditions and reply templates.
    pub fn attribute_document(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub organization_id: String,
    pub contact_id: String,
    #[serde(default)]
    pub assigned_agent_id: Option<String>,
}

impl Conversation {
    pub fn new(
        organization_id: impl Into<String>,
        conversation_id: impl Into<String>,
        contact_id: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            organization_id: organization_id.into(),
            contact_id: contact_id.into(),
            assigned_agent_id: None,
        }
    }
}
