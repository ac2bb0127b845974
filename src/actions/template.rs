use crate::inbound::{Contact, Conversation, NormalizedMessage};
use crate::rules::condition::resolve_attribute_path;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unclosed placeholder in template")]
    UnclosedPlaceholder,
    #[error("empty placeholder in template")]
    EmptyPlaceholder,
    #[error("unknown placeholder `{0}`")]
    UnknownPlaceholder(String),
}

/// Renders `{{contact.*}}`, `{{message.text}}`, `{{conversation.id}}` and
/// `{{rule.name}}` placeholders. Known roots with a missing leaf render empty.
pub fn render_reply_template(
    template: &str,
    contact: &Contact,
    conversation: &Conversation,
    message: &NormalizedMessage,
    rule_name: &str,
) -> Result<String, TemplateError> {
    let document = json!({
        "contact": contact.attribute_document(),
        "message": { "text": message.text, "id": message.message_id },
        "conversation": {
            "id": conversation.conversation_id,
            "assigned_agent_id": conversation.assigned_agent_id,
        },
        "rule": { "name": rule_name },
    });

    render_placeholders(template, |token| {
        let root = token.split('.').next().unwrap_or_default();
        if !matches!(root, "contact" | "message" | "conversation" | "rule") || root == token {
            return Err(TemplateError::UnknownPlaceholder(token.to_string()));
        }
        Ok(match resolve_attribute_path(&document, token) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
            Some(other) => other.to_string(),
        })
    })
}

fn render_placeholders<F>(template: &str, mut resolve: F) -> Result<String, TemplateError>
where
    F: FnMut(&str) -> Result<String, TemplateError>,
{
    let mut rendered = String::new();
    let mut cursor = template;

    while let Some(start) = cursor.find("{{") {
        rendered.push_str(&cursor[..start]);
        let after_open = &cursor[start + 2..];
        let Some(close_offset) = after_open.find("}}") else {
            return Err(TemplateError::UnclosedPlaceholder);
        };
        let token = after_open[..close_offset].trim();
        if token.is_empty() {
            return Err(TemplateError::EmptyPlaceholder);
        }
        rendered.push_str(&resolve(token)?);
        cursor = &after_open[close_offset + 2..];
    }

    rendered.push_str(cursor);
    Ok(rendered)
}
