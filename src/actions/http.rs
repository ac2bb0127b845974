use super::ports::{MessageSender, OutboundMessage, PortError, SentMessage, WebhookClient};
use serde_json::{json, Value};
use std::time::Duration;

pub struct HttpWebhookClient {
    agent: ureq::Agent,
}

impl HttpWebhookClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl WebhookClient for HttpWebhookClient {
    fn post_json(&self, url: &str, payload: &Value) -> Result<u16, PortError> {
        match self.agent.post(url).send_json(payload.clone()) {
            Ok(response) => Ok(response.status()),
            Err(ureq::Error::Status(code, _)) => Err(PortError::Delivery(format!(
                "webhook {url} answered status {code}"
            ))),
            Err(err) => Err(PortError::Delivery(format!("webhook {url}: {err}"))),
        }
    }
}

/// Sends through the WhatsApp gateway's REST API
/// (`POST {base}/message/sendText/{instance}`, `.../sendMedia/...` per file).
pub struct HttpMessageSender {
    agent: ureq::Agent,
    api_base: String,
    instance: String,
    api_key: String,
}

impl HttpMessageSender {
    pub fn new(api_base: &str, instance: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            api_base: api_base.trim_end_matches('/').to_string(),
            instance: instance.to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn endpoint(&self, operation: &str) -> String {
        format!(
            "{}/message/{}/{}",
            self.api_base,
            operation,
            urlencoding::encode(&self.instance)
        )
    }

    fn post(&self, operation: &str, body: Value) -> Result<Value, PortError> {
        let url = self.endpoint(operation);
        let response = self
            .agent
            .post(&url)
            .set("apikey", &self.api_key)
            .send_json(body)
            .map_err(|err| match err {
                ureq::Error::Status(code, _) => {
                    PortError::Delivery(format!("gateway {operation} answered status {code}"))
                }
                other => PortError::Delivery(format!("gateway {operation}: {other}")),
            })?;
        response
            .into_json::<Value>()
            .map_err(|err| PortError::Delivery(format!("gateway {operation} response: {err}")))
    }
}

impl MessageSender for HttpMessageSender {
    /// The text is the delivery. Once it is accepted, a refused attachment is
    /// reported in `failed_attachments` rather than failing the whole send.
    fn send_message(&self, message: &OutboundMessage) -> Result<SentMessage, PortError> {
        let body = self.post(
            "sendText",
            json!({
                "number": message.recipient,
                "text": message.text,
            }),
        )?;

        let mut failed_attachments = Vec::new();
        for attachment in &message.attachments {
            let Some(location) = &attachment.location else {
                failed_attachments.push(attachment.source_id.clone());
                continue;
            };
            let sent = self.post(
                "sendMedia",
                json!({
                    "number": message.recipient,
                    "mediatype": "document",
                    "media": location,
                    "fileName": attachment.title,
                }),
            );
            if sent.is_err() {
                failed_attachments.push(attachment.source_id.clone());
            }
        }

        Ok(SentMessage {
            provider_message_id: body
                .pointer("/key/id")
                .and_then(Value::as_str)
                .map(str::to_string),
            failed_attachments,
        })
    }
}
