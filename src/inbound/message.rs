use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intent label produced by the upstream classifier.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedIntent {
    pub name: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentReading {
    pub label: Sentiment,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

/// Message as delivered by the ingestion layer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub message_id: String,
    pub organization_id: String,
    pub conversation_id: String,
    pub contact_id: String,
    pub text: String,
    pub timestamp: i64,
    #[serde(default)]
    pub detected_intents: Vec<DetectedIntent>,
    #[serde(default)]
    pub sentiment: Option<SentimentReading>,
    #[serde(default)]
    pub channel_metadata: Map<String, Value>,
}

/// Inbound message with a matching-ready copy of its text.
///
/// `text` keeps the original for display and templating, `match_text` is
/// trimmed and lowercased.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    pub message_id: String,
    pub organization_id: String,
    pub conversation_id: String,
    pub contact_id: String,
    pub text: String,
    pub match_text: String,
    pub timestamp: i64,
    pub detected_intents: Vec<DetectedIntent>,
    pub sentiment: Option<SentimentReading>,
}

impl NormalizedMessage {
    pub fn from_inbound(message: &InboundMessage) -> Self {
        let trimmed = message.text.trim();
        Self {
            message_id: message.message_id.clone(),
            organization_id: message.organization_id.clone(),
            conversation_id: message.conversation_id.clone(),
            contact_id: message.contact_id.clone(),
            text: trimmed.to_string(),
            match_text: trimmed.to_lowercase(),
            timestamp: message.timestamp,
            detected_intents: message.detected_intents.clone(),
            sentiment: message.sentiment,
        }
    }

    pub fn intent_confidence(&self, name: &str) -> Option<f32> {
        self.detected_intents
            .iter()
            .filter(|intent| intent.name.trim().eq_ignore_ascii_case(name.trim()))
            .map(|intent| intent.confidence)
            .fold(None, |best, value| match best {
                Some(current) if current >= value => Some(current),
                _ => Some(value),
            })
    }
}
