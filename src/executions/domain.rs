use crate::actions::ActionRunReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Matched,
    NoMatch,
}

impl ExecutionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::NoMatch => "no_match",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "matched" => Some(Self::Matched),
            "no_match" => Some(Self::NoMatch),
            _ => None,
        }
    }
}

/// One automation pass over an inbound message. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub organization_id: String,
    #[serde(default)]
    pub rule_id: Option<String>,
    #[serde(default)]
    pub rule_name: Option<String>,
    #[serde(default)]
    pub matched_rule_ids: Vec<String>,
    pub conversation_id: String,
    pub contact_id: String,
    pub message_id: String,
    pub outcome: ExecutionOutcome,
    pub success: bool,
    #[serde(default)]
    pub detected_intentions: BTreeSet<String>,
    #[serde(default)]
    pub matched_keywords: Vec<String>,
    pub confidence_score: f32,
    #[serde(default)]
    pub action_reports: Vec<ActionRunReport>,
    pub execution_time_ms: u64,
    pub created_at: i64,
}

impl ExecutionRecord {
    pub fn is_matched(&self) -> bool {
        self.outcome == ExecutionOutcome::Matched
    }
}
