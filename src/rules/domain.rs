use crate::inbound::Sentiment;
use crate::shared::ids::validate_identifier_value;
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RuleValidationError {
    #[error("invalid rule id: {0}")]
    InvalidRuleId(String),
    #[error("required field `{field}` must be non-empty")]
    MissingField { field: &'static str },
    #[error("condition {position} ({kind}) is invalid: {reason}")]
    InvalidCondition {
        position: usize,
        kind: &'static str,
        reason: String,
    },
    #[error("condition {position} has unrecognized type `{raw_type}`")]
    UnrecognizedCondition { position: usize, raw_type: String },
    #[error("action {position} ({kind}) is invalid: {reason}")]
    InvalidAction {
        position: usize,
        kind: &'static str,
        reason: String,
    },
    #[error("action {position} has unrecognized type `{raw_type}`")]
    UnrecognizedAction { position: usize, raw_type: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    #[default]
    #[serde(alias = "and")]
    All,
    #[serde(alias = "or")]
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordOperator {
    Contains,
    Equals,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeOperator {
    Equals,
    Contains,
    GreaterThan,
    InRange,
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    pub fn from_chrono(value: chrono::Weekday) -> Self {
        match value {
            chrono::Weekday::Mon => Self::Mon,
            chrono::Weekday::Tue => Self::Tue,
            chrono::Weekday::Wed => Self::Wed,
            chrono::Weekday::Thu => Self::Thu,
            chrono::Weekday::Fri => Self::Fri,
            chrono::Weekday::Sat => Self::Sat,
            chrono::Weekday::Sun => Self::Sun,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionKind {
    Keyword,
    Intent,
    Sentiment,
    ContactAttribute,
    TimeWindow,
    Unrecognized,
}

impl ConditionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Intent => "intent",
            Self::Sentiment => "sentiment",
            Self::ContactAttribute => "contact_attribute",
            Self::TimeWindow => "time_window",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// A single predicate over the inbound message or its contact.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Keyword {
        operator: KeywordOperator,
        values: Vec<String>,
    },
    Intent {
        intents: Vec<String>,
        #[serde(default)]
        min_confidence: Option<f32>,
    },
    Sentiment {
        equals: Sentiment,
    },
    ContactAttribute {
        path: String,
        operator: AttributeOperator,
        #[serde(default)]
        value: Option<Value>,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    TimeWindow {
        timezone: String,
        #[serde(default)]
        days: Vec<Weekday>,
        start: String,
        end: String,
    },
    /// Stored payload that no longer decodes into a known kind.
    Unrecognized {
        raw_type: String,
    },
}

impl Condition {
    pub fn kind(&self) -> ConditionKind {
        match self {
            Self::Keyword { .. } => ConditionKind::Keyword,
            Self::Intent { .. } => ConditionKind::Intent,
            Self::Sentiment { .. } => ConditionKind::Sentiment,
            Self::ContactAttribute { .. } => ConditionKind::ContactAttribute,
            Self::TimeWindow { .. } => ConditionKind::TimeWindow,
            Self::Unrecognized { .. } => ConditionKind::Unrecognized,
        }
    }

    pub fn keyword_contains(values: &[&str]) -> Self {
        Self::Keyword {
            operator: KeywordOperator::Contains,
            values: values.iter().map(|value| value.to_string()).collect(),
        }
    }

    pub fn attribute_equals(path: &str, value: Value) -> Self {
        Self::ContactAttribute {
            path: path.to_string(),
            operator: AttributeOperator::Equals,
            value: Some(value),
            min: None,
            max: None,
        }
    }

    pub fn validate(&self, position: usize) -> Result<(), RuleValidationError> {
        let kind = self.kind().as_str();
        let invalid = |reason: String| RuleValidationError::InvalidCondition {
            position,
            kind,
            reason,
        };
        match self {
            Self::Keyword { operator, values } => {
                if values.is_empty() {
                    return Err(invalid("at least one value is required".to_string()));
                }
                for value in values {
                    if value.trim().is_empty() {
                        return Err(invalid("values must be non-empty".to_string()));
                    }
                    if *operator == KeywordOperator::Regex {
                        regex::Regex::new(value)
                            .map_err(|err| invalid(format!("invalid regex `{value}`: {err}")))?;
                    }
                }
            }
            Self::Intent {
                intents,
                min_confidence,
            } => {
                if intents.is_empty() || intents.iter().any(|intent| intent.trim().is_empty()) {
                    return Err(invalid("intents must be a non-empty list".to_string()));
                }
                if let Some(min) = min_confidence {
                    if !(0.0..=1.0).contains(min) {
                        return Err(invalid(format!(
                            "min_confidence must be in range 0.0..=1.0; got {min}"
                        )));
                    }
                }
            }
            Self::Sentiment { .. } => {}
            Self::ContactAttribute {
                path,
                operator,
                value,
                min,
                max,
            } => {
                if path.trim().is_empty() || path.split('.').any(|segment| segment.is_empty()) {
                    return Err(invalid(format!("attribute path `{path}` is malformed")));
                }
                match operator {
                    AttributeOperator::Equals | AttributeOperator::Contains => {
                        if value.is_none() {
                            return Err(invalid("operator requires `value`".to_string()));
                        }
                    }
                    AttributeOperator::GreaterThan => {
                        if !value.as_ref().is_some_and(Value::is_number) {
                            return Err(invalid(
                                "greater_than requires a numeric `value`".to_string(),
                            ));
                        }
                    }
                    AttributeOperator::InRange => match (min, max) {
                        (Some(min), Some(max)) if min <= max => {}
                        (Some(_), Some(_)) => {
                            return Err(invalid("in_range requires min <= max".to_string()))
                        }
                        _ => return Err(invalid("in_range requires `min` and `max`".to_string())),
                    },
                    AttributeOperator::Exists => {}
                }
            }
            Self::TimeWindow {
                timezone,
                start,
                end,
                ..
            } => {
                parse_timezone(timezone).map_err(invalid)?;
                let start = parse_clock_time(start).map_err(invalid)?;
                let end = parse_clock_time(end).map_err(invalid)?;
                if start == end {
                    return Err(invalid("start and end must differ".to_string()));
                }
            }
            Self::Unrecognized { raw_type } => {
                return Err(RuleValidationError::UnrecognizedCondition {
                    position,
                    raw_type: raw_type.clone(),
                });
            }
        }
        Ok(())
    }
}

pub fn parse_timezone(raw: &str) -> Result<Tz, String> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|_| format!("unknown timezone `{raw}`"))
}

pub fn parse_clock_time(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| format!("time `{raw}` must use HH:MM"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ApplyTag,
    AssignAgent,
    SendReply,
    CallWebhook,
    Unrecognized,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApplyTag => "apply_tag",
            Self::AssignAgent => "assign_agent",
            Self::SendReply => "send_reply",
            Self::CallWebhook => "call_webhook",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side effect triggered by a matched rule. Vector position is execution order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    ApplyTag {
        tag: String,
    },
    AssignAgent {
        agent_id: String,
    },
    SendReply {
        template_id: String,
        #[serde(default = "default_true")]
        idempotent: bool,
    },
    CallWebhook {
        url: String,
        #[serde(default = "default_true")]
        include_tags: bool,
    },
    /// Stored action whose type this build no longer knows.
    Unrecognized {
        raw_type: String,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::ApplyTag { .. } => ActionKind::ApplyTag,
            Self::AssignAgent { .. } => ActionKind::AssignAgent,
            Self::SendReply { .. } => ActionKind::SendReply,
            Self::CallWebhook { .. } => ActionKind::CallWebhook,
            Self::Unrecognized { .. } => ActionKind::Unrecognized,
        }
    }

    pub fn validate(&self, position: usize) -> Result<(), RuleValidationError> {
        let kind = self.kind().as_str();
        let invalid = |reason: &str| RuleValidationError::InvalidAction {
            position,
            kind,
            reason: reason.to_string(),
        };
        match self {
            Self::ApplyTag { tag } => {
                if tag.trim().is_empty() {
                    return Err(invalid("tag must be non-empty"));
                }
            }
            Self::AssignAgent { agent_id } => {
                if agent_id.trim().is_empty() {
                    return Err(invalid("agent_id must be non-empty"));
                }
            }
            Self::SendReply { template_id, .. } => {
                if template_id.trim().is_empty() {
                    return Err(invalid("template_id must be non-empty"));
                }
            }
            Self::CallWebhook { url, .. } => {
                let trimmed = url.trim();
                let rest = trimmed
                    .strip_prefix("https://")
                    .or_else(|| trimmed.strip_prefix("http://"));
                if !rest.is_some_and(|host| !host.is_empty() && !host.starts_with('/')) {
                    return Err(invalid("url must be an absolute http(s) url"));
                }
            }
            Self::Unrecognized { raw_type } => {
                return Err(RuleValidationError::UnrecognizedAction {
                    position,
                    raw_type: raw_type.clone(),
                });
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AutomationRule {
    pub rule_id: String,
    pub organization_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub priority: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Exclusive rules stop first-match evaluation once they match.
    #[serde(default = "default_true")]
    pub exclusive: bool,
    #[serde(default)]
    pub combinator: Combinator,
    #[serde(default)]
    pub halt_on_action_failure: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub created_at: i64,
    /// Per-organization save order; breaks priority ties.
    #[serde(default)]
    pub creation_seq: i64,
}

impl AutomationRule {
    pub fn new(
        organization_id: impl Into<String>,
        rule_id: impl Into<String>,
        name: impl Into<String>,
        priority: i64,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            organization_id: organization_id.into(),
            name: name.into(),
            description: String::new(),
            priority,
            is_active: true,
            exclusive: true,
            combinator: Combinator::All,
            halt_on_action_failure: false,
            conditions: Vec::new(),
            actions: Vec::new(),
            created_at: 0,
            creation_seq: 0,
        }
    }

    pub fn with_combinator(mut self, combinator: Combinator) -> Self {
        self.combinator = combinator;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Save-time validation; evaluation never sees a rule that failed this.
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        validate_identifier_value("rule id", &self.rule_id)
            .map_err(RuleValidationError::InvalidRuleId)?;
        if self.organization_id.trim().is_empty() {
            return Err(RuleValidationError::MissingField {
                field: "organization_id",
            });
        }
        if self.name.trim().is_empty() {
            return Err(RuleValidationError::MissingField { field: "name" });
        }
        for (position, condition) in self.conditions.iter().enumerate() {
            condition.validate(position)?;
        }
        for (position, action) in self.actions.iter().enumerate() {
            action.validate(position)?;
        }
        Ok(())
    }
}
