use super::domain::{
    parse_clock_time, parse_timezone, AttributeOperator, Condition, ConditionKind,
    KeywordOperator, Weekday,
};
use crate::inbound::{Contact, NormalizedMessage, Sentiment};
use chrono::{TimeZone, Timelike};
use regex::RegexBuilder;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatchError {
    #[error("unrecognized condition type `{raw_type}`")]
    UnrecognizedType { raw_type: String },
    #[error("malformed {kind} condition: {reason}")]
    MalformedValue { kind: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionResult {
    pub kind: ConditionKind,
    pub matched: bool,
    pub matched_value: Option<String>,
    pub score: Option<f32>,
    pub error: Option<MatchError>,
}

impl ConditionResult {
    fn hit(kind: ConditionKind, matched_value: impl Into<String>, score: f32) -> Self {
        Self {
            kind,
            matched: true,
            matched_value: Some(matched_value.into()),
            score: Some(score.clamp(0.0, 1.0)),
            error: None,
        }
    }

    fn miss(kind: ConditionKind) -> Self {
        Self {
            kind,
            matched: false,
            matched_value: None,
            score: None,
            error: None,
        }
    }

    fn failed(kind: ConditionKind, error: MatchError) -> Self {
        Self {
            kind,
            matched: false,
            matched_value: None,
            score: None,
            error: Some(error),
        }
    }
}

/// Evaluates one condition. Total over every condition kind: problems with the
/// condition itself come back as a non-match carrying a `MatchError`.
pub fn match_condition(
    condition: &Condition,
    message: &NormalizedMessage,
    contact: &Contact,
) -> ConditionResult {
    let kind = condition.kind();
    let outcome = match condition {
        Condition::Keyword { operator, values } => match_keyword(*operator, values, message),
        Condition::Intent {
            intents,
            min_confidence,
        } => Ok(match_intent(intents, min_confidence.unwrap_or(0.0), message)),
        Condition::Sentiment { equals } => Ok(match_sentiment(*equals, message)),
        Condition::ContactAttribute {
            path,
            operator,
            value,
            min,
            max,
        } => match_attribute(contact, path, *operator, value.as_ref(), *min, *max),
        Condition::TimeWindow {
            timezone,
            days,
            start,
            end,
        } => match_time_window(message.timestamp, timezone, days, start, end),
        Condition::Unrecognized { raw_type } => Err(MatchError::UnrecognizedType {
            raw_type: raw_type.clone(),
        }),
    };

    match outcome {
        Ok(Some((matched_value, score))) => ConditionResult::hit(kind, matched_value, score),
        Ok(None) => ConditionResult::miss(kind),
        Err(error) => ConditionResult::failed(kind, error),
    }
}

type Hit = Option<(String, f32)>;

fn malformed(kind: ConditionKind, reason: impl Into<String>) -> MatchError {
    MatchError::MalformedValue {
        kind: kind.as_str(),
        reason: reason.into(),
    }
}

fn match_keyword(
    operator: KeywordOperator,
    values: &[String],
    message: &NormalizedMessage,
) -> Result<Hit, MatchError> {
    for value in values {
        let needle = value.trim().to_lowercase();
        if needle.is_empty() {
            continue;
        }
        match operator {
            KeywordOperator::Contains => {
                if message.match_text.contains(&needle) {
                    return Ok(Some((needle, 1.0)));
                }
            }
            KeywordOperator::Equals => {
                if message.match_text == needle {
                    return Ok(Some((needle, 1.0)));
                }
            }
            KeywordOperator::Regex => {
                let pattern = RegexBuilder::new(value.trim())
                    .case_insensitive(true)
                    .build()
                    .map_err(|err| {
                        malformed(
                            ConditionKind::Keyword,
                            format!("invalid regex `{value}`: {err}"),
                        )
                    })?;
                if let Some(found) = pattern.find(&message.text) {
                    return Ok(Some((found.as_str().to_lowercase(), 1.0)));
                }
            }
        }
    }
    Ok(None)
}

fn match_intent(intents: &[String], min_confidence: f32, message: &NormalizedMessage) -> Hit {
    intents
        .iter()
        .filter_map(|target| {
            message
                .intent_confidence(target)
                .filter(|confidence| *confidence >= min_confidence)
                .map(|confidence| (target.trim().to_lowercase(), confidence))
        })
        .fold(None, |best: Hit, candidate| match best {
            Some(current) if current.1 >= candidate.1 => Some(current),
            _ => Some(candidate),
        })
}

fn match_sentiment(expected: Sentiment, message: &NormalizedMessage) -> Hit {
    let reading = message.sentiment?;
    if reading.label != expected {
        return None;
    }
    Some((reading.label.to_string(), reading.confidence))
}

fn match_attribute(
    contact: &Contact,
    path: &str,
    operator: AttributeOperator,
    expected: Option<&Value>,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Hit, MatchError> {
    let kind = ConditionKind::ContactAttribute;
    let document = contact.attribute_document();
    let relative = path.strip_prefix("contact.").unwrap_or(path);
    let found = resolve_attribute_path(&document, relative).filter(|value| !value.is_null());

    let matched = match operator {
        AttributeOperator::Exists => found.is_some(),
        AttributeOperator::Equals => {
            let expected =
                expected.ok_or_else(|| malformed(kind, "equals requires `value`"))?;
            found.is_some_and(|actual| values_equal(actual, expected))
        }
        AttributeOperator::Contains => {
            let expected =
                expected.ok_or_else(|| malformed(kind, "contains requires `value`"))?;
            found.is_some_and(|actual| value_contains(actual, expected))
        }
        AttributeOperator::GreaterThan => {
            let threshold = expected
                .and_then(Value::as_f64)
                .ok_or_else(|| malformed(kind, "greater_than requires a numeric `value`"))?;
            found
                .and_then(numeric_value)
                .is_some_and(|actual| actual > threshold)
        }
        AttributeOperator::InRange => {
            let (Some(min), Some(max)) = (min, max) else {
                return Err(malformed(kind, "in_range requires `min` and `max`"));
            };
            found
                .and_then(numeric_value)
                .is_some_and(|actual| (min..=max).contains(&actual))
        }
    };

    if !matched {
        return Ok(None);
    }
    let rendered = found.map(render_value).unwrap_or_default();
    Ok(Some((format!("{path}={rendered}"), 1.0)))
}

/// Dotted-path lookup over a JSON document. Segments that miss are retried in
/// snake_case so `isVip` and `is_vip` address the same field.
pub fn resolve_attribute_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for segment in path.split('.') {
        let object = current.as_object()?;
        current = match object.get(segment) {
            Some(value) => value,
            None => object.get(&camel_to_snake(segment))?,
        };
    }
    Some(current)
}

fn camel_to_snake(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len() + 4);
    for ch in segment.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            match (numeric_value(actual), numeric_value(expected)) {
                (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
                _ => false,
            }
        }
        (Value::Bool(a), Value::String(b)) | (Value::String(b), Value::Bool(a)) => {
            b.trim().eq_ignore_ascii_case(if *a { "true" } else { "false" })
        }
        _ => actual == expected,
    }
}

fn value_contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        Value::String(text) => match expected {
            Value::String(needle) => text.to_lowercase().contains(&needle.trim().to_lowercase()),
            other => text.contains(&render_value(other)),
        },
        Value::Object(map) => expected
            .as_str()
            .is_some_and(|key| map.contains_key(key.trim())),
        _ => false,
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn match_time_window(
    timestamp: i64,
    timezone: &str,
    days: &[Weekday],
    start: &str,
    end: &str,
) -> Result<Hit, MatchError> {
    let kind = ConditionKind::TimeWindow;
    let tz = parse_timezone(timezone).map_err(|reason| malformed(kind, reason))?;
    let start = parse_clock_time(start).map_err(|reason| malformed(kind, reason))?;
    let end = parse_clock_time(end).map_err(|reason| malformed(kind, reason))?;
    let local = tz
        .timestamp_opt(timestamp, 0)
        .single()
        .ok_or_else(|| malformed(kind, format!("timestamp {timestamp} is out of range")))?;

    let weekday = Weekday::from_chrono(chrono::Datelike::weekday(&local));
    if !days.is_empty() && !days.contains(&weekday) {
        return Ok(None);
    }

    let time = local.time();
    let within = if start < end {
        start <= time && time < end
    } else {
        time >= start || time < end
    };
    if !within {
        return Ok(None);
    }
    Ok(Some((
        format!("{:?} {:02}:{:02}", weekday, time.hour(), time.minute()).to_lowercase(),
        1.0,
    )))
}
