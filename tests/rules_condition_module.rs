use comodin_automation::inbound::{
    Contact, DetectedIntent, InboundMessage, NormalizedMessage, Sentiment, SentimentReading,
};
use comodin_automation::rules::domain::{AttributeOperator, Weekday};
use comodin_automation::rules::{
    match_condition, Condition, ConditionKind, KeywordOperator, MatchError,
};
use serde_json::{json, Map};

fn message(text: &str, timestamp: i64) -> NormalizedMessage {
    NormalizedMessage::from_inbound(&InboundMessage {
        message_id: "m1".to_string(),
        organization_id: "org-acme".to_string(),
        conversation_id: "conv-1".to_string(),
        contact_id: "c1".to_string(),
        text: text.to_string(),
        timestamp,
        detected_intents: vec![
            DetectedIntent {
                name: "Refund".to_string(),
                confidence: 0.7,
            },
            DetectedIntent {
                name: "greeting".to_string(),
                confidence: 0.3,
            },
        ],
        sentiment: Some(SentimentReading {
            label: Sentiment::Negative,
            confidence: 0.9,
        }),
        channel_metadata: Map::new(),
    })
}

fn contact() -> Contact {
    let mut contact = Contact::new("org-acme", "c1");
    contact.is_vip = true;
    contact.tags = vec!["Wholesale".to_string()];
    contact
        .custom_fields
        .insert("plan".to_string(), json!("gold"));
    contact
        .custom_fields
        .insert("lifetime_value".to_string(), json!(1250));
    contact
}

// Wednesday 2024-05-15 15:00:00 UTC
const WED_15_UTC: i64 = 1_715_785_200;

#[test]
fn keyword_contains_is_case_insensitive_and_reports_first_hit() {
    let result = match_condition(
        &Condition::keyword_contains(&["devolución", "URGENTE"]),
        &message("  Necesito ayuda Urgente ", WED_15_UTC),
        &contact(),
    );
    assert!(result.matched);
    assert_eq!(result.matched_value.as_deref(), Some("urgente"));
    assert_eq!(result.score, Some(1.0));
    assert!(result.error.is_none());
}

#[test]
fn keyword_equals_requires_the_whole_normalized_text() {
    let condition = Condition::Keyword {
        operator: KeywordOperator::Equals,
        values: vec!["hola".to_string()],
    };
    assert!(match_condition(&condition, &message(" HOLA ", WED_15_UTC), &contact()).matched);
    assert!(!match_condition(&condition, &message("hola amigo", WED_15_UTC), &contact()).matched);
}

#[test]
fn keyword_regex_matches_and_invalid_pattern_is_a_logged_non_match() {
    let condition = Condition::Keyword {
        operator: KeywordOperator::Regex,
        values: vec![r"pedido\s+#?\d+".to_string()],
    };
    let hit = match_condition(&condition, &message("Mi PEDIDO #4411 no llegó", WED_15_UTC), &contact());
    assert!(hit.matched);
    assert_eq!(hit.matched_value.as_deref(), Some("pedido #4411"));

    let broken = Condition::Keyword {
        operator: KeywordOperator::Regex,
        values: vec!["(unclosed".to_string()],
    };
    let miss = match_condition(&broken, &message("(unclosed", WED_15_UTC), &contact());
    assert!(!miss.matched);
    assert!(matches!(
        miss.error,
        Some(MatchError::MalformedValue { kind: "keyword", .. })
    ));
}

#[test]
fn intent_honors_min_confidence_and_is_case_insensitive() {
    let strict = Condition::Intent {
        intents: vec!["refund".to_string()],
        min_confidence: Some(0.8),
    };
    assert!(!match_condition(&strict, &message("x", WED_15_UTC), &contact()).matched);

    let relaxed = Condition::Intent {
        intents: vec!["refund".to_string(), "greeting".to_string()],
        min_confidence: Some(0.5),
    };
    let result = match_condition(&relaxed, &message("x", WED_15_UTC), &contact());
    assert!(result.matched);
    assert_eq!(result.matched_value.as_deref(), Some("refund"));
    assert_eq!(result.score, Some(0.7));
}

#[test]
fn sentiment_matches_label_and_missing_sentiment_never_matches() {
    let condition = Condition::Sentiment {
        equals: Sentiment::Negative,
    };
    let result = match_condition(&condition, &message("x", WED_15_UTC), &contact());
    assert!(result.matched);
    assert_eq!(result.score, Some(0.9));

    let mut without = message("x", WED_15_UTC);
    without.sentiment = None;
    let result = match_condition(&condition, &without, &contact());
    assert!(!result.matched);
    assert!(result.error.is_none());
}

#[test]
fn contact_attribute_operators_cover_flags_tags_and_custom_fields() {
    let msg = message("x", WED_15_UTC);
    let contact = contact();

    assert!(match_condition(&Condition::attribute_equals("contact.isVip", json!(true)), &msg, &contact).matched);
    assert!(match_condition(&Condition::attribute_equals("custom_fields.plan", json!("GOLD")), &msg, &contact).matched);

    let tag = Condition::ContactAttribute {
        path: "tags".to_string(),
        operator: AttributeOperator::Contains,
        value: Some(json!("wholesale")),
        min: None,
        max: None,
    };
    assert!(match_condition(&tag, &msg, &contact).matched);

    let range = Condition::ContactAttribute {
        path: "customFields.lifetimeValue".to_string(),
        operator: AttributeOperator::InRange,
        value: None,
        min: Some(1000.0),
        max: Some(2000.0),
    };
    let result = match_condition(&range, &msg, &contact);
    assert!(result.matched);
    assert_eq!(
        result.matched_value.as_deref(),
        Some("customFields.lifetimeValue=1250")
    );

    let exists = Condition::ContactAttribute {
        path: "phone".to_string(),
        operator: AttributeOperator::Exists,
        value: None,
        min: None,
        max: None,
    };
    assert!(!match_condition(&exists, &msg, &contact).matched);
}

#[test]
fn contact_attribute_type_mismatch_is_reported_not_raised() {
    let condition = Condition::ContactAttribute {
        path: "custom_fields.lifetime_value".to_string(),
        operator: AttributeOperator::GreaterThan,
        value: Some(json!("lots")),
        min: None,
        max: None,
    };
    let result = match_condition(&condition, &message("x", WED_15_UTC), &contact());
    assert!(!result.matched);
    assert!(result.error.is_some());
}

#[test]
fn time_window_converts_timezone_and_wraps_past_midnight() {
    // 15:00 UTC is 09:00 in Mexico City (UTC-6, no DST since 2023).
    let business_hours = Condition::TimeWindow {
        timezone: "America/Mexico_City".to_string(),
        days: vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
        start: "09:00".to_string(),
        end: "18:00".to_string(),
    };
    let result = match_condition(&business_hours, &message("x", WED_15_UTC), &contact());
    assert!(result.matched);
    assert_eq!(result.matched_value.as_deref(), Some("wed 09:00"));

    let overnight = Condition::TimeWindow {
        timezone: "UTC".to_string(),
        days: Vec::new(),
        start: "22:00".to_string(),
        end: "06:00".to_string(),
    };
    assert!(!match_condition(&overnight, &message("x", WED_15_UTC), &contact()).matched);
    // 2024-05-15 23:30 UTC
    assert!(match_condition(&overnight, &message("x", 1_715_815_800), &contact()).matched);
    // 2024-05-16 05:59 UTC
    assert!(match_condition(&overnight, &message("x", 1_715_839_140), &contact()).matched);

    let weekend_only = Condition::TimeWindow {
        timezone: "UTC".to_string(),
        days: vec![Weekday::Sat, Weekday::Sun],
        start: "00:00".to_string(),
        end: "23:59".to_string(),
    };
    assert!(!match_condition(&weekend_only, &message("x", WED_15_UTC), &contact()).matched);
}

#[test]
fn time_window_with_unknown_timezone_fails_closed() {
    let condition = Condition::TimeWindow {
        timezone: "Mars/Olympus".to_string(),
        days: Vec::new(),
        start: "00:00".to_string(),
        end: "23:00".to_string(),
    };
    let result = match_condition(&condition, &message("x", WED_15_UTC), &contact());
    assert!(!result.matched);
    assert!(result.error.is_some());
}

#[test]
fn unrecognized_condition_is_a_non_match_with_error() {
    let result = match_condition(
        &Condition::Unrecognized {
            raw_type: "weather".to_string(),
        },
        &message("x", WED_15_UTC),
        &contact(),
    );
    assert_eq!(result.kind, ConditionKind::Unrecognized);
    assert!(!result.matched);
    assert_eq!(
        result.error,
        Some(MatchError::UnrecognizedType {
            raw_type: "weather".to_string()
        })
    );
}
