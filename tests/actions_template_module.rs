use comodin_automation::actions::{render_reply_template, TemplateError};
use comodin_automation::inbound::{Contact, Conversation, InboundMessage, NormalizedMessage};
use serde_json::{json, Map};

fn fixtures() -> (Contact, Conversation, NormalizedMessage) {
    let mut contact = Contact::new("org-acme", "c1");
    contact.name = Some("Lucía".to_string());
    contact.tags = vec!["vip".to_string(), "mayoreo".to_string()];
    contact
        .custom_fields
        .insert("plan".to_string(), json!("oro"));
    let conversation = Conversation::new("org-acme", "conv-9", "c1");
    let message = NormalizedMessage::from_inbound(&InboundMessage {
        message_id: "m1".to_string(),
        organization_id: "org-acme".to_string(),
        conversation_id: "conv-9".to_string(),
        contact_id: "c1".to_string(),
        text: " ¿Dónde está mi pedido? ".to_string(),
        timestamp: 0,
        detected_intents: Vec::new(),
        sentiment: None,
        channel_metadata: Map::new(),
    });
    (contact, conversation, message)
}

#[test]
fn renders_contact_message_conversation_and_rule_placeholders() {
    let (contact, conversation, message) = fixtures();
    let rendered = render_reply_template(
        "Hola {{ contact.name }} (plan {{contact.custom_fields.plan}}, {{contact.tags}}). \
         Sobre \"{{message.text}}\" en {{conversation.id}} via {{rule.name}}",
        &contact,
        &conversation,
        &message,
        "Pedidos",
    )
    .expect("render");
    assert_eq!(
        rendered,
        "Hola Lucía (plan oro, vip, mayoreo). Sobre \"¿Dónde está mi pedido?\" en conv-9 via Pedidos"
    );
}

#[test]
fn missing_leaf_renders_empty_and_unknown_root_is_rejected() {
    let (contact, conversation, message) = fixtures();
    let rendered = render_reply_template(
        "[{{contact.custom_fields.missing}}]",
        &contact,
        &conversation,
        &message,
        "r",
    )
    .expect("render");
    assert_eq!(rendered, "[]");

    let err = render_reply_template("{{secrets.token}}", &contact, &conversation, &message, "r")
        .expect_err("unknown root");
    assert!(matches!(err, TemplateError::UnknownPlaceholder(_)));

    let err = render_reply_template("Hola {{contact.name", &contact, &conversation, &message, "r")
        .expect_err("unclosed");
    assert!(matches!(err, TemplateError::UnclosedPlaceholder));
}
