mod support;

use comodin_automation::actions::{
    ActionDispatcher, ActionStatus, ClaimOutcome, ContactStore, DeliveryLedger, DispatchContext,
    ReplyTemplate,
};
use comodin_automation::actions::ledger::compute_action_correlation_key;
use comodin_automation::inbound::NormalizedMessage;
use comodin_automation::rules::{Action, ActionKind, AutomationRule, Condition};
use support::{inbound, Harness, RecordingSender, RecordingWebhooks, StuckLedger, ORG};

fn save_greeting(harness: &Harness) {
    harness
        .crm
        .save_template(&ReplyTemplate {
            template_id: "greeting".to_string(),
            organization_id: ORG.to_string(),
            name: "Greeting".to_string(),
            body: "Hola {{contact.name}}, recibimos: {{message.text}}".to_string(),
        })
        .expect("save template");
}

fn base_rule(id: &str) -> AutomationRule {
    AutomationRule::new(ORG, id, "Soporte", 1).with_condition(Condition::keyword_contains(&["ayuda"]))
}

#[test]
fn actions_run_in_order_and_failures_do_not_stop_later_actions() {
    let harness = Harness::new();
    let (contact, conversation) = harness.seed_contact("c1", true);
    let sender = RecordingSender::default();
    let webhooks = RecordingWebhooks::default();
    let message = NormalizedMessage::from_inbound(&inbound("m1", &conversation, "ayuda"));

    let rule = base_rule("r1")
        .with_action(Action::ApplyTag {
            tag: "soporte".to_string(),
        })
        .with_action(Action::SendReply {
            template_id: "missing-template".to_string(),
            idempotent: true,
        })
        .with_action(Action::CallWebhook {
            url: "https://hooks.example.com/crm".to_string(),
            include_tags: true,
        });

    let dispatcher =
        ActionDispatcher::new(&harness.crm, &sender, &webhooks, &harness.ledger, &harness.log);
    let reports = dispatcher.dispatch(
        &rule,
        &DispatchContext {
            message: &message,
            conversation: &conversation,
            contact: &contact,
            now: 200,
        },
    );

    let statuses: Vec<_> = reports.iter().map(|report| report.status).collect();
    assert_eq!(
        statuses,
        vec![
            ActionStatus::Succeeded,
            ActionStatus::Failed,
            ActionStatus::Succeeded
        ]
    );
    assert_eq!(reports[1].action_type, ActionKind::SendReply);
    assert!(reports[1]
        .error
        .as_deref()
        .expect("error text")
        .contains("missing-template"));

    let calls = webhooks.calls();
    assert_eq!(calls.len(), 1);
    let payload = &calls[0].1;
    assert_eq!(payload["event"], "automation.rule_matched");
    assert_eq!(payload["rule_id"], "r1");
    assert_eq!(payload["tags"], serde_json::json!(["soporte"]));

    let events: Vec<_> = harness
        .log_lines()
        .into_iter()
        .map(|line| line["event"].as_str().unwrap_or_default().to_string())
        .collect();
    assert!(events.contains(&"action.failed".to_string()));
}

#[test]
fn halt_on_failure_skips_the_remaining_actions() {
    let harness = Harness::new();
    let (contact, conversation) = harness.seed_contact("c1", false);
    let sender = RecordingSender::default();
    let webhooks = RecordingWebhooks::failing();
    let message = NormalizedMessage::from_inbound(&inbound("m1", &conversation, "ayuda"));

    let mut rule = base_rule("r1")
        .with_action(Action::CallWebhook {
            url: "https://hooks.example.com/down".to_string(),
            include_tags: false,
        })
        .with_action(Action::ApplyTag {
            tag: "never".to_string(),
        })
        .with_action(Action::AssignAgent {
            agent_id: "agent-7".to_string(),
        });
    rule.halt_on_action_failure = true;

    let dispatcher =
        ActionDispatcher::new(&harness.crm, &sender, &webhooks, &harness.ledger, &harness.log);
    let reports = dispatcher.dispatch(
        &rule,
        &DispatchContext {
            message: &message,
            conversation: &conversation,
            contact: &contact,
            now: 200,
        },
    );

    assert_eq!(reports[0].status, ActionStatus::Failed);
    assert_eq!(reports[1].status, ActionStatus::Skipped);
    assert_eq!(reports[2].status, ActionStatus::Skipped);
    assert_eq!(
        reports[2].detail.as_deref(),
        Some("halted after action 0 failed")
    );
    assert!(harness
        .crm
        .contact_tags(ORG, "c1")
        .expect("tags")
        .is_empty());
}

#[test]
fn idempotent_reply_is_sent_once_per_message() {
    let harness = Harness::new();
    save_greeting(&harness);
    let (contact, conversation) = harness.seed_contact("c1", false);
    let sender = RecordingSender::default();
    let webhooks = RecordingWebhooks::default();
    let message = NormalizedMessage::from_inbound(&inbound("m1", &conversation, "ayuda por favor"));
    let rule = base_rule("r1").with_action(Action::SendReply {
        template_id: "greeting".to_string(),
        idempotent: true,
    });
    let context = DispatchContext {
        message: &message,
        conversation: &conversation,
        contact: &contact,
        now: 200,
    };
    let dispatcher =
        ActionDispatcher::new(&harness.crm, &sender, &webhooks, &harness.ledger, &harness.log);

    let first = dispatcher.dispatch(&rule, &context);
    let second = dispatcher.dispatch(&rule, &context);

    assert_eq!(first[0].status, ActionStatus::Succeeded);
    assert!(first[0].delivered_reply());
    assert_eq!(second[0].status, ActionStatus::Skipped);
    assert_eq!(second[0].detail.as_deref(), Some("deduplicated"));
    assert!(second[0].delivered_reply());

    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, "Hola Lucía, recibimos: ayuda por favor");
    assert_eq!(sent[0].recipient, "5215550001");

    let history = harness
        .crm
        .list_outgoing_messages(&conversation.conversation_id)
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].provider_message_id.as_deref(), Some("wamid-1"));

    let key = compute_action_correlation_key(ORG, &conversation.conversation_id, "m1", "r1", 0);
    assert_eq!(
        harness.ledger.state_of(ORG, &key).expect("state").as_deref(),
        Some("delivered")
    );
}

#[test]
fn failed_send_releases_the_claim_so_a_retry_delivers() {
    let harness = Harness::new();
    save_greeting(&harness);
    let (contact, conversation) = harness.seed_contact("c1", false);
    let sender = RecordingSender::failing();
    let webhooks = RecordingWebhooks::default();
    let message = NormalizedMessage::from_inbound(&inbound("m1", &conversation, "ayuda"));
    let rule = base_rule("r1").with_action(Action::SendReply {
        template_id: "greeting".to_string(),
        idempotent: true,
    });
    let context = DispatchContext {
        message: &message,
        conversation: &conversation,
        contact: &contact,
        now: 200,
    };
    let dispatcher =
        ActionDispatcher::new(&harness.crm, &sender, &webhooks, &harness.ledger, &harness.log);

    let failed = dispatcher.dispatch(&rule, &context);
    assert_eq!(failed[0].status, ActionStatus::Failed);
    assert!(!failed[0].delivered_reply());
    let key = compute_action_correlation_key(ORG, &conversation.conversation_id, "m1", "r1", 0);
    assert_eq!(harness.ledger.state_of(ORG, &key).expect("state"), None);

    sender.set_failing(false);
    let retried = dispatcher.dispatch(&rule, &context);
    assert_eq!(retried[0].status, ActionStatus::Succeeded);
    assert_eq!(sender.sent().len(), 1);
}

#[test]
fn reply_claimed_but_never_settled_is_not_reported_as_delivered() {
    let harness = Harness::new();
    save_greeting(&harness);
    let (contact, conversation) = harness.seed_contact("c1", false);
    let sender = RecordingSender::default();
    let webhooks = RecordingWebhooks::default();
    let message = NormalizedMessage::from_inbound(&inbound("m1", &conversation, "ayuda"));
    let rule = base_rule("r1").with_action(Action::SendReply {
        template_id: "greeting".to_string(),
        idempotent: true,
    });
    let key = compute_action_correlation_key(ORG, &conversation.conversation_id, "m1", "r1", 0);
    assert_eq!(
        harness.ledger.claim(ORG, &key, 150).expect("claim"),
        ClaimOutcome::Claimed
    );

    let dispatcher =
        ActionDispatcher::new(&harness.crm, &sender, &webhooks, &harness.ledger, &harness.log);
    let reports = dispatcher.dispatch(
        &rule,
        &DispatchContext {
            message: &message,
            conversation: &conversation,
            contact: &contact,
            now: 200,
        },
    );

    assert_eq!(reports[0].status, ActionStatus::Skipped);
    assert_eq!(reports[0].detail.as_deref(), Some("delivery_pending"));
    assert!(!reports[0].delivered_reply());
    assert!(sender.sent().is_empty());
    assert!(harness
        .log_lines()
        .iter()
        .any(|line| line["event"] == "reply.claim_pending"));
}

#[test]
fn release_failure_is_logged_and_the_retry_is_not_counted_as_sent() {
    let harness = Harness::new();
    save_greeting(&harness);
    let (contact, conversation) = harness.seed_contact("c1", false);
    let sender = RecordingSender::failing();
    let webhooks = RecordingWebhooks::default();
    let ledger = StuckLedger {
        inner: &harness.ledger,
    };
    let message = NormalizedMessage::from_inbound(&inbound("m1", &conversation, "ayuda"));
    let rule = base_rule("r1").with_action(Action::SendReply {
        template_id: "greeting".to_string(),
        idempotent: true,
    });
    let context = DispatchContext {
        message: &message,
        conversation: &conversation,
        contact: &contact,
        now: 200,
    };
    let dispatcher = ActionDispatcher::new(&harness.crm, &sender, &webhooks, &ledger, &harness.log);

    let failed = dispatcher.dispatch(&rule, &context);
    assert_eq!(failed[0].status, ActionStatus::Failed);
    let release_failure = harness
        .log_lines()
        .into_iter()
        .find(|line| line["event"] == "reply.ledger_release_failed")
        .expect("release failure logged");
    assert_eq!(release_failure["rule_id"], "r1");
    assert_eq!(release_failure["message_id"], "m1");

    sender.set_failing(false);
    let retried = dispatcher.dispatch(&rule, &context);
    assert_eq!(retried[0].detail.as_deref(), Some("delivery_pending"));
    assert!(!retried[0].delivered_reply());
    assert!(sender.sent().is_empty());
}

#[test]
fn unknown_stored_action_fails_without_stopping_the_rule() {
    let harness = Harness::new();
    let (contact, conversation) = harness.seed_contact("c1", false);
    let sender = RecordingSender::default();
    let webhooks = RecordingWebhooks::default();
    let message = NormalizedMessage::from_inbound(&inbound("m1", &conversation, "ayuda"));
    let rule = base_rule("r1")
        .with_action(Action::Unrecognized {
            raw_type: "send_email".to_string(),
        })
        .with_action(Action::ApplyTag {
            tag: "soporte".to_string(),
        });

    let dispatcher =
        ActionDispatcher::new(&harness.crm, &sender, &webhooks, &harness.ledger, &harness.log);
    let reports = dispatcher.dispatch(
        &rule,
        &DispatchContext {
            message: &message,
            conversation: &conversation,
            contact: &contact,
            now: 200,
        },
    );

    assert_eq!(reports[0].action_type, ActionKind::Unrecognized);
    assert_eq!(reports[0].status, ActionStatus::Failed);
    assert!(reports[0]
        .error
        .as_deref()
        .expect("error text")
        .contains("send_email"));
    assert_eq!(reports[1].status, ActionStatus::Succeeded);
    assert_eq!(
        harness.crm.contact_tags(ORG, "c1").expect("tags"),
        vec!["soporte".to_string()]
    );
}

#[test]
fn non_idempotent_reply_bypasses_the_ledger() {
    let harness = Harness::new();
    save_greeting(&harness);
    let (contact, conversation) = harness.seed_contact("c1", false);
    let sender = RecordingSender::default();
    let webhooks = RecordingWebhooks::default();
    let message = NormalizedMessage::from_inbound(&inbound("m1", &conversation, "ayuda"));
    let rule = base_rule("r1").with_action(Action::SendReply {
        template_id: "greeting".to_string(),
        idempotent: false,
    });
    let context = DispatchContext {
        message: &message,
        conversation: &conversation,
        contact: &contact,
        now: 200,
    };
    let dispatcher =
        ActionDispatcher::new(&harness.crm, &sender, &webhooks, &harness.ledger, &harness.log);
    dispatcher.dispatch(&rule, &context);
    dispatcher.dispatch(&rule, &context);
    assert_eq!(sender.sent().len(), 2);
    assert!(sender.sent()[0].correlation_key.is_none());
}

#[test]
fn assignment_keeps_the_first_agent() {
    let harness = Harness::new();
    let (contact, conversation) = harness.seed_contact("c1", false);
    let sender = RecordingSender::default();
    let webhooks = RecordingWebhooks::default();
    let message = NormalizedMessage::from_inbound(&inbound("m1", &conversation, "ayuda"));
    let context = DispatchContext {
        message: &message,
        conversation: &conversation,
        contact: &contact,
        now: 200,
    };
    let dispatcher =
        ActionDispatcher::new(&harness.crm, &sender, &webhooks, &harness.ledger, &harness.log);

    let to_senior = base_rule("r1").with_action(Action::AssignAgent {
        agent_id: "senior-queue".to_string(),
    });
    let to_billing = base_rule("r2").with_action(Action::AssignAgent {
        agent_id: "billing".to_string(),
    });

    assert_eq!(
        dispatcher.dispatch(&to_senior, &context)[0].status,
        ActionStatus::Succeeded
    );
    let same = dispatcher.dispatch(&to_senior, &context);
    assert_eq!(same[0].status, ActionStatus::Succeeded);
    let lost = dispatcher.dispatch(&to_billing, &context);
    assert_eq!(lost[0].status, ActionStatus::Skipped);
    assert_eq!(
        lost[0].detail.as_deref(),
        Some("already_assigned:senior-queue")
    );
}
