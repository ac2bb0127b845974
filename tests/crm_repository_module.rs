mod support;

use comodin_automation::actions::{
    AssignmentOutcome, ContactStore, OutgoingMessageRecord, OutgoingOrigin, PortError,
    ReplyTemplate,
};
use comodin_automation::crm::{CrmRepository, CrmRepositoryError};
use comodin_automation::inbound::Contact;
use serde_json::json;
use support::{Harness, ORG};

#[test]
fn contact_round_trips_with_custom_fields_and_tags() {
    let harness = Harness::new();
    let mut contact = Contact::new(ORG, "c1");
    contact.name = Some("Lucía".to_string());
    contact.is_vip = true;
    contact.tags = vec!["Mayoreo".to_string()];
    contact
        .custom_fields
        .insert("lifetimeValue".to_string(), json!(1250.5));
    harness.crm.upsert_contact(&contact, 10).expect("upsert");

    let stored = harness
        .crm
        .get_contact("c1")
        .expect("load")
        .expect("contact exists");
    assert!(stored.is_vip);
    assert_eq!(stored.tags, vec!["Mayoreo".to_string()]);
    assert_eq!(stored.custom_fields["lifetimeValue"], json!(1250.5));
    assert!(harness.crm.get_contact("ghost").expect("load").is_none());
}

#[test]
fn tags_are_a_case_insensitive_set() {
    let harness = Harness::new();
    harness.seed_contact("c1", false);

    harness.crm.apply_tag(ORG, "c1", "VIP", 1).expect("tag");
    harness.crm.apply_tag(ORG, "c1", "vip", 2).expect("tag again");
    harness.crm.apply_tag(ORG, "c1", " soporte ", 3).expect("tag");

    assert_eq!(
        harness.crm.contact_tags(ORG, "c1").expect("tags"),
        vec!["VIP".to_string(), "soporte".to_string()]
    );

    let err = harness
        .crm
        .apply_tag(ORG, "nobody", "vip", 4)
        .expect_err("unknown contact");
    assert!(matches!(err, PortError::NotFound { kind: "contact", .. }));
}

#[test]
fn concurrent_assignment_has_exactly_one_winner() {
    let harness = Harness::new();
    let (_, conversation) = harness.seed_contact("c1", false);
    let agents = ["agent-1", "agent-2", "agent-3", "agent-4"];

    let outcomes: Vec<AssignmentOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = agents
            .iter()
            .map(|agent| {
                let crm = &harness.crm;
                let conversation_id = conversation.conversation_id.as_str();
                scope.spawn(move || {
                    crm.assign_agent_if_unassigned(ORG, conversation_id, agent, 5)
                        .expect("assign")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect()
    });

    let winners = outcomes
        .iter()
        .filter(|outcome| **outcome == AssignmentOutcome::Assigned)
        .count();
    assert_eq!(winners, 1);

    let stored = harness
        .crm
        .get_conversation(&conversation.conversation_id)
        .expect("load")
        .expect("conversation");
    let winner = stored.assigned_agent_id.expect("assigned");
    for outcome in outcomes {
        match outcome {
            AssignmentOutcome::Assigned => {}
            AssignmentOutcome::AlreadyAssigned { agent_id } => assert_eq!(agent_id, winner),
            AssignmentOutcome::AlreadyAssignedToSame => panic!("agents are distinct"),
        }
    }
}

#[test]
fn released_conversation_can_be_reassigned() {
    let harness = Harness::new();
    let (_, conversation) = harness.seed_contact("c1", false);
    let id = conversation.conversation_id.as_str();

    assert_eq!(
        harness
            .crm
            .assign_agent_if_unassigned(ORG, id, "agent-1", 1)
            .expect("assign"),
        AssignmentOutcome::Assigned
    );
    assert_eq!(
        harness
            .crm
            .assign_agent_if_unassigned(ORG, id, "agent-1", 2)
            .expect("assign"),
        AssignmentOutcome::AlreadyAssignedToSame
    );
    harness.crm.release_assignment(id).expect("release");
    assert_eq!(
        harness
            .crm
            .assign_agent_if_unassigned(ORG, id, "agent-2", 3)
            .expect("assign"),
        AssignmentOutcome::Assigned
    );

    let err = harness
        .crm
        .assign_agent_if_unassigned(ORG, "conv-missing", "agent-2", 4)
        .expect_err("unknown conversation");
    assert!(matches!(err, PortError::NotFound { kind: "conversation", .. }));
}

#[test]
fn other_organizations_are_refused() {
    let harness = Harness::new();
    harness.seed_contact("c1", false);

    let err = harness
        .crm
        .load_contact("org-rival", "c1")
        .expect_err("scope");
    assert_eq!(
        err,
        PortError::ScopeDenied {
            expected: ORG.to_string(),
            actual: "org-rival".to_string(),
        }
    );

    let rival = CrmRepository::open(&harness.database, "org-rival").expect("open");
    assert!(rival.get_contact("c1").expect("load").is_none());

    let err = harness
        .crm
        .save_template(&ReplyTemplate {
            template_id: "t".to_string(),
            organization_id: "org-rival".to_string(),
            name: "t".to_string(),
            body: "hola".to_string(),
        })
        .expect_err("scope");
    assert!(matches!(
        err,
        CrmRepositoryError::OrganizationScopeMismatch { .. }
    ));
}

#[test]
fn outgoing_history_keeps_append_order_and_origin() {
    let harness = Harness::new();
    let (_, conversation) = harness.seed_contact("c1", false);
    for (text, origin) in [
        (
            "Te comunico con un asesor",
            OutgoingOrigin::RuleReply {
                rule_id: "r1".to_string(),
            },
        ),
        ("Nuestro horario es de 9 a 18", OutgoingOrigin::AutoResponse),
    ] {
        harness
            .crm
            .append_outgoing_message(&OutgoingMessageRecord {
                organization_id: ORG.to_string(),
                conversation_id: conversation.conversation_id.clone(),
                text: text.to_string(),
                origin,
                attachments: vec!["ks-manual".to_string()],
                provider_message_id: None,
                created_at: 7,
            })
            .expect("append");
    }

    let history = harness
        .crm
        .list_outgoing_messages(&conversation.conversation_id)
        .expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text, "Te comunico con un asesor");
    assert_eq!(history[1].origin, OutgoingOrigin::AutoResponse);
    assert_eq!(history[1].attachments, vec!["ks-manual".to_string()]);
}

#[test]
fn templates_require_a_body() {
    let harness = Harness::new();
    let err = harness
        .crm
        .save_template(&ReplyTemplate {
            template_id: "blank".to_string(),
            organization_id: ORG.to_string(),
            name: "Blank".to_string(),
            body: "   ".to_string(),
        })
        .expect_err("empty body");
    assert!(matches!(
        err,
        CrmRepositoryError::MissingField { field: "body" }
    ));
    assert!(harness
        .crm
        .load_reply_template(ORG, "blank")
        .expect("lookup")
        .is_none());
}
