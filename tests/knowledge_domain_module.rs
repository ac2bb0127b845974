use comodin_automation::knowledge::domain::validate_transition;
use comodin_automation::knowledge::embedding::{
    cosine_similarity, decode_embedding, encode_embedding, tokenize,
};
use comodin_automation::knowledge::{
    validate_confidence, Embedder, HashedEmbedder, KnowledgeDomainError, NewKnowledgeSource,
    SourceStatus, SourceType,
};

const ALL_STATUSES: [SourceStatus; 7] = [
    SourceStatus::Pending,
    SourceStatus::Processing,
    SourceStatus::Chunking,
    SourceStatus::Embedding,
    SourceStatus::Active,
    SourceStatus::Error,
    SourceStatus::Disabled,
];

#[test]
fn lifecycle_allows_only_the_documented_transitions() {
    let allowed = [
        (SourceStatus::Pending, SourceStatus::Processing),
        (SourceStatus::Processing, SourceStatus::Chunking),
        (SourceStatus::Chunking, SourceStatus::Embedding),
        (SourceStatus::Embedding, SourceStatus::Active),
        (SourceStatus::Pending, SourceStatus::Error),
        (SourceStatus::Processing, SourceStatus::Error),
        (SourceStatus::Chunking, SourceStatus::Error),
        (SourceStatus::Embedding, SourceStatus::Error),
        (SourceStatus::Error, SourceStatus::Pending),
        (SourceStatus::Active, SourceStatus::Disabled),
        (SourceStatus::Disabled, SourceStatus::Active),
        (SourceStatus::Active, SourceStatus::Processing),
    ];
    for from in ALL_STATUSES {
        for to in ALL_STATUSES {
            let expected = allowed.contains(&(from, to));
            assert_eq!(
                from.can_transition_to(to),
                expected,
                "{} -> {}",
                from.as_str(),
                to.as_str()
            );
        }
    }

    assert_eq!(
        validate_transition(SourceStatus::Pending, SourceStatus::Active),
        Err(KnowledgeDomainError::InvalidTransition {
            from: "pending",
            to: "active",
        })
    );
}

#[test]
fn statuses_and_types_parse_their_wire_names() {
    for status in ALL_STATUSES {
        assert_eq!(SourceStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(SourceType::parse("url"), Some(SourceType::Url));
    assert_eq!(SourceType::parse("video"), None);
}

#[test]
fn files_and_urls_need_a_location() {
    let file = NewKnowledgeSource {
        source_type: SourceType::File,
        title: "Catálogo 2024".to_string(),
        location: Some("  ".to_string()),
    };
    assert_eq!(
        file.validate(),
        Err(KnowledgeDomainError::MissingLocation {
            source_type: "file"
        })
    );

    let text = NewKnowledgeSource {
        source_type: SourceType::Text,
        title: "Horarios".to_string(),
        location: None,
    };
    assert!(text.validate().is_ok());

    let untitled = NewKnowledgeSource {
        title: " ".to_string(),
        ..text
    };
    assert_eq!(
        untitled.validate(),
        Err(KnowledgeDomainError::MissingField { field: "title" })
    );
}

#[test]
fn confidence_must_be_a_unit_value() {
    assert!(validate_confidence(0.0).is_ok());
    assert!(validate_confidence(1.0).is_ok());
    assert!(validate_confidence(1.01).is_err());
    assert!(validate_confidence(f32::NAN).is_err());
}

#[test]
fn hashed_embeddings_are_deterministic_unit_vectors() {
    let embedder = HashedEmbedder::new(32);
    let first = embedder
        .embed("Envíos a todo México")
        .expect("embed")
        .expect("vector");
    let second = embedder
        .embed("envíos a TODO méxico")
        .expect("embed")
        .expect("vector");
    assert_eq!(first.len(), 32);
    assert_eq!(first, second);
    assert!((cosine_similarity(&first, &second) - 1.0).abs() < 1e-5);
    assert_eq!(embedder.embed("  ¿? ").expect("embed"), None);

    assert_eq!(tokenize("¿Cuál es el horario?"), vec!["cuál", "es", "el", "horario"]);
    assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);

    let decoded = decode_embedding(&encode_embedding(&first)).expect("decode");
    assert_eq!(decoded, first);
    assert_eq!(decode_embedding(b"[0.5, 0.25]"), Some(vec![0.5, 0.25]));
}
