use comodin_automation::knowledge::embedding::EmbeddingError;
use comodin_automation::knowledge::resolver::truncate_chars;
use comodin_automation::knowledge::{
    resolve, ConfidenceBand, Embedder, EmbeddingScorer, HashedEmbedder, HybridScorer,
    KnowledgeCandidate, LexicalOverlapScorer, ResolutionError, ResolutionOptions, ScoredBatch,
    ScoringError, ScoringMode, SimilarityScorer, SourceType,
};

fn candidate(source_id: &str, source_type: SourceType, chunk: usize, content: &str) -> KnowledgeCandidate {
    KnowledgeCandidate {
        source_id: source_id.to_string(),
        source_type,
        title: format!("Fuente {source_id}"),
        location: (source_type == SourceType::File).then(|| format!("https://cdn.example.com/{source_id}.pdf")),
        chunk_id: format!("{source_id}-c{chunk}"),
        content: content.to_string(),
        embedding: None,
    }
}

/// Returns preset scores in candidate order.
struct FixedScorer(Vec<f32>);

impl SimilarityScorer for FixedScorer {
    fn score(
        &self,
        _query: &str,
        _candidates: &[KnowledgeCandidate],
    ) -> Result<ScoredBatch, ScoringError> {
        Ok(ScoredBatch {
            scores: self.0.clone(),
            mode: ScoringMode::Embedding,
        })
    }
}

struct DownEmbedder;

impl Embedder for DownEmbedder {
    fn dimensions(&self) -> usize {
        8
    }

    fn embed(&self, _text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("connection reset".to_string()))
    }
}

#[test]
fn empty_knowledge_base_returns_the_fallback() {
    let options = ResolutionOptions {
        fallback_text: "Un asesor te responderá pronto".to_string(),
        ..ResolutionOptions::default()
    };
    let result = resolve("¿Horario?", &[], &LexicalOverlapScorer, &options).expect("resolve");
    assert_eq!(result.response_text, "Un asesor te responderá pronto");
    assert_eq!(result.confidence, 0.0);
    assert_eq!(result.band, ConfidenceBand::Low);
    assert!(!result.would_auto_respond);
    assert!(result.files_to_send.is_empty());
    assert!(result.knowledge_used.is_empty());
    assert_eq!(result.mode, ScoringMode::Empty);
}

#[test]
fn sources_rank_by_their_best_chunk_and_files_get_reasons() {
    let candidates = vec![
        candidate("ks-faq", SourceType::Text, 0, "Horario de atención de 9 a 18"),
        candidate("ks-faq", SourceType::Text, 1, "Aceptamos tarjetas"),
        candidate("ks-envios", SourceType::File, 0, "Política de envíos y devoluciones"),
        candidate("ks-precios", SourceType::File, 0, "Lista de precios mayoreo"),
        candidate("ks-blog", SourceType::Url, 0, "Noticias"),
    ];
    let scorer = FixedScorer(vec![0.91, 0.2, 0.62, 0.4, 0.7]);

    let result = resolve(
        "política de envíos",
        &candidates,
        &scorer,
        &ResolutionOptions::default(),
    )
    .expect("resolve");

    let used: Vec<_> = result
        .knowledge_used
        .iter()
        .map(|used| (used.source_id.as_str(), used.similarity))
        .collect();
    assert_eq!(
        used,
        vec![("ks-faq", 0.91), ("ks-blog", 0.7), ("ks-envios", 0.62)]
    );
    assert_eq!(result.response_text, "Horario de atención de 9 a 18");
    assert_eq!(result.confidence, 0.91);
    assert_eq!(result.band, ConfidenceBand::High);
    assert!(result.would_auto_respond);

    assert_eq!(result.files_to_send.len(), 1);
    let file = &result.files_to_send[0];
    assert_eq!(file.source_id, "ks-envios");
    assert_eq!(
        file.location.as_deref(),
        Some("https://cdn.example.com/ks-envios.pdf")
    );
    assert_eq!(
        file.reason,
        "similarity match for query terms política, de, envíos"
    );
}

#[test]
fn confidence_bands_follow_the_top_score() {
    let candidates = vec![candidate("ks-1", SourceType::Text, 0, "texto")];
    for (score, band, auto) in [
        (0.59, ConfidenceBand::Low, false),
        (0.6, ConfidenceBand::Medium, false),
        (0.75, ConfidenceBand::Medium, true),
        (0.8, ConfidenceBand::High, true),
    ] {
        let result = resolve(
            "q",
            &candidates,
            &FixedScorer(vec![score]),
            &ResolutionOptions::default(),
        )
        .expect("resolve");
        assert_eq!(result.band, band, "score {score}");
        assert_eq!(result.would_auto_respond, auto, "score {score}");
    }
}

#[test]
fn raising_the_best_score_never_lowers_confidence() {
    let candidates = vec![
        candidate("ks-a", SourceType::Text, 0, "uno"),
        candidate("ks-b", SourceType::Text, 0, "dos"),
    ];
    let mut previous = 0.0;
    for best in [0.1, 0.3, 0.55, 0.8, 1.0] {
        let result = resolve(
            "q",
            &candidates,
            &FixedScorer(vec![best, 0.2]),
            &ResolutionOptions::default(),
        )
        .expect("resolve");
        assert!(result.confidence >= previous);
        previous = result.confidence;
    }
}

#[test]
fn ties_break_on_source_id_and_scores_are_clamped() {
    let candidates = vec![
        candidate("ks-b", SourceType::Text, 0, "segunda"),
        candidate("ks-a", SourceType::Text, 0, "primera"),
        candidate("ks-c", SourceType::Text, 0, "tercera"),
    ];
    let result = resolve(
        "q",
        &candidates,
        &FixedScorer(vec![1.4, 1.0, f32::NAN]),
        &ResolutionOptions {
            top_n: 2,
            ..ResolutionOptions::default()
        },
    )
    .expect("resolve");
    let ids: Vec<_> = result
        .knowledge_used
        .iter()
        .map(|used| used.source_id.as_str())
        .collect();
    assert_eq!(ids, vec!["ks-a", "ks-b"]);
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.response_text, "primera");
}

#[test]
fn response_text_is_truncated_on_character_boundaries() {
    let candidates = vec![candidate(
        "ks-a",
        SourceType::Text,
        0,
        "  Añadimos envío gratis en pedidos mayores  ",
    )];
    let result = resolve(
        "q",
        &candidates,
        &FixedScorer(vec![0.9]),
        &ResolutionOptions {
            max_response_chars: 7,
            ..ResolutionOptions::default()
        },
    )
    .expect("resolve");
    assert_eq!(result.response_text, "Añadimo");
    assert_eq!(truncate_chars("ñandú", 10), "ñandú");
}

#[test]
fn backend_failures_and_bad_options_are_errors() {
    let candidates = vec![candidate("ks-a", SourceType::Text, 0, "texto")];

    let err = resolve(
        "q",
        &candidates,
        &EmbeddingScorer::new(DownEmbedder),
        &ResolutionOptions::default(),
    )
    .expect_err("backend down");
    assert!(matches!(err, ResolutionError::Backend { .. }));

    let err = resolve(
        "q",
        &candidates,
        &FixedScorer(vec![0.5, 0.5]),
        &ResolutionOptions::default(),
    )
    .expect_err("count mismatch");
    assert!(matches!(
        err,
        ResolutionError::ScoreCountMismatch {
            expected: 1,
            actual: 2
        }
    ));

    let err = resolve(
        "q",
        &candidates,
        &LexicalOverlapScorer,
        &ResolutionOptions {
            top_n: 0,
            ..ResolutionOptions::default()
        },
    )
    .expect_err("top_n");
    assert!(matches!(err, ResolutionError::InvalidOptions { .. }));
}

#[test]
fn lexical_and_hybrid_scorers_agree_on_the_best_chunk() {
    let embedder = HashedEmbedder::new(64);
    let mut candidates = vec![
        candidate("ks-horario", SourceType::Text, 0, "Nuestro horario de atención es de lunes a viernes"),
        candidate("ks-pagos", SourceType::Text, 0, "Aceptamos pagos con tarjeta y transferencia"),
    ];

    let lexical = resolve(
        "horario de atención",
        &candidates,
        &LexicalOverlapScorer,
        &ResolutionOptions::default(),
    )
    .expect("lexical");
    assert_eq!(lexical.mode, ScoringMode::Lexical);
    assert_eq!(lexical.knowledge_used[0].source_id, "ks-horario");
    assert_eq!(lexical.confidence, 1.0);

    for candidate in &mut candidates {
        candidate.embedding = embedder.embed(&candidate.content).expect("embed");
    }
    let hybrid = resolve(
        "horario de atención",
        &candidates,
        &HybridScorer::new(embedder),
        &ResolutionOptions::default(),
    )
    .expect("hybrid");
    assert_eq!(hybrid.mode, ScoringMode::Embedding);
    assert_eq!(hybrid.knowledge_used[0].source_id, "ks-horario");

    candidates[0].embedding = Some(vec![1.0; 3]);
    let err = EmbeddingScorer::new(embedder)
        .score("horario", &candidates)
        .expect_err("dimension mismatch");
    assert!(matches!(err, ScoringError::DimensionMismatch { .. }));
}
