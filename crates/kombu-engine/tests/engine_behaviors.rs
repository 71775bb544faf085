//! Boundary behaviors, scoring laws, and operational checks.

use kombu_engine::{
    build, BackendKind, BuildParams, BuildPhase, CancelToken, Document, EngineError, Index,
    SearchFilters, SearchOptions, SearchRoute, Searcher, SearcherConfig, SortBy,
};
use kombu_testkit::{random_corpus, tagged_corpus, FixtureProvider, HashProvider};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::tempdir;

const DIM: usize = 16;

fn hash_provider() -> Arc<HashProvider> {
    Arc::new(HashProvider::new("hash-v1", DIM))
}

fn build_corpus(
    dir: &std::path::Path,
    docs: Vec<Document>,
    tweak: impl FnOnce(&mut BuildParams),
) -> Searcher {
    let mut params = BuildParams {
        recompute: false,
        workers: 2,
        ..BuildParams::default()
    };
    tweak(&mut params);
    build(dir, &params, docs, hash_provider().as_ref(), |_, _, _| {}).unwrap();
    Searcher::open(dir, &params.name, hash_provider(), SearcherConfig::default()).unwrap()
}

#[test]
fn empty_corpus_fails_invalid_input() {
    let dir = tempdir().unwrap();
    let err = build(
        dir.path(),
        &BuildParams::default(),
        Vec::<Document>::new(),
        hash_provider().as_ref(),
        |_, _, _| {},
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn k_beyond_n_returns_n_results() {
    let dir = tempdir().unwrap();
    let searcher = build_corpus(dir.path(), random_corpus(7), |_| {});
    let response = searcher
        .search("kelp", 50, &SearchOptions::default())
        .unwrap();
    assert_eq!(response.results.len(), 7);
    assert!(!response.partial);
}

#[test]
fn k_zero_short_circuits_without_provider_call() {
    let dir = tempdir().unwrap();
    build(
        dir.path(),
        &BuildParams {
            recompute: false,
            ..BuildParams::default()
        },
        random_corpus(5),
        hash_provider().as_ref(),
        |_, _, _| {},
    )
    .unwrap();

    let counting = Arc::new(HashProvider::new("hash-v1", DIM));
    let searcher = Searcher::open(
        dir.path(),
        "index",
        Arc::clone(&counting) as Arc<dyn kombu_engine::EmbeddingProvider>,
        SearcherConfig::default(),
    )
    .unwrap();

    let response = searcher.search("kelp", 0, &SearchOptions::default()).unwrap();
    assert!(response.results.is_empty());
    assert_eq!(counting.encode_calls(), 0);
}

#[test]
fn empty_query_rejected_unless_pure_lexical() {
    let dir = tempdir().unwrap();
    let searcher = build_corpus(dir.path(), random_corpus(5), |_| {});

    let err = searcher
        .search("   ", 5, &SearchOptions::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));

    let lexical = SearchOptions {
        alpha: 1.0,
        ..SearchOptions::default()
    };
    let response = searcher.search("", 5, &lexical).unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.route, SearchRoute::Lexical);
}

#[test]
fn inverted_date_range_yields_empty_not_error() {
    let dir = tempdir().unwrap();
    let docs: Vec<Document> = random_corpus(10)
        .into_iter()
        .enumerate()
        .map(|(i, doc)| {
            let mut metadata = serde_json::Map::new();
            metadata.insert(
                "timestamp".into(),
                serde_json::Value::String(format!("2024-03-{:02}T12:00:00Z", i + 1)),
            );
            doc.with_metadata(metadata)
        })
        .collect();
    let searcher = build_corpus(dir.path(), docs, |_| {});

    let filters = SearchFilters {
        date_from: kombu_engine::parse_timestamp("2025-01-01"),
        date_to: kombu_engine::parse_timestamp("2024-01-01"),
        ..SearchFilters::default()
    };
    let response = searcher
        .search(
            "kelp",
            5,
            &SearchOptions {
                filters: Some(filters),
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert!(response.results.is_empty());
    assert!(!response.partial);
}

#[test]
fn filter_monotonicity() {
    let dir = tempdir().unwrap();
    let searcher = build_corpus(dir.path(), tagged_corpus(200, 40, "pinned"), |_| {});

    let unfiltered = searcher
        .search("kelp tide", 20, &SearchOptions::default())
        .unwrap();

    let mut filters = SearchFilters::default();
    filters
        .equals
        .insert("tag".into(), serde_json::Value::String("pinned".into()));
    let filtered = searcher
        .search(
            "kelp tide",
            20,
            &SearchOptions {
                filters: Some(filters),
                ..SearchOptions::default()
            },
        )
        .unwrap();

    assert!(filtered.results.len() <= unfiltered.results.len());
    for result in &filtered.results {
        assert_eq!(
            result.passage.metadata.get("tag").and_then(|v| v.as_str()),
            Some("pinned")
        );
    }
}

#[test]
fn hybrid_scores_stay_in_unit_interval() {
    let dir = tempdir().unwrap();
    let searcher = build_corpus(dir.path(), random_corpus(100), |_| {});

    for alpha in [0.25, 0.5, 0.75, 1.0] {
        let response = searcher
            .search(
                "kelp tide reef",
                10,
                &SearchOptions {
                    alpha,
                    ..SearchOptions::default()
                },
            )
            .unwrap();
        assert!(!response.results.is_empty());
        for result in &response.results {
            assert!(
                (0.0..=1.0).contains(&result.score),
                "alpha {} produced score {}",
                alpha,
                result.score
            );
        }
    }
}

#[test]
fn recall_floor_against_brute_force() {
    let dir = tempdir().unwrap();
    let corpus = random_corpus(500);
    let queries: Vec<String> = corpus.iter().take(20).map(|d| d.text.clone()).collect();
    let searcher = build_corpus(dir.path(), corpus, |params| {
        params.hnsw.m = 16;
        params.hnsw.ef_construction = 200;
    });

    let n = searcher.index().len();
    let mut total_hits = 0usize;
    let mut total_wanted = 0usize;
    for query in &queries {
        let graph = searcher
            .search(
                query,
                10,
                &SearchOptions {
                    ef_search: Some(64),
                    ..SearchOptions::default()
                },
            )
            .unwrap();

        // Oracle: the same search with the beam opened to the whole
        // corpus, which walks every reachable node and is exact on a
        // connected graph.
        let oracle = searcher
            .search(
                query,
                10,
                &SearchOptions {
                    ef_search: Some(n),
                    top_k_rescore: Some(n),
                    ..SearchOptions::default()
                },
            )
            .unwrap();

        let got: HashSet<&str> = graph.results.iter().map(|r| r.passage.id.as_str()).collect();
        total_wanted += oracle.results.len().min(10);
        total_hits += oracle
            .results
            .iter()
            .take(10)
            .filter(|r| got.contains(r.passage.id.as_str()))
            .count();
    }

    let recall = total_hits as f64 / total_wanted as f64;
    assert!(recall >= 0.9, "mean recall@10 {} below floor", recall);
}

#[test]
fn date_sort_is_a_post_sort_over_the_beam() {
    let dir = tempdir().unwrap();
    let docs: Vec<Document> = random_corpus(30)
        .into_iter()
        .enumerate()
        .map(|(i, doc)| {
            let mut metadata = serde_json::Map::new();
            metadata.insert(
                "timestamp".into(),
                serde_json::Value::String(format!("2024-01-{:02}T00:00:00Z", (i % 28) + 1)),
            );
            doc.with_metadata(metadata)
        })
        .collect();
    let searcher = build_corpus(dir.path(), docs, |_| {});

    let response = searcher
        .search(
            "kelp tide",
            10,
            &SearchOptions {
                sort_by: SortBy::DateDesc,
                top_k_rescore: Some(20),
                ..SearchOptions::default()
            },
        )
        .unwrap();

    let stamps: Vec<&str> = response
        .results
        .iter()
        .map(|r| {
            r.passage
                .metadata
                .get("timestamp")
                .and_then(|v| v.as_str())
                .unwrap()
        })
        .collect();
    for pair in stamps.windows(2) {
        assert!(pair[0] >= pair[1], "dates not descending: {:?}", stamps);
    }
}

#[test]
fn model_mismatch_refused_at_open() {
    let dir = tempdir().unwrap();
    build(
        dir.path(),
        &BuildParams::default(),
        random_corpus(5),
        hash_provider().as_ref(),
        |_, _, _| {},
    )
    .unwrap();

    let err = Searcher::open(
        dir.path(),
        "index",
        Arc::new(HashProvider::new("other-model", DIM)),
        SearcherConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::ModelMismatch { .. }));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn cancelled_search_returns_empty_with_flag() {
    let dir = tempdir().unwrap();
    let searcher = build_corpus(dir.path(), random_corpus(50), |_| {});

    let token = CancelToken::new();
    token.cancel();
    let response = searcher
        .search(
            "kelp",
            5,
            &SearchOptions {
                cancel: Some(token),
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert!(response.partial);
    assert_eq!(response.reason.as_deref(), Some("cancelled"));
    assert!(response.results.is_empty());
}

#[test]
fn zero_deadline_degrades_gracefully() {
    let dir = tempdir().unwrap();
    let searcher = build_corpus(dir.path(), random_corpus(50), |_| {});

    let response = searcher
        .search(
            "kelp",
            5,
            &SearchOptions {
                timeout_ms: Some(0),
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert!(response.partial);
    assert_eq!(response.reason.as_deref(), Some("deadline_exceeded"));
}

#[test]
fn vamana_backend_end_to_end() {
    let dir = tempdir().unwrap();
    let corpus = random_corpus(200);
    let probe = corpus[17].text.clone();
    let probe_id = corpus[17].id.clone().unwrap();

    let searcher = build_corpus(dir.path(), corpus, |params| {
        params.backend = BackendKind::Vamana;
        params.vamana.r = 24;
        params.vamana.l_build = 64;
    });

    let response = searcher
        .search(&probe, 5, &SearchOptions::default())
        .unwrap();
    assert!(!response.results.is_empty());
    assert_eq!(response.results[0].passage.id, probe_id);
    assert!(response.results[0].distance < 1e-5);
}

#[test]
fn corrupt_graph_refused_with_exit_code_three() {
    let dir = tempdir().unwrap();
    build(
        dir.path(),
        &BuildParams::default(),
        random_corpus(10),
        hash_provider().as_ref(),
        |_, _, _| {},
    )
    .unwrap();

    let graph_path = dir.path().join("index.graph");
    let mut bytes = std::fs::read(&graph_path).unwrap();
    bytes[0] = b'X';
    std::fs::write(&graph_path, &bytes).unwrap();

    let err = Searcher::open(
        dir.path(),
        "index",
        hash_provider(),
        SearcherConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::Corrupt(_)));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn warmup_and_verify() {
    let dir = tempdir().unwrap();
    let searcher = build_corpus(dir.path(), random_corpus(50), |_| {});

    // Prime the lexical sidecar so verify covers it too.
    searcher
        .search(
            "kelp tide",
            5,
            &SearchOptions {
                alpha: 0.5,
                ..SearchOptions::default()
            },
        )
        .unwrap();

    let elapsed = searcher.warmup();
    assert!(elapsed.as_nanos() > 0);
    searcher.index().verify().unwrap();
}

#[test]
fn progress_callback_reports_every_phase() {
    let dir = tempdir().unwrap();
    let mut phases = HashSet::new();
    build(
        dir.path(),
        &BuildParams::default(),
        random_corpus(20),
        hash_provider().as_ref(),
        |phase, _, _| {
            phases.insert(phase);
        },
    )
    .unwrap();

    for phase in [
        BuildPhase::Ingest,
        BuildPhase::Embed,
        BuildPhase::Graph,
        BuildPhase::Finalize,
    ] {
        assert!(phases.contains(&phase), "missing {:?}", phase);
    }
}

#[test]
fn append_then_rebuild_extends_corpus() {
    let dir = tempdir().unwrap();
    let params = BuildParams {
        recompute: false,
        ..BuildParams::default()
    };
    build(
        dir.path(),
        &params,
        random_corpus(10),
        hash_provider().as_ref(),
        |_, _, _| {},
    )
    .unwrap();

    let extra = vec![Document::new("entirely new shoreline text").with_id("zz-new")];
    let report = build(dir.path(), &params, extra, hash_provider().as_ref(), |_, _, _| {}).unwrap();
    assert_eq!(report.manifest.num_passages, 11);

    let index = Index::open(dir.path(), "index").unwrap();
    assert!(index.store().node_of("zz-new").is_some());
}

#[test]
fn lexical_sidecar_rebuilt_after_corpus_change() {
    let dir = tempdir().unwrap();
    let params = BuildParams {
        recompute: false,
        ..BuildParams::default()
    };
    build(
        dir.path(),
        &params,
        random_corpus(10),
        hash_provider().as_ref(),
        |_, _, _| {},
    )
    .unwrap();

    // Hybrid query materializes the sidecar.
    let searcher = Searcher::open(dir.path(), "index", hash_provider(), SearcherConfig::default())
        .unwrap();
    searcher
        .search(
            "kelp",
            3,
            &SearchOptions {
                alpha: 0.5,
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert!(dir.path().join("index.bm25").exists());

    // Growing the corpus invalidates it; the next hybrid query rebuilds.
    let extra = vec![Document::new("new kelp forest passage").with_id("zz-new")];
    build(dir.path(), &params, extra, hash_provider().as_ref(), |_, _, _| {}).unwrap();
    assert!(!dir.path().join("index.bm25").exists());

    let searcher = Searcher::open(dir.path(), "index", hash_provider(), SearcherConfig::default())
        .unwrap();
    let response = searcher
        .search(
            "kelp",
            3,
            &SearchOptions {
                alpha: 0.5,
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert!(!response.results.is_empty());
    searcher.index().verify().unwrap();
}
