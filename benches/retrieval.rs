use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};

use reflect_rag::analysis::{SearchResult, VectorDocument};
use reflect_rag::corpus::normalize_corpus;
use reflect_rag::graph::{GraphBuilder, GraphQueryEngine};
use reflect_rag::retrieval::{merge_results, QueryIntent};
use reflect_rag::Corpus;

const TITLES: &[(&str, &str)] = &[
    ("Team Meeting", "Work"),
    ("Morning Run", "Health"),
    ("Dinner with Friends", "Social"),
    ("Project Review", "Work"),
    ("Piano Practice", "Hobby"),
    ("Grocery Shopping", "Errand"),
];

fn sample_corpus(days: usize) -> Corpus {
    let mut events: Vec<Value> = Vec::new();
    let mut conversations: Vec<Value> = Vec::new();

    for day in 0..days {
        let date = format!("2025-{:02}-{:02}", 1 + day / 28, 1 + day % 28);
        for (slot, (title, kind)) in TITLES.iter().enumerate() {
            let id = format!("e{day}-{slot}");
            events.push(json!({
                "id": id,
                "title": title,
                "type": kind,
                "start": format!("{date}T{:02}:00:00+09:00", 7 + slot * 2),
                "emotion_score": 1 + (day + slot) % 5,
            }));
            conversations.push(json!({
                "id": format!("c{day}-{slot}"),
                "bot_question": format!("How was {title}?"),
                "user_answer": "it was calm and productive, felt good about the progress",
                "event_info": {"id": id},
            }));
        }
    }

    normalize_corpus("bench", &events, &conversations).0
}

fn graph_build_benchmark(c: &mut Criterion) {
    let corpus = sample_corpus(60);
    let builder = GraphBuilder::default();

    c.bench_function("graph_build_360_events", |b| {
        b.iter(|| {
            let (graph, _) = builder.build(black_box(&corpus));
            black_box(graph.edge_count());
        });
    });
}

fn cascade_benchmark(c: &mut Criterion) {
    let corpus = sample_corpus(60);
    let (graph, _) = GraphBuilder::default().build(&corpus);
    let engine = GraphQueryEngine::new(&graph);

    c.bench_function("cascade_keyword_query", |b| {
        b.iter(|| black_box(engine.search(black_box("team meeting review"), 5)));
    });

    c.bench_function("cascade_emotion_query", |b| {
        b.iter(|| black_box(engine.search(black_box("what felt good"), 5)));
    });

    c.bench_function("cascade_centrality_fallback", |b| {
        b.iter(|| black_box(engine.search(black_box("xylophone"), 5)));
    });
}

fn merge_benchmark(c: &mut Criterion) {
    let corpus = sample_corpus(10);
    let documents = VectorDocument::from_corpus(&corpus);
    let vector: Vec<SearchResult> = documents
        .iter()
        .enumerate()
        .map(|(i, doc)| doc.to_result(1.0 / (i + 1) as f64))
        .collect();
    let (graph, _) = GraphBuilder::default().build(&corpus);
    let graph_results = GraphQueryEngine::new(&graph).search("morning run", 20).results;
    let weights = QueryIntent::classify("morning run").weights();

    c.bench_function("hybrid_merge", |b| {
        b.iter(|| {
            let merged = merge_results(
                black_box(vector.clone()),
                black_box(graph_results.clone()),
                weights,
                10,
            );
            black_box(merged.len());
        });
    });
}

criterion_group!(retrieval, graph_build_benchmark, cascade_benchmark, merge_benchmark);
criterion_main!(retrieval);
