use course_rag::embeddings::chunking::{ChunkingConfig, chunk_text};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn course_document() -> String {
    let mut text = String::new();
    for unit in 1..=40 {
        text.push_str(&format!("Unit {}: Data Structures and Algorithms\n\n", unit));
        for topic in 1..=6 {
            text.push_str(&format!(
                "Topic {}.{} introduces the abstract data type, its operations and their \
                 complexity. Students implement it in the weekly lab and compare it with the \
                 array based version. Assessment includes a short quiz and a programming task. ",
                unit, topic
            ));
        }
        text.push_str("\n\n");
    }
    text
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let document = course_document();
    let config = ChunkingConfig::default();
    c.bench_function("chunking", |b| {
        b.iter(|| chunk_text(black_box(&document), black_box(&config)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
