use criterion::{criterion_group, criterion_main, Criterion};
use engine::index::Document;
use engine::{IndexBuilder, TextNormalizer};

const TEXT: &str = "The 2019 season opened at 10:30 with a 3.14-second delay. Officials said \
    state-of-the-art timing systems, installed last year, failed twice before the race; \
    drivers' complaints were logged and insurers reviewed the auto policies.";

fn bench_normalize(c: &mut Criterion) {
    let normalizer = TextNormalizer::english();
    c.bench_function("normalized_tokens", |b| b.iter(|| normalizer.normalized_tokens("Race day", TEXT)));
}

fn bench_build(c: &mut Criterion) {
    let normalizer = TextNormalizer::english();
    let docs: Vec<Document> = (0..200)
        .map(|id| Document { id, title: format!("Report {id}"), author: String::new(), published_date: None, content: TEXT.repeat(4) })
        .collect();
    let builder = IndexBuilder::new(&normalizer);
    c.bench_function("build_serial_200", |b| b.iter(|| builder.build(&docs)));
    c.bench_function("build_parallel_200", |b| b.iter(|| builder.build_parallel(&docs)));
}

criterion_group!(benches, bench_normalize, bench_build);
criterion_main!(benches);
