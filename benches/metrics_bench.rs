use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vitals_rs::math::{
    metrics::{History, Metrics},
    smoothing::SmoothingBuffer,
};

fn full_history() -> History {
    let mut history = History::default();
    for i in 0..300 {
        history.push(60.0 + (i % 40) as f64, i * 1000);
    }
    history
}

fn bench_metrics(c: &mut Criterion) {
    let history = full_history();
    c.bench_function("metrics_300", |b| {
        b.iter(|| Metrics::from_history(black_box(&history)))
    });

    let mut buffer = SmoothingBuffer::default();
    c.bench_function("smoothing_push_median", |b| {
        b.iter(|| {
            buffer.push(black_box(72.0));
            buffer.median()
        })
    });
}

criterion_group!(benches, bench_metrics);
criterion_main!(benches);
