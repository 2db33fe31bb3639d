//! 분류/그룹 버퍼 벤치마크
//!
//! 라인 분류 처리량과 스택 트레이스 병합 비용을 측정합니다.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use stackfold_aggregator::classifier::LineClassifier;
use stackfold_aggregator::group::{FlushReason, GroupBuffer};
use stackfold_core::types::LogLine;

const MIXED_LINES: &[&str] = &[
    "2024-01-15T12:00:00Z INFO request handled path=/api/users status=200",
    "java.lang.IllegalStateException: connection pool exhausted",
    "    at com.example.db.Pool.acquire(Pool.java:118)",
    "    at com.example.api.UserService.find(UserService.java:42)",
    "    ... 12 more",
    "Traceback (most recent call last):",
    "  File \"/app/worker.py\", line 31, in run",
    "    result = handler(job)",
    "KeyError: 'user_id'",
    "GET /health 200 1ms",
];

fn java_trace(frames: usize) -> Vec<String> {
    let mut lines = vec!["java.lang.RuntimeException: boom".to_owned()];
    for i in 0..frames {
        lines.push(format!("    at com.example.Frame{i}.call(Frame{i}.java:{i})"));
    }
    lines
}

fn bench_classify(c: &mut Criterion) {
    let classifier = LineClassifier::with_builtins(&["java", "python"]).unwrap();
    let mut group = c.benchmark_group("classify");
    group.throughput(Throughput::Elements(MIXED_LINES.len() as u64));

    group.bench_function("mixed_lines", |b| {
        b.iter(|| {
            for line in MIXED_LINES {
                black_box(classifier.classify(black_box(line)));
            }
        });
    });

    let plain_only = LineClassifier::new();
    group.bench_function("no_dialects", |b| {
        b.iter(|| {
            for line in MIXED_LINES {
                black_box(plain_only.classify(black_box(line)));
            }
        });
    });

    group.finish();
}

fn bench_group_merge(c: &mut Criterion) {
    let classifier = LineClassifier::with_builtins(&["java"]).unwrap();
    let mut group = c.benchmark_group("group_merge");

    for frames in [10usize, 100, 500] {
        let lines = java_trace(frames);
        let classified: Vec<_> = lines
            .iter()
            .map(|l| (l.clone(), classifier.classify(l)))
            .collect();

        group.throughput(Throughput::Elements(classified.len() as u64));
        group.bench_with_input(BenchmarkId::new("java_trace", frames), &classified, |b, input| {
            b.iter(|| {
                let mut buffer = GroupBuffer::new(1000, 1024 * 1024);
                for (text, class) in input {
                    black_box(buffer.offer(LogLine::new("bench", text.as_str()), class.clone()));
                }
                black_box(buffer.flush(FlushReason::Timeout))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_classify, bench_group_merge);
criterion_main!(benches);
