//! Policy engine benchmarks.
//!
//! `evaluate` sits on the hot path of every tool call, so regressions here
//! show up as per-action latency.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tamalebot::policy::{ActionKind, PolicyConfig, PolicyEngine};

fn bench_evaluate(c: &mut Criterion) {
    let engine = PolicyEngine::new(PolicyConfig::standard());

    c.bench_function("command_allowed", |b| {
        b.iter(|| {
            engine.evaluate(
                black_box(ActionKind::Command),
                black_box("cargo build --release"),
            )
        })
    });

    c.bench_function("command_blocked", |b| {
        b.iter(|| {
            engine.evaluate(
                black_box(ActionKind::Command),
                black_box("sudo rm -rf / --no-preserve-root"),
            )
        })
    });

    c.bench_function("file_read", |b| {
        b.iter(|| {
            engine.evaluate(
                black_box(ActionKind::FileRead),
                black_box("/home/agent/projects/notes.md"),
            )
        })
    });

    let domains = PolicyEngine::new(PolicyConfig {
        allowed_domains: vec![
            "api.anthropic.com".to_string(),
            "api.openai.com".to_string(),
        ],
        ..Default::default()
    });
    c.bench_function("http_request_allow_list", |b| {
        b.iter(|| {
            domains.evaluate(
                black_box(ActionKind::HttpRequest),
                black_box("https://api.anthropic.com/v1/messages"),
            )
        })
    });
}

criterion_group!(benches, bench_evaluate);
criterion_main!(benches);
