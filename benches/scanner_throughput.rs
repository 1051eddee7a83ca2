//! Risk scanner throughput benchmarks.
//!
//! Measures scan cost for clean, flagged and near-ceiling payloads.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use gg_sandbox::security::RiskScanner;

const CLEAN: &str = r#"
const items = [3, 1, 4, 1, 5, 9, 2, 6];
const sorted = [...items].sort((a, b) => a - b);
const total = sorted.reduce((acc, n) => acc + n, 0);
console.log(`sorted=${sorted.join(',')} total=${total}`);
"#;

const FLAGGED: &str = r#"
const cp = require('child_process');
const input = prompt('command?');
document.body.innerHTML = input;
eval(input);
cp.exec('rm -rf /tmp/x');
"#;

fn payload(target_bytes: usize) -> String {
    let mut code = String::with_capacity(target_bytes + CLEAN.len());
    while code.len() < target_bytes {
        code.push_str(CLEAN);
    }
    code
}

fn bench_scan_snippets(c: &mut Criterion) {
    let scanner = RiskScanner::default();
    let mut group = c.benchmark_group("scan_snippet");

    for (name, code) in [("clean", CLEAN), ("flagged", FLAGGED)] {
        group.throughput(Throughput::Bytes(code.len() as u64));
        group.bench_function(BenchmarkId::new("kind", name), |b| {
            b.iter(|| scanner.scan(black_box(code)))
        });
    }

    group.finish();
}

fn bench_scan_sizes(c: &mut Criterion) {
    let scanner = RiskScanner::default();
    let mut group = c.benchmark_group("scan_size");

    for (name, size) in [("1k", 1024), ("16k", 16 * 1024), ("100k", 100 * 1024)] {
        let code = payload(size);
        group.throughput(Throughput::Bytes(code.len() as u64));
        group.bench_function(BenchmarkId::new("clean", name), |b| {
            b.iter(|| scanner.scan(black_box(&code)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_scan_snippets, bench_scan_sizes);
criterion_main!(benches);
