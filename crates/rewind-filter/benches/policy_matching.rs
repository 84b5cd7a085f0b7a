//! Policy matching benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rewind_filter::{DomainPolicy, QueryParam, UrlPattern};
use url::Url;

fn build_policy(patterns: usize) -> DomainPolicy {
    let allowed = (0..patterns)
        .map(|i| UrlPattern::parse(&format!("https://site{i}.example/section{i}")).unwrap())
        .collect();
    let blocked = (0..patterns / 4)
        .map(|i| UrlPattern::parse(&format!("https://blocked{i}.example/")).unwrap())
        .collect();

    let mut policy = DomainPolicy::new();
    policy.set_websites(allowed, blocked);
    policy.set_blocked_params(QueryParam::parse_list("ibp=1|tbm=1|tbm=isch").unwrap());
    policy
}

fn policy_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain_policy");
    group.throughput(Throughput::Elements(1));

    for size in [8usize, 64, 512] {
        let policy = build_policy(size);
        let hit = Url::parse(&format!("https://site{}.example/section{}/page?q=1", size - 1, size - 1)).unwrap();
        let miss = Url::parse("https://unknown.example/page?tbm=0").unwrap();
        let blocked_param = Url::parse("https://site0.example/section0?a=1&tbm=1").unwrap();

        group.bench_function(format!("allowed_hit/{size}"), |b| {
            b.iter(|| policy.is_allowed(black_box(&hit)))
        });
        group.bench_function(format!("allowed_miss/{size}"), |b| {
            b.iter(|| policy.is_allowed(black_box(&miss)))
        });
        group.bench_function(format!("blocked_param/{size}"), |b| {
            b.iter(|| policy.check(black_box(&blocked_param)))
        });
    }

    group.finish();
}

criterion_group!(benches, policy_benchmarks);
criterion_main!(benches);
