//! 패킷 분류 벤치마크
//!
//! 헤더 파싱과 룰 테이블 스캔의 비용을 룰 수에 따라 측정합니다.

use std::net::Ipv4Addr;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use xdpfwd_common::MAX_RULES;
use xdpfwd_engine::classifier::{classify, frame, parse_frame};
use xdpfwd_engine::datapath::emulated::EmulatedDatapath;
use xdpfwd_engine::rule::{Rule, RuleAction, RuleSet};
use xdpfwd_engine::iface::StaticInterfaces;

const SRC: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

/// 마지막 룰만 매칭되는 룰 세트 (최악의 스캔 길이)
fn rule_set(rule_count: usize) -> RuleSet {
    let mut rules: Vec<Rule> = (0..rule_count.saturating_sub(1))
        .map(|i| Rule {
            dst: Some(format!("172.16.{}.{}/32", i / 256, i % 256).parse().unwrap()),
            ..Rule::new(RuleAction::Drop)
        })
        .collect();
    rules.push(Rule {
        dst: Some("10.0.0.0/24".parse().unwrap()),
        ..Rule::new(RuleAction::Drop)
    });
    RuleSet {
        rules,
        ..RuleSet::default()
    }
}

fn bench_parse_frame(c: &mut Criterion) {
    let udp = frame::udp(SRC, DST, 4000, 53);
    let tagged = frame::with_vlan(&udp, 100);

    let mut group = c.benchmark_group("parse_frame");
    group.throughput(Throughput::Elements(1));

    group.bench_function("udp", |b| b.iter(|| parse_frame(black_box(&udp))));
    group.bench_function("vlan_udp", |b| b.iter(|| parse_frame(black_box(&tagged))));

    group.finish();
}

fn bench_classify_scaling(c: &mut Criterion) {
    let pkt = frame::tcp(SRC, DST, 40000, 443);
    let resolver = StaticInterfaces::default();

    let mut group = c.benchmark_group("classify_scaling");

    for rule_count in [1usize, 16, 64, MAX_RULES as usize] {
        let compiled = rule_set(rule_count).compile(MAX_RULES, &resolver).unwrap();
        let settings = compiled.settings(false);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(rule_count), &rule_count, |b, _| {
            b.iter(|| classify(black_box(&pkt), black_box(&compiled.entries), black_box(&settings)))
        });
    }

    group.finish();
}

fn bench_emulated_process(c: &mut Criterion) {
    use xdpfwd_engine::tables::RuleTable;

    let datapath = EmulatedDatapath::builder().cpus(4).build();
    let compiled = rule_set(64)
        .compile(MAX_RULES, &StaticInterfaces::default())
        .unwrap();
    datapath.handles().rules.replace(&compiled, true).unwrap();
    let kernel = datapath.kernel();
    let pkt = frame::tcp(SRC, DST, 40000, 443);

    let mut group = c.benchmark_group("emulated_process");
    group.throughput(Throughput::Elements(1));

    // 링이 가득 찬 뒤의 push 포함
    group.bench_function("drop_with_audit", |b| {
        b.iter(|| {
            let mut frame = pkt.clone();
            kernel.process(0, 1, black_box(&mut frame))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_parse_frame, bench_classify_scaling, bench_emulated_process);
criterion_main!(benches);
