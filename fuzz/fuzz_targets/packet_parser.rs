#![no_main]

use std::sync::LazyLock;

use libfuzzer_sys::fuzz_target;
use xdpfwd_common::{MAX_RULES, RuleEntry, Settings};
use xdpfwd_engine::classifier::{classify, parse_frame};
use xdpfwd_engine::iface::StaticInterfaces;
use xdpfwd_engine::rule::RuleSet;

// 포트 범위와 리다이렉트를 섞은 고정 룰 세트
const RULES: &str = r#"
default_action = "drop"

[[rules]]
src = "10.0.0.0/8"
protocol = "tcp"
dst_port = "1-1024"
action = "pass"
priority = 5

[[rules]]
dst = "192.0.2.1"
protocol = "udp"
action = "redirect"
redirect_ifindex = 3

[[rules]]
protocol = "icmp"
action = "drop"
"#;

static TABLE: LazyLock<(Vec<RuleEntry>, Settings)> = LazyLock::new(|| {
    let compiled = RuleSet::from_toml(RULES)
        .expect("fixed rule set parses")
        .compile(MAX_RULES, &StaticInterfaces::default())
        .expect("fixed rule set compiles");
    let settings = compiled.settings(true);
    (compiled.entries, settings)
});

fuzz_target!(|data: &[u8]| {
    let parsed = parse_frame(data);
    let (entries, settings) = &*TABLE;
    let result = classify(data, entries, settings);

    // 파싱 실패면 매치 키가 없어야 함
    assert_eq!(result.parse_fault.is_some(), parsed.is_err());
    if result.parse_fault.is_some() {
        assert!(result.key.is_none());
    }
});
