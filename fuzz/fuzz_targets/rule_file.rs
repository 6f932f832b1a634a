#![no_main]

use libfuzzer_sys::fuzz_target;
use xdpfwd_engine::iface::StaticInterfaces;
use xdpfwd_engine::rule::RuleSet;

fuzz_target!(|data: &[u8]| {
    // TOML 파서는 &str을 받으므로 UTF-8 변환 필요
    let Ok(content) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(set) = RuleSet::from_toml(content) else {
        return;
    };

    let resolver = StaticInterfaces::default().with("eth1", 3);
    if let Ok(compiled) = set.compile(16, &resolver) {
        assert!(compiled.len() <= 16);
        assert!(compiled.len() <= set.enabled_count());
    }
});
