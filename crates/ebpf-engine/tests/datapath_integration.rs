//! 통합 테스트 -- 룰 컴파일 → 룰 테이블 → 에뮬레이션 분류기 흐름 검증
//!
//! 커널 XDP 프로그램과 같은 공유 매칭 로직을 에뮬레이션 데이터패스로 실행해
//! 판정, CPU별 카운터, 리로드, 감사 링 동작을 확인합니다.

use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use xdpfwd_common::MAX_RULES;
use xdpfwd_core::error::{ConfigError, XdpFwdError};
use xdpfwd_engine::classifier::frame;
use xdpfwd_engine::datapath::emulated::{EmulatedDatapath, XdpVerdict};
use xdpfwd_engine::iface::StaticInterfaces;
use xdpfwd_engine::pin::PinManager;
use xdpfwd_engine::stats::snapshot;
use xdpfwd_engine::sync::{ConfigSync, RuleSource};
use xdpfwd_engine::tables::{EventChannel, RuleTable};
use xdpfwd_engine::{AuditRecord, RuleAction, RuleSet};

const CLIENT: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);
const HOST_5: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
const HOST_6: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 6);

fn load_rules(datapath: &EmulatedDatapath, toml: &str) {
    let compiled = RuleSet::from_toml(toml)
        .expect("rule file should parse")
        .compile(MAX_RULES, &StaticInterfaces::default())
        .expect("rule set should compile");
    datapath
        .handles()
        .rules
        .replace(&compiled, true)
        .expect("table write should succeed");
}

fn verdict_for(datapath: &EmulatedDatapath, dst: Ipv4Addr) -> XdpVerdict {
    let mut pkt = frame::udp(CLIENT, dst, 40000, 53);
    datapath.kernel().process(0, 1, &mut pkt)
}

/// 버전을 직접 올리는 메모리 룰 소스
struct MemorySource {
    state: Mutex<(SystemTime, String)>,
}

impl MemorySource {
    fn new(content: &str) -> Self {
        Self {
            state: Mutex::new((SystemTime::UNIX_EPOCH, content.to_owned())),
        }
    }

    fn replace(&self, content: &str) {
        let mut state = self.state.lock().unwrap();
        state.0 += Duration::from_secs(1);
        state.1 = content.to_owned();
    }
}

impl RuleSource for MemorySource {
    fn describe(&self) -> String {
        "memory".to_owned()
    }

    fn modified(&self) -> Result<SystemTime, ConfigError> {
        Ok(self.state.lock().unwrap().0)
    }

    fn load(&self) -> Result<RuleSet, ConfigError> {
        RuleSet::from_toml(&self.state.lock().unwrap().1)
    }
}

// =============================================================================
// 판정
// =============================================================================

#[test]
fn test_single_drop_rule_with_default_pass() {
    // Given: dst=10.0.0.5 drop, default pass
    let datapath = EmulatedDatapath::builder().build();
    load_rules(
        &datapath,
        "default_action = \"pass\"\n[[rules]]\ndst = \"10.0.0.5\"\naction = \"drop\"\n",
    );

    // When / Then
    assert_eq!(verdict_for(&datapath, HOST_5), XdpVerdict::Drop);
    assert_eq!(verdict_for(&datapath, HOST_6), XdpVerdict::Pass);
}

#[test]
fn test_higher_priority_rule_wins_over_earlier_rule() {
    // Given: /24 pass (priority 1) declared before /32 drop (priority 5)
    let datapath = EmulatedDatapath::builder().build();
    load_rules(
        &datapath,
        r#"
[[rules]]
dst = "10.0.0.0/24"
action = "pass"
priority = 1

[[rules]]
dst = "10.0.0.5/32"
action = "drop"
priority = 5
"#,
    );

    // Then: 10.0.0.5 is dropped, the rest of the /24 passes
    assert_eq!(verdict_for(&datapath, HOST_5), XdpVerdict::Drop);
    assert_eq!(verdict_for(&datapath, HOST_6), XdpVerdict::Pass);

    // 감사 레코드의 룰 ID는 선언 순서 기준
    let rules = datapath.kernel().active_rules();
    assert_eq!(rules[0].rule_id, 2);
    assert_eq!(rules[1].rule_id, 1);
}

#[test]
fn test_equal_priority_uses_declaration_order() {
    let datapath = EmulatedDatapath::builder().build();
    load_rules(
        &datapath,
        "[[rules]]\ndst = \"10.0.0.5\"\naction = \"pass\"\n[[rules]]\ndst = \"10.0.0.5\"\naction = \"drop\"\n",
    );
    assert_eq!(verdict_for(&datapath, HOST_5), XdpVerdict::Pass);
}

#[test]
fn test_default_drop_applies_to_unmatched_and_non_ipv4() {
    let datapath = EmulatedDatapath::builder().build();
    load_rules(
        &datapath,
        "default_action = \"drop\"\n[[rules]]\ndst = \"10.0.0.6\"\naction = \"pass\"\n",
    );

    assert_eq!(verdict_for(&datapath, HOST_5), XdpVerdict::Drop);
    assert_eq!(verdict_for(&datapath, HOST_6), XdpVerdict::Pass);

    // ARP 프레임은 파싱 실패가 아니라 기본 판정
    let mut arp = frame::udp(CLIENT, HOST_6, 1, 1);
    arp[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
    assert_eq!(datapath.kernel().process(0, 1, &mut arp), XdpVerdict::Drop);
    let totals = snapshot(&datapath.handles().counters).unwrap().totals;
    assert_eq!(totals.parse_errors, 0);
}

#[test]
fn test_verdict_independent_of_cpu() {
    let datapath = EmulatedDatapath::builder().cpus(4).build();
    load_rules(&datapath, "[[rules]]\ndst = \"10.0.0.5\"\naction = \"drop\"\n");
    let kernel = datapath.kernel();

    for cpu in 0..4 {
        let mut pkt = frame::tcp(CLIENT, HOST_5, 1234, 22);
        assert_eq!(kernel.process(cpu, 1, &mut pkt), XdpVerdict::Drop);
    }
}

// =============================================================================
// 카운터
// =============================================================================

#[test]
fn test_per_cpu_counters_sum_to_packet_count() {
    // Given: 4 CPUs processing concurrently
    let datapath = EmulatedDatapath::builder().cpus(4).build();
    load_rules(&datapath, "[[rules]]\ndst = \"10.0.0.5\"\naction = \"drop\"\n");
    let kernel = datapath.kernel();
    const PER_CPU: usize = 2_500;

    // When
    std::thread::scope(|scope| {
        for cpu in 0..4 {
            let kernel = &kernel;
            scope.spawn(move || {
                for i in 0..PER_CPU {
                    let dst = if i % 2 == 0 { HOST_5 } else { HOST_6 };
                    let mut pkt = frame::udp(CLIENT, dst, 40000, 53);
                    kernel.process(cpu, 1, &mut pkt);
                }
            });
        }
    });

    // Then
    let agg = snapshot(&datapath.handles().counters).unwrap();
    assert_eq!(agg.cpus, 4);
    assert_eq!(agg.totals.packets, (4 * PER_CPU) as u64);
    assert_eq!(agg.totals.dropped, (2 * PER_CPU) as u64);
    assert_eq!(agg.totals.passed, (2 * PER_CPU) as u64);
    assert_eq!(
        agg.totals.passed + agg.totals.dropped + agg.totals.redirected,
        agg.totals.packets
    );
}

#[test]
fn test_truncated_packet_counted_as_parse_error() {
    let datapath = EmulatedDatapath::builder().build();
    load_rules(&datapath, "[[rules]]\naction = \"drop\"\n");

    let full = frame::tcp(CLIENT, HOST_5, 1, 2);
    let mut truncated = full[..30].to_vec();
    assert_eq!(
        datapath.kernel().process(0, 1, &mut truncated),
        XdpVerdict::Pass
    );

    let totals = snapshot(&datapath.handles().counters).unwrap().totals;
    assert_eq!(totals.parse_errors, 1);
    assert_eq!(totals.passed, 1);
    assert_eq!(datapath.kernel().pending_events(), 0);
}

// =============================================================================
// 리로드
// =============================================================================

#[test]
fn test_invalid_reload_keeps_effective_verdicts() {
    // Given: a working rule set applied
    let datapath = EmulatedDatapath::builder().build();
    let mut table = datapath.handles().rules;
    let mut sync = ConfigSync::new(
        MemorySource::new("[[rules]]\ndst = \"10.0.0.5\"\naction = \"drop\"\n"),
        StaticInterfaces::default(),
        MAX_RULES,
        true,
    );
    sync.apply_initial(&mut table).unwrap();
    let held_out = [HOST_5, HOST_6, Ipv4Addr::new(10, 9, 9, 9)];
    let before: Vec<_> = held_out.iter().map(|&dst| verdict_for(&datapath, dst)).collect();

    // When: the source becomes invalid (redirect without a target)
    sync.source()
        .replace("[[rules]]\ndst = \"10.0.0.6\"\naction = \"redirect\"\n");
    let err = sync.sync(&mut table).unwrap_err();

    // Then
    assert!(matches!(err, XdpFwdError::Config(ConfigError::InvalidRule { .. })));
    let after: Vec<_> = held_out.iter().map(|&dst| verdict_for(&datapath, dst)).collect();
    assert_eq!(before, after);
}

#[test]
fn test_reload_over_capacity_keeps_previous_rules() {
    let datapath = EmulatedDatapath::builder().rule_capacity(2).build();
    let mut table = datapath.handles().rules;
    let mut sync = ConfigSync::new(
        MemorySource::new("[[rules]]\ndst = \"10.0.0.5\"\naction = \"drop\"\n"),
        StaticInterfaces::default(),
        table.capacity(),
        false,
    );
    sync.apply_initial(&mut table).unwrap();

    let three: String = (1..=3)
        .map(|i| format!("[[rules]]\ndst = \"10.0.1.{i}\"\naction = \"drop\"\n"))
        .collect();
    sync.source().replace(&three);
    assert!(matches!(
        sync.sync(&mut table).unwrap_err(),
        XdpFwdError::Capacity(_)
    ));
    assert_eq!(verdict_for(&datapath, HOST_5), XdpVerdict::Drop);
    assert_eq!(datapath.kernel().settings().rule_count, 1);
}

// =============================================================================
// 감사 채널
// =============================================================================

#[tokio::test]
async fn test_audit_overflow_never_blocks_and_never_duplicates() {
    // Given: a tiny ring and a rule that fires for every packet
    let datapath = EmulatedDatapath::builder().audit_capacity(8).build();
    load_rules(&datapath, "[[rules]]\naction = \"drop\"\n");
    let kernel = datapath.kernel();
    const DECISIONS: u64 = 10_000;

    // When: sustained overflow with no consumer
    for i in 0..DECISIONS {
        let mut pkt = frame::udp(CLIENT, HOST_5, (i % 60_000) as u16, 53);
        assert_eq!(kernel.process(0, 1, &mut pkt), XdpVerdict::Drop);
    }

    // Then: every packet was counted, the ring kept at most its capacity
    let totals = snapshot(&datapath.handles().counters).unwrap().totals;
    assert_eq!(totals.packets, DECISIONS);
    assert_eq!(kernel.pending_events(), 8);
    assert_eq!(kernel.lost_events(), DECISIONS - 8);

    let mut events = datapath.handles().events.unwrap();
    let mut delivered = 0u64;
    loop {
        let batch = events.poll(Duration::ZERO, 3).await.unwrap();
        if batch.is_empty() {
            break;
        }
        delivered += batch.len() as u64;
    }
    assert!(delivered <= DECISIONS);
    assert_eq!(delivered, 8);
}

#[tokio::test]
async fn test_audit_record_describes_rule_hit() {
    let datapath = EmulatedDatapath::builder().interface("eth1", 9).build();
    let compiled = RuleSet::from_toml(
        "[[rules]]\ndst = \"10.0.0.5\"\nprotocol = \"udp\"\ndst_port = 53\naction = \"redirect\"\nredirect_interface = \"eth1\"\n",
    )
    .unwrap()
    .compile(MAX_RULES, &StaticInterfaces::default().with("eth1", 9))
    .unwrap();
    datapath.handles().rules.replace(&compiled, true).unwrap();

    let mut pkt = frame::udp(CLIENT, HOST_5, 40000, 53);
    assert_eq!(
        datapath.kernel().process(1, 3, &mut pkt),
        XdpVerdict::Redirect { ifindex: 9 }
    );

    let mut events = datapath.handles().events.unwrap();
    let batch = events.poll(Duration::from_millis(10), 16).await.unwrap();
    assert_eq!(batch.len(), 1);
    let record = AuditRecord::from(&batch[0]);
    assert_eq!(record.rule_id, 1);
    assert_eq!(record.verdict, Some(RuleAction::Redirect));
    assert_eq!(record.ingress_ifindex, 3);
    assert_eq!(record.redirect_ifindex, 9);
    assert_eq!(record.dst, HOST_5);
    assert_eq!(record.dst_port, 53);
}

#[test]
fn test_default_verdict_emits_no_audit_record() {
    let datapath = EmulatedDatapath::builder().build();
    load_rules(&datapath, "[[rules]]\ndst = \"10.0.0.5\"\naction = \"drop\"\n");
    verdict_for(&datapath, HOST_6);
    assert_eq!(datapath.kernel().pending_events(), 0);
}

// =============================================================================
// 핀
// =============================================================================

#[test]
fn test_pin_unpin_pin_leaves_one_valid_pin() {
    let dir = tempfile::tempdir().unwrap();
    let datapath = EmulatedDatapath::builder().build();
    let rules = datapath.handles().rules;

    let mut pins = PinManager::new(dir.path());
    pins.pin_all(&rules).unwrap();
    assert!(pins.unpin("FWD_RULES").unwrap());

    // 비정상 종료로 남은 FWD_SETTINGS 핀 위에 다시 핀
    let mut restarted = PinManager::new(dir.path());
    restarted.pin_all(&rules).unwrap();

    let mut names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["FWD_RULES", "FWD_SETTINGS"]);
}
