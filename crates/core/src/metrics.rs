//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `xdpfwd_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(xdpfwd_core::metrics::PACKETS_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 판정 레이블 키 (pass, drop, redirect, parse_error)
pub const LABEL_VERDICT: &str = "verdict";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

/// 어태치 인터페이스 레이블 키 (익스포터가 모든 시리즈에 붙임)
pub const LABEL_INTERFACE: &str = "interface";

// ─── 데이터패스 메트릭 ──────────────────────────────────────────────

/// 분류기가 처리한 전체 패킷 수 (counter)
pub const PACKETS_TOTAL: &str = "xdpfwd_packets_total";

/// 분류기가 처리한 전체 바이트 수 (counter)
pub const BYTES_TOTAL: &str = "xdpfwd_bytes_total";

/// 판정별 패킷 수 (counter, label: verdict)
pub const VERDICT_PACKETS_TOTAL: &str = "xdpfwd_verdict_packets_total";

/// 초당 패킷 처리량 (gauge)
pub const PACKETS_PER_SECOND: &str = "xdpfwd_packets_per_second";

/// 초당 비트 처리량 (gauge)
pub const BITS_PER_SECOND: &str = "xdpfwd_bits_per_second";

// ─── 컨트롤 플레인 메트릭 ────────────────────────────────────────────

/// 현재 룰 테이블에 적용된 룰 수 (gauge)
pub const RULES_LOADED: &str = "xdpfwd_rules_loaded";

/// 룰 리로드 시도 수 (counter, label: result)
pub const RULE_RELOADS_TOTAL: &str = "xdpfwd_rule_reloads_total";

/// 사용자 공간으로 전달된 감사 이벤트 수 (counter)
pub const AUDIT_EVENTS_TOTAL: &str = "xdpfwd_audit_events_total";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(PACKETS_TOTAL, "Total number of packets seen by the XDP classifier");
    describe_counter!(BYTES_TOTAL, "Total bytes seen by the XDP classifier");
    describe_counter!(
        VERDICT_PACKETS_TOTAL,
        "Packets per verdict (pass, drop, redirect, parse_error)"
    );
    describe_gauge!(PACKETS_PER_SECOND, "Current packet rate (packets/sec)");
    describe_gauge!(BITS_PER_SECOND, "Current throughput rate (bits/sec)");
    describe_gauge!(RULES_LOADED, "Number of rules currently in the rule table");
    describe_counter!(
        RULE_RELOADS_TOTAL,
        "Rule reload attempts by result (success, failure)"
    );
    describe_counter!(
        AUDIT_EVENTS_TOTAL,
        "Audit event records delivered to userspace"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        PACKETS_TOTAL,
        BYTES_TOTAL,
        VERDICT_PACKETS_TOTAL,
        PACKETS_PER_SECOND,
        BITS_PER_SECOND,
        RULES_LOADED,
        RULE_RELOADS_TOTAL,
        AUDIT_EVENTS_TOTAL,
    ];

    #[test]
    fn all_metrics_start_with_xdpfwd_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("xdpfwd_"),
                "Metric '{}' does not start with 'xdpfwd_' prefix",
                name
            );
        }
    }

    #[test]
    fn counters_end_with_total() {
        for name in [PACKETS_TOTAL, BYTES_TOTAL, VERDICT_PACKETS_TOTAL, RULE_RELOADS_TOTAL, AUDIT_EVENTS_TOTAL] {
            assert!(name.ends_with("_total"), "counter '{}' must end with _total", name);
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_VERDICT, LABEL_RESULT, LABEL_INTERFACE] {
            assert_eq!(label.to_lowercase(), label);
        }
    }
}
