//! 통계 수집 — PerCpuArray 카운터 슬롯 합산
//!
//! [`snapshot`]은 모든 CPU의 [`StatsSlot`]을 잠금 없이 읽어 합산합니다.
//! [`TrafficStats`]는 연속된 스냅샷의 차이로 초당 비율을 계산하고,
//! [`StatsAggregator`]는 설정된 표시 모드(누적/초당)로 보고서를 만듭니다.
//!
//! # 데이터 흐름
//! ```text
//! PerCpuArray (kernel) ──snapshot──▶ AggregatedStats ──update──▶ TrafficStats
//!                       (CPU별 값 합산)                          (rate 계산)
//! ```

use std::fmt;
use std::time::Instant;

use serde::Serialize;

use xdpfwd_common::StatsSlot;
use xdpfwd_core::error::TableError;
use xdpfwd_core::metrics as m;

use crate::tables::CounterTable;

/// CPU별 슬롯을 합산한 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatedStats {
    pub totals: StatsSlot,
    /// 읽은 CPU 슬롯 수
    pub cpus: usize,
}

/// 슬롯 목록을 합산합니다.
pub fn aggregate(slots: &[StatsSlot]) -> AggregatedStats {
    let mut totals = StatsSlot::zeroed();
    for slot in slots {
        totals.merge(slot);
    }
    AggregatedStats {
        totals,
        cpus: slots.len(),
    }
}

/// 카운터 테이블을 읽어 합산합니다.
///
/// 슬롯마다 읽는 시점이 조금씩 다를 수 있지만 모든 값이 단조 증가하므로
/// 결과는 항상 실제 값의 하한입니다.
pub fn snapshot(counters: &impl CounterTable) -> Result<AggregatedStats, TableError> {
    counters.read_slots().map(|slots| aggregate(&slots))
}

/// 판정 카테고리별 메트릭
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerdictMetrics {
    /// 패킷 수 (누적)
    pub packets: u64,
    /// 초당 패킷 수
    pub pps: f64,
}

/// 전체 트래픽 메트릭
#[derive(Debug, Clone, Default, Serialize)]
pub struct TotalMetrics {
    pub packets: u64,
    pub bytes: u64,
    pub pps: f64,
    /// 초당 비트 수
    pub bps: f64,
}

/// 트래픽 통계 (누적 + 비율)
///
/// `update_at()`을 호출할 때마다 이전 스냅샷과의 차이(delta)를 경과 시간으로
/// 나누어 비율을 계산합니다. 첫 번째 호출에서는 비율이 0입니다.
#[derive(Debug, Clone, Serialize)]
pub struct TrafficStats {
    pub total: TotalMetrics,
    pub passed: VerdictMetrics,
    pub dropped: VerdictMetrics,
    pub redirected: VerdictMetrics,
    pub parse_errors: VerdictMetrics,
    /// 마지막 업데이트 시각 (rate 계산용, 직렬화 제외)
    #[serde(skip)]
    last_poll: Option<Instant>,
    /// 이전 폴링의 원시 값 (delta 계산용, 직렬화 제외)
    #[serde(skip)]
    prev_raw: Option<StatsSlot>,
}

impl TrafficStats {
    /// 제로 초기화된 통계를 생성합니다.
    pub fn new() -> Self {
        Self {
            total: TotalMetrics::default(),
            passed: VerdictMetrics::default(),
            dropped: VerdictMetrics::default(),
            redirected: VerdictMetrics::default(),
            parse_errors: VerdictMetrics::default(),
            last_poll: None,
            prev_raw: None,
        }
    }

    /// 현재 시각 기준으로 업데이트합니다.
    pub fn update(&mut self, raw: StatsSlot) {
        self.update_at(raw, Instant::now());
    }

    /// 합산된 슬롯으로부터 메트릭을 업데이트합니다.
    pub fn update_at(&mut self, raw: StatsSlot, now: Instant) {
        self.set_cumulative(&raw);

        match (&self.prev_raw, self.last_poll) {
            (Some(prev), Some(last_time)) => {
                let elapsed = now.saturating_duration_since(last_time).as_secs_f64();
                if elapsed > 0.0 {
                    let prev = *prev;
                    self.compute_rates(&raw, &prev, elapsed);
                }
            }
            _ => self.clear_rates(),
        }

        self.prev_raw = Some(raw);
        self.last_poll = Some(now);

        metrics::counter!(m::PACKETS_TOTAL).absolute(self.total.packets);
        metrics::counter!(m::BYTES_TOTAL).absolute(self.total.bytes);
        for (verdict, stats) in self.verdicts() {
            metrics::counter!(m::VERDICT_PACKETS_TOTAL, m::LABEL_VERDICT => verdict)
                .absolute(stats.packets);
        }
        metrics::gauge!(m::PACKETS_PER_SECOND).set(self.total.pps);
        metrics::gauge!(m::BITS_PER_SECOND).set(self.total.bps);
    }

    /// 통계를 초기화합니다.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn verdicts(&self) -> [(&'static str, &VerdictMetrics); 4] {
        [
            ("pass", &self.passed),
            ("drop", &self.dropped),
            ("redirect", &self.redirected),
            ("parse_error", &self.parse_errors),
        ]
    }

    fn set_cumulative(&mut self, raw: &StatsSlot) {
        self.total.packets = raw.packets;
        self.total.bytes = raw.bytes;
        self.passed.packets = raw.passed;
        self.dropped.packets = raw.dropped;
        self.redirected.packets = raw.redirected;
        self.parse_errors.packets = raw.parse_errors;
    }

    fn clear_rates(&mut self) {
        self.total.pps = 0.0;
        self.total.bps = 0.0;
        self.passed.pps = 0.0;
        self.dropped.pps = 0.0;
        self.redirected.pps = 0.0;
        self.parse_errors.pps = 0.0;
    }

    // u64 → f64: 폴링 간격의 delta는 실용적으로 2^53 미만
    #[allow(clippy::cast_precision_loss)]
    fn compute_rates(&mut self, current: &StatsSlot, prev: &StatsSlot, elapsed_secs: f64) {
        let rate = |cur: u64, old: u64| cur.saturating_sub(old) as f64 / elapsed_secs;

        self.total.pps = rate(current.packets, prev.packets);
        // bytes → bits: *8
        self.total.bps = rate(current.bytes, prev.bytes) * 8.0;
        self.passed.pps = rate(current.passed, prev.passed);
        self.dropped.pps = rate(current.dropped, prev.dropped);
        self.redirected.pps = rate(current.redirected, prev.redirected);
        self.parse_errors.pps = rate(current.parse_errors, prev.parse_errors);
    }
}

impl Default for TrafficStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 통계 표시 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatsMode {
    /// 시작 이후 누적값
    #[default]
    Cumulative,
    /// 직전 스냅샷 대비 초당 비율
    PerSecond,
}

/// 한 번의 집계 결과
#[derive(Debug, Clone, PartialEq)]
pub enum StatsReport {
    Cumulative {
        packets: u64,
        bytes: u64,
        passed: u64,
        dropped: u64,
        redirected: u64,
        parse_errors: u64,
    },
    PerSecond {
        pps: f64,
        bps: f64,
        passed: f64,
        dropped: f64,
        redirected: f64,
        parse_errors: f64,
    },
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cumulative {
                packets,
                bytes,
                passed,
                dropped,
                redirected,
                parse_errors,
            } => write!(
                f,
                "packets={packets} bytes={bytes} pass={passed} drop={dropped} redirect={redirected} parse_errors={parse_errors}"
            ),
            Self::PerSecond {
                pps,
                bps,
                passed,
                dropped,
                redirected,
                parse_errors,
            } => write!(
                f,
                "pps={pps:.1} bps={bps:.1} pass/s={passed:.1} drop/s={dropped:.1} redirect/s={redirected:.1} parse_errors/s={parse_errors:.1}"
            ),
        }
    }
}

/// 주기적 통계 집계기
#[derive(Debug, Clone, Default)]
pub struct StatsAggregator {
    mode: StatsMode,
    stats: TrafficStats,
}

impl StatsAggregator {
    pub fn new(mode: StatsMode) -> Self {
        Self {
            mode,
            stats: TrafficStats::new(),
        }
    }

    pub fn mode(&self) -> StatsMode {
        self.mode
    }

    pub fn stats(&self) -> &TrafficStats {
        &self.stats
    }

    /// 카운터 테이블을 읽고 설정된 모드의 보고서를 반환합니다.
    pub fn poll(&mut self, counters: &impl CounterTable, now: Instant) -> Result<StatsReport, TableError> {
        let aggregated = snapshot(counters)?;
        self.stats.update_at(aggregated.totals, now);
        Ok(self.report())
    }

    /// 마지막 업데이트 기준 보고서
    pub fn report(&self) -> StatsReport {
        let s = &self.stats;
        match self.mode {
            StatsMode::Cumulative => StatsReport::Cumulative {
                packets: s.total.packets,
                bytes: s.total.bytes,
                passed: s.passed.packets,
                dropped: s.dropped.packets,
                redirected: s.redirected.packets,
                parse_errors: s.parse_errors.packets,
            },
            StatsMode::PerSecond => StatsReport::PerSecond {
                pps: s.total.pps,
                bps: s.total.bps,
                passed: s.passed.pps,
                dropped: s.dropped.pps,
                redirected: s.redirected.pps,
                parse_errors: s.parse_errors.pps,
            },
        }
    }
}
