//! 라이프사이클 컨트롤러
//!
//! [`Engine`]은 데이터패스를 열고, 룰을 적용하고, 분류기를 어태치한 뒤
//! 하나의 틱 루프에서 룰 동기화, 통계 집계, 감사 이벤트 소비를 각자의 주기로
//! 실행합니다. 빌더 패턴([`EngineBuilder`])으로 생성합니다.
//!
//! # 상태 전이
//! ```text
//! Initializing ──attach ok──▶ AttachedRunning ──cancel / duration──▶ Draining ──▶ Detached
//!      │                              │
//!      └── 시작 실패 (fatal)           └── 치명적 에러: detach + unpin 후 에러 반환
//! ```
//!
//! 종료 신호는 [`CancellationToken`]으로 전달되며 각 틱의 시작에서만 확인합니다.
//! 따라서 루프는 틱 중간이 아니라 최대 한 틱 안에 종료됩니다.
//!
//! # 사용 예시
//! ```ignore
//! let engine = Engine::builder(datapath, FileRuleSource::new(path))
//!     .settings(EngineSettings::from_core(&config))
//!     .build()?;
//! let summary = engine.run(cancel.clone()).await?;
//! ```

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use xdpfwd_common::StatsSlot;
use xdpfwd_core::error::{AttachmentError, XdpFwdError};
use xdpfwd_core::types::AttachMode;

use crate::attach::{AttachBackend, AttachManager};
use crate::audit::{AuditSink, EventDrain, TracingAuditSink};
use crate::config::EngineSettings;
use crate::datapath::{Datapath, DatapathParts};
use crate::iface::InterfaceResolver;
use crate::pin::PinManager;
use crate::stats::{StatsAggregator, StatsReport, snapshot};
use crate::sync::{ConfigSync, RuleSource};
use crate::tables::RuleTable;

/// 종료 시 최종 소비의 최대 반복 횟수
const FINAL_DRAIN_ROUNDS: usize = 16;

/// 라이프사이클 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    AttachedRunning,
    Draining,
    Detached,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::AttachedRunning => "attached-running",
            Self::Draining => "draining",
            Self::Detached => "detached",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 주기 루프가 끝난 이유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 종료 신호 (취소 토큰)
    Cancelled,
    /// 설정된 실행 시간 경과
    DurationElapsed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::DurationElapsed => f.write_str("duration elapsed"),
        }
    }
}

/// 정상 종료한 실행의 요약
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub stop_reason: StopReason,
    pub ifindex: u32,
    /// 실제로 사용된 어태치 모드
    pub mode: AttachMode,
    /// 거쳐 간 단계 (순서대로)
    pub transitions: Vec<Phase>,
    pub ticks: u64,
    /// 시작 이후 성공한 룰 리로드 수
    pub reloads: u64,
    pub events_delivered: u64,
    /// 출력한 통계 보고서 수
    pub stats_reports: u64,
    /// 마지막 통계 보고서
    pub last_stats: Option<StatsReport>,
    /// 종료 시점의 카운터 합계 (읽기 실패 시 `None`)
    pub totals: Option<StatsSlot>,
}

/// XDP 포워딩 엔진
pub struct Engine<D, S, K = TracingAuditSink> {
    datapath: D,
    source: S,
    sink: K,
    settings: EngineSettings,
    phase: watch::Sender<Phase>,
}

/// 엔진 빌더
pub struct EngineBuilder<D, S, K> {
    datapath: D,
    source: S,
    sink: K,
    settings: EngineSettings,
}

impl<D, S, K> EngineBuilder<D, S, K> {
    /// 엔진 설정을 지정합니다 (기본: `EngineSettings::default()`).
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 감사 레코드 싱크를 지정합니다 (기본: [`TracingAuditSink`]).
    pub fn sink<K2>(self, sink: K2) -> EngineBuilder<D, S, K2> {
        EngineBuilder {
            datapath: self.datapath,
            source: self.source,
            sink,
            settings: self.settings,
        }
    }

    /// 엔진을 생성합니다.
    ///
    /// # 에러
    /// - `ConfigError::InvalidValue`: 설정 값이 유효하지 않은 경우
    pub fn build(self) -> Result<Engine<D, S, K>, XdpFwdError> {
        self.settings.validate()?;
        let (phase, _) = watch::channel(Phase::Initializing);
        Ok(Engine {
            datapath: self.datapath,
            source: self.source,
            sink: self.sink,
            settings: self.settings,
            phase,
        })
    }
}

impl<D: Datapath, S: RuleSource> Engine<D, S> {
    /// 빌더를 반환합니다.
    pub fn builder(datapath: D, source: S) -> EngineBuilder<D, S, TracingAuditSink> {
        EngineBuilder {
            datapath,
            source,
            sink: TracingAuditSink,
            settings: EngineSettings::default(),
        }
    }
}

impl<D: Datapath, S: RuleSource, K: AuditSink> Engine<D, S, K> {
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// 단계 변화를 구독합니다.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// 엔진을 실행합니다.
    ///
    /// 취소되거나 실행 시간이 지나면 감사 이벤트를 마지막으로 소비하고,
    /// 분류기를 해제하고, 핀을 제거한 뒤 요약을 반환합니다.
    ///
    /// # 에러
    /// - 시작 단계: 인터페이스 조회, 이미지 로드, 필수 테이블, 초기 룰, 어태치 실패
    /// - 실행 단계: 치명적 에러 (해제/언핀 후 반환)
    pub async fn run(self, cancel: CancellationToken) -> Result<RunSummary, XdpFwdError> {
        let Self {
            mut datapath,
            source,
            sink,
            settings,
            phase,
        } = self;
        let mut transitions = vec![Phase::Initializing];
        phase.send_replace(Phase::Initializing);

        // ─── Initializing ───────────────────────────────────────────────
        info!(
            backend = datapath.name(),
            interface = %settings.interface,
            "initializing xdp forwarding engine"
        );
        datapath.prepare()?;

        let resolver = datapath.resolver();
        let ifindex = resolver
            .resolve(&settings.interface)
            .ok_or_else(|| AttachmentError::InterfaceNotFound {
                name: settings.interface.clone(),
            })?;

        let DatapathParts {
            program,
            mut rules,
            counters,
            events,
        } = datapath.open()?;

        let capacity = settings.rule_capacity.min(rules.capacity());
        if capacity < settings.rule_capacity {
            warn!(
                requested = settings.rule_capacity,
                capacity, "rule capacity limited by image table size"
            );
        }

        let auditing = settings.auditing && events.is_some();
        if settings.auditing && !auditing {
            warn!("audit channel unavailable, auditing disabled");
        }

        // 어태치 전에 룰을 적용해 첫 패킷부터 룰이 보이게 함
        let mut sync = ConfigSync::new(source, resolver, capacity, auditing);
        sync.apply_initial(&mut rules)?;

        let mut attach = AttachManager::new(program);
        let mode = attach.attach(ifindex, &settings.attach_modes)?;

        // ─── Attached-Running ───────────────────────────────────────────
        transitions.push(Phase::AttachedRunning);
        phase.send_replace(Phase::AttachedRunning);
        info!(interface = %settings.interface, ifindex, %mode, "attached, entering run loop");

        let mut pins = settings.pin_maps.then(|| PinManager::new(&settings.pin_dir));
        if let Some(pins) = pins.as_mut() {
            if let Err(e) = pins.pin_all(&rules) {
                warn!(error = %e, "failed to pin tables, continuing without pins");
            }
        }

        let mut drain = events
            .filter(|_| auditing)
            .map(|events| EventDrain::new(events, sink, settings.audit_poll_timeout, settings.audit_max_batch));
        let mut aggregator = StatsAggregator::new(settings.stats_mode);
        let mut stats_reports = 0u64;
        let mut last_stats = None;
        let mut ticks = 0u64;
        // 소비 대기가 틱을 넘기면 취소 확인이 늦어짐
        let drain_timeout = settings.audit_poll_timeout.min(settings.tick);

        let outcome = async {
            let start = Instant::now();
            let deadline = settings.duration.map(|d| start + d);
            let mut next_sync = settings.update_interval.map(|i| start + i);
            let mut next_stats = settings.stats_enabled.then(|| start + settings.stats_interval);

            let mut ticker = tokio::time::interval(settings.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let stop = loop {
                ticker.tick().await;

                if cancel.is_cancelled() {
                    break StopReason::Cancelled;
                }
                let now = Instant::now();
                if deadline.is_some_and(|d| now >= d) {
                    break StopReason::DurationElapsed;
                }
                ticks += 1;

                if next_sync.is_some_and(|due| now >= due) {
                    // 실패는 sync가 보고하고 이전 룰을 유지함
                    match sync.sync(&mut rules) {
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(_) | Ok(_) => {}
                    }
                    next_sync = settings.update_interval.map(|i| now + i);
                }

                if next_stats.is_some_and(|due| now >= due) {
                    match aggregator.poll(&counters, now.into_std()) {
                        Ok(report) => {
                            info!(%report, "traffic stats");
                            stats_reports += 1;
                            last_stats = Some(report);
                        }
                        Err(e) => warn!(error = %e, "failed to read counters"),
                    }
                    next_stats = Some(now + settings.stats_interval);
                }

                if let Some(drain) = drain.as_mut() {
                    if let Err(e) = drain.drain_with(drain_timeout).await {
                        warn!(error = %e, "audit drain failed");
                    }
                }
            };
            Ok::<StopReason, XdpFwdError>(stop)
        }
        .await;

        let stop_reason = match outcome {
            Ok(reason) => reason,
            Err(e) => {
                warn!(error = %e, "fatal error while running, rolling back");
                teardown(&mut attach, pins.as_mut());
                phase.send_replace(Phase::Detached);
                return Err(e);
            }
        };

        // ─── Draining ───────────────────────────────────────────────────
        transitions.push(Phase::Draining);
        phase.send_replace(Phase::Draining);
        info!(reason = %stop_reason, "draining");

        if let Some(drain) = drain.as_mut() {
            for _ in 0..FINAL_DRAIN_ROUNDS {
                match drain.drain_with(Duration::ZERO).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "final audit drain failed");
                        break;
                    }
                }
            }
        }
        let totals = snapshot(&counters).ok().map(|agg| agg.totals);

        // ─── Detached ───────────────────────────────────────────────────
        teardown(&mut attach, pins.as_mut());
        transitions.push(Phase::Detached);
        phase.send_replace(Phase::Detached);

        let summary = RunSummary {
            stop_reason,
            ifindex,
            mode,
            transitions,
            ticks,
            reloads: sync.reloads(),
            events_delivered: drain.as_ref().map_or(0, EventDrain::delivered),
            stats_reports,
            last_stats,
            totals,
        };
        info!(
            reason = %summary.stop_reason,
            mode = %summary.mode,
            ticks = summary.ticks,
            reloads = summary.reloads,
            audit_events = summary.events_delivered,
            packets = summary.totals.map_or(0, |t| t.packets),
            dropped = summary.totals.map_or(0, |t| t.dropped),
            "run summary"
        );
        Ok(summary)
    }
}

/// 분류기를 해제하고 이 프로세스가 만든 핀을 제거합니다.
fn teardown<B: AttachBackend>(attach: &mut AttachManager<B>, pins: Option<&mut PinManager>) {
    for e in attach.detach_all() {
        warn!(error = %e, "failed to detach classifier");
    }
    if let Some(pins) = pins {
        let failures = pins.unpin_all();
        debug!(failures = failures.len(), "tables unpinned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapath::emulated::EmulatedDatapath;
    use crate::sync::FileRuleSource;

    #[test]
    fn phase_names() {
        assert_eq!(Phase::AttachedRunning.to_string(), "attached-running");
        assert_eq!(Phase::Detached.as_str(), "detached");
    }

    #[test]
    fn build_rejects_invalid_settings() {
        let settings = EngineSettings {
            interface: String::new(),
            ..Default::default()
        };
        let result = Engine::builder(
            EmulatedDatapath::builder().build(),
            FileRuleSource::new("/nonexistent"),
        )
        .settings(settings)
        .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn run_fails_for_unknown_interface() {
        let engine = Engine::builder(
            EmulatedDatapath::builder().build(),
            FileRuleSource::new("/nonexistent"),
        )
        .build()
        .unwrap();
        let err = engine.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            XdpFwdError::Attachment(AttachmentError::InterfaceNotFound { .. })
        ));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn run_fails_when_rules_cannot_load() {
        let datapath = EmulatedDatapath::builder().interface("eth0", 2).build();
        let kernel = datapath.kernel();
        let engine = Engine::builder(datapath, FileRuleSource::new("/nonexistent/rules.toml"))
            .build()
            .unwrap();

        let err = engine.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, XdpFwdError::Config(_)));
        assert_eq!(kernel.attached_mode(2), None);
        assert!(kernel.attach_attempts().is_empty());
    }
}
