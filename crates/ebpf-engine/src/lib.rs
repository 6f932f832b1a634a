//! xdpfwd 컨트롤 플레인
//!
//! 커널 XDP 분류기가 쓰는 공유 테이블을 관리하고 라이프사이클을 제어합니다.
//!
//! # 모듈 구성
//! - [`rule`]: 룰 모델, 검증, 룰 테이블 엔트리로 컴파일
//! - [`classifier`]: 커널과 같은 규칙의 유저스페이스 패킷 분류기
//! - [`tables`]: 공유 테이블 핸들 trait (룰, 카운터, 감사 채널, 핀)
//! - [`attach`]: 모드 폴백 어태치 관리
//! - [`pin`]: 테이블 핀/언핀
//! - [`sync`]: 룰 소스 → 룰 테이블 동기화
//! - [`stats`]: CPU별 카운터 합산과 비율 계산
//! - [`audit`]: 감사 이벤트 소비
//! - [`datapath`]: 커널(aya) / 에뮬레이션 백엔드
//! - [`engine`]: 라이프사이클 컨트롤러
//!
//! # 공유 타입
//! 커널/유저스페이스 공유 타입은 [`xdpfwd_common`] 크레이트에 정의되어 있습니다.

pub mod attach;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod datapath;
pub mod engine;
pub mod iface;
pub mod pin;
pub mod rule;
pub mod stats;
pub mod sync;
pub mod tables;

// --- 주요 타입 re-export ---

// 엔진
pub use config::EngineSettings;
pub use engine::{Engine, EngineBuilder, Phase, RunSummary, StopReason};

// 룰
pub use rule::{CompiledRules, DefaultAction, Rule, RuleAction, RuleSet};
pub use sync::{ConfigSync, FileRuleSource, RuleSource, SyncOutcome};

// 컴포넌트
pub use attach::{AttachBackend, AttachManager};
pub use audit::{AuditRecord, AuditSink, EventDrain, TracingAuditSink};
pub use pin::PinManager;
pub use stats::{AggregatedStats, StatsAggregator, StatsMode, StatsReport, TrafficStats};

// 백엔드
pub use datapath::emulated::{EmulatedDatapath, OverflowPolicy, XdpVerdict};
#[cfg(target_os = "linux")]
pub use datapath::kernel::KernelDatapath;
pub use datapath::{Datapath, DatapathParts};
pub use iface::{InterfaceResolver, StaticInterfaces, SystemInterfaces};

// 공유 타입 (커널/유저스페이스 공통)
pub use xdpfwd_common;
