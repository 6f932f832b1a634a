//! 엔진 실행 설정
//!
//! [`EngineSettings`]는 core의 [`XdpFwdConfig`]에서 엔진이 실제로 쓰는 값만
//! 꺼내 `Duration`/`PathBuf` 같은 타입으로 바꾼 것입니다. 룰 자체는 여기에
//! 없고 [`RuleSource`](crate::sync::RuleSource)가 제공합니다.

use std::path::PathBuf;
use std::time::Duration;

use xdpfwd_core::config::XdpFwdConfig;
use xdpfwd_core::error::{ConfigError, XdpFwdError};
use xdpfwd_core::types::AttachMode;

use crate::stats::StatsMode;

/// 라이프사이클 컨트롤러 설정
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// 어태치 대상 인터페이스 이름
    pub interface: String,
    /// 선호 순서대로의 어태치 모드
    pub attach_modes: Vec<AttachMode>,
    pub pin_maps: bool,
    pub pin_dir: PathBuf,
    pub rule_capacity: u32,
    /// 감사 이벤트 요청 여부 (채널이 없으면 무시됨)
    pub auditing: bool,
    /// 주기 루프 간격
    pub tick: Duration,
    /// 룰 소스 재확인 간격 (`None`이면 시작 시에만 로드)
    pub update_interval: Option<Duration>,
    /// 실행 시간 제한 (`None`이면 무제한)
    pub duration: Option<Duration>,
    pub stats_enabled: bool,
    pub stats_mode: StatsMode,
    pub stats_interval: Duration,
    /// 틱 1회당 감사 이벤트 대기 시간 (`tick`보다 길면 `tick`으로 제한)
    pub audit_poll_timeout: Duration,
    pub audit_max_batch: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_core(&XdpFwdConfig::default())
    }
}

impl EngineSettings {
    /// core 설정에서 엔진 설정을 생성합니다.
    pub fn from_core(config: &XdpFwdConfig) -> Self {
        Self {
            interface: config.xdp.interface.clone(),
            attach_modes: config.xdp.attach_modes.clone(),
            pin_maps: config.xdp.pin_maps,
            pin_dir: PathBuf::from(&config.xdp.pin_dir),
            rule_capacity: config.xdp.rule_capacity,
            auditing: config.xdp.auditing,
            tick: config.runtime.tick(),
            update_interval: config.runtime.update_interval(),
            duration: config.runtime.duration(),
            stats_enabled: config.stats.enabled,
            stats_mode: if config.stats.per_second {
                StatsMode::PerSecond
            } else {
                StatsMode::Cumulative
            },
            stats_interval: Duration::from_millis(config.stats.interval_ms),
            audit_poll_timeout: Duration::from_millis(config.audit.poll_timeout_ms),
            audit_max_batch: config.audit.max_batch,
        }
    }

    /// 엔진 시작 전에 값의 유효성을 검사합니다.
    pub fn validate(&self) -> Result<(), XdpFwdError> {
        let invalid = |field: &str, reason: &str| -> XdpFwdError {
            ConfigError::InvalidValue {
                field: field.to_owned(),
                reason: reason.to_owned(),
            }
            .into()
        };

        if self.interface.is_empty() {
            return Err(invalid("interface", "must not be empty"));
        }
        if self.attach_modes.is_empty() {
            return Err(invalid("attach_modes", "at least one mode is required"));
        }
        if self.tick.is_zero() {
            return Err(invalid("tick", "must be greater than 0"));
        }
        if self.rule_capacity == 0 {
            return Err(invalid("rule_capacity", "must be greater than 0"));
        }
        if self.stats_enabled && self.stats_interval.is_zero() {
            return Err(invalid("stats_interval", "must be greater than 0"));
        }
        if self.audit_max_batch == 0 {
            return Err(invalid("audit_max_batch", "must be greater than 0"));
        }
        Ok(())
    }
}
