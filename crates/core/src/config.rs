//! 설정 관리 — xdpfwd.toml 파싱 및 런타임 설정
//!
//! [`XdpFwdConfig`]는 컨트롤 플레인 전체의 설정을 담는 최상위 구조체입니다.
//! 같은 파일의 `default_action` / `[[rules]]` 항목은 룰 소스가 따로 읽으므로
//! 여기서는 무시됩니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 ([`ConfigOverrides`])
//! 2. 환경변수 (`XDPFWD_XDP_INTERFACE=eth0` 형식)
//! 3. 설정 파일 (`xdpfwd.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # fn example() -> Result<(), xdpfwd_core::error::XdpFwdError> {
//! use xdpfwd_core::config::XdpFwdConfig;
//!
//! let config = XdpFwdConfig::load("/etc/xdpfwd/xdpfwd.toml")?;
//! let config = XdpFwdConfig::parse("[xdp]\ninterface = \"ens3\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, XdpFwdError};
use crate::types::{AttachMode, DatapathKind};

/// 기본 설정 파일 경로
pub const DEFAULT_CONFIG_PATH: &str = "/etc/xdpfwd/xdpfwd.toml";

/// xdpfwd 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XdpFwdConfig {
    /// 일반 설정 (로깅)
    #[serde(default)]
    pub general: GeneralConfig,
    /// XDP 어태치 / 테이블 설정
    #[serde(default)]
    pub xdp: XdpConfig,
    /// 메인 루프 주기 설정
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// 통계 출력 설정
    #[serde(default)]
    pub stats: StatsConfig,
    /// 감사 이벤트 드레인 설정
    #[serde(default)]
    pub audit: AuditConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// CLI에서 넘어오는 설정 오버라이드
///
/// `None` 필드는 파일/환경변수 값을 그대로 둡니다.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub log_file: Option<String>,
    pub interface: Option<String>,
    pub pin_maps: Option<bool>,
    pub update_time_secs: Option<u64>,
    pub tick_ms: Option<u64>,
    pub duration_secs: Option<u64>,
    pub no_stats: Option<bool>,
    pub stats_per_second: Option<bool>,
    /// 단일 모드 고정 (`--skb`, `--offload`)
    pub attach_mode: Option<AttachMode>,
}

impl XdpFwdConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, XdpFwdError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, XdpFwdError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                XdpFwdError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                XdpFwdError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, XdpFwdError> {
        toml::from_str(toml_str).map_err(|e| {
            XdpFwdError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// CLI 오버라이드를 적용합니다.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(level) = &overrides.log_level {
            self.general.log_level = level.clone();
        }
        if let Some(format) = &overrides.log_format {
            self.general.log_format = format.clone();
        }
        if let Some(file) = &overrides.log_file {
            self.general.log_file = file.clone();
        }
        if let Some(interface) = &overrides.interface {
            self.xdp.interface = interface.clone();
        }
        if let Some(pin) = overrides.pin_maps {
            self.xdp.pin_maps = pin;
        }
        if let Some(mode) = overrides.attach_mode {
            self.xdp.attach_modes = vec![mode];
        }
        if let Some(secs) = overrides.update_time_secs {
            self.runtime.update_time_secs = secs;
        }
        if let Some(ms) = overrides.tick_ms {
            self.runtime.tick_ms = ms;
        }
        if let Some(secs) = overrides.duration_secs {
            self.runtime.duration_secs = secs;
        }
        if let Some(no_stats) = overrides.no_stats {
            self.stats.enabled = !no_stats;
        }
        if let Some(per_second) = overrides.stats_per_second {
            self.stats.per_second = per_second;
        }
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `XDPFWD_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "XDPFWD_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "XDPFWD_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.log_file, "XDPFWD_GENERAL_LOG_FILE");

        // XDP
        override_string(&mut self.xdp.interface, "XDPFWD_XDP_INTERFACE");
        override_modes(&mut self.xdp.attach_modes, "XDPFWD_XDP_ATTACH_MODES");
        override_string(&mut self.xdp.object_path, "XDPFWD_XDP_OBJECT_PATH");
        override_bool(&mut self.xdp.pin_maps, "XDPFWD_XDP_PIN_MAPS");
        override_string(&mut self.xdp.pin_dir, "XDPFWD_XDP_PIN_DIR");
        override_u32(&mut self.xdp.rule_capacity, "XDPFWD_XDP_RULE_CAPACITY");
        override_bool(&mut self.xdp.auditing, "XDPFWD_XDP_AUDITING");

        // Runtime
        override_u64(
            &mut self.runtime.update_time_secs,
            "XDPFWD_RUNTIME_UPDATE_TIME_SECS",
        );
        override_u64(&mut self.runtime.tick_ms, "XDPFWD_RUNTIME_TICK_MS");
        override_u64(
            &mut self.runtime.duration_secs,
            "XDPFWD_RUNTIME_DURATION_SECS",
        );

        // Stats
        override_bool(&mut self.stats.enabled, "XDPFWD_STATS_ENABLED");
        override_bool(&mut self.stats.per_second, "XDPFWD_STATS_PER_SECOND");

        // Metrics
        override_bool(&mut self.metrics.enabled, "XDPFWD_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "XDPFWD_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "XDPFWD_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), XdpFwdError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.xdp.interface.trim().is_empty() {
            return Err(invalid("xdp.interface", "no interface specified".to_owned()));
        }

        if self.xdp.attach_modes.is_empty() {
            return Err(invalid(
                "xdp.attach_modes",
                "at least one attach mode is required".to_owned(),
            ));
        }

        if self.xdp.rule_capacity == 0 {
            return Err(invalid(
                "xdp.rule_capacity",
                "must be greater than zero".to_owned(),
            ));
        }

        if self.xdp.pin_maps && self.xdp.pin_dir.trim().is_empty() {
            return Err(invalid(
                "xdp.pin_dir",
                "pin directory must not be empty when pin_maps is enabled".to_owned(),
            ));
        }

        if self.runtime.tick_ms == 0 {
            return Err(invalid("runtime.tick_ms", "must be greater than zero".to_owned()));
        }

        if self.stats.enabled && self.stats.interval_ms == 0 {
            return Err(invalid(
                "stats.interval_ms",
                "must be greater than zero".to_owned(),
            ));
        }

        if self.audit.max_batch == 0 {
            return Err(invalid(
                "audit.max_batch",
                "must be greater than zero".to_owned(),
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must not be zero".to_owned()));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> XdpFwdError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 로그 파일 경로 (비어 있으면 stderr)
    pub log_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            log_file: String::new(),
        }
    }
}

/// XDP 어태치 / 공유 테이블 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XdpConfig {
    /// 어태치할 네트워크 인터페이스
    pub interface: String,
    /// 시도할 어태치 모드 (앞에서부터 순서대로)
    pub attach_modes: Vec<AttachMode>,
    /// 분류기 오브젝트 파일 경로
    pub object_path: String,
    /// 데이터패스 백엔드
    pub backend: DatapathKind,
    /// 룰 테이블을 bpffs에 핀할지 여부
    pub pin_maps: bool,
    /// 핀 디렉토리
    pub pin_dir: String,
    /// 룰 테이블 용량 (이미지의 최대 엔트리 수를 넘을 수 없음)
    pub rule_capacity: u32,
    /// 감사 이벤트 활성화 여부
    pub auditing: bool,
}

impl Default for XdpConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".to_owned(),
            attach_modes: vec![AttachMode::Native, AttachMode::Generic],
            object_path: "/etc/xdpfwd/xdpfwd.bpf.o".to_owned(),
            backend: DatapathKind::Kernel,
            pin_maps: true,
            pin_dir: "/sys/fs/bpf/xdpfwd".to_owned(),
            rule_capacity: 256,
            auditing: true,
        }
    }
}

/// 메인 루프 주기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// 룰 소스 변경 확인 주기 (초, 0이면 확인하지 않음)
    pub update_time_secs: u64,
    /// 메인 루프 틱 간격 (밀리초)
    pub tick_ms: u64,
    /// 실행 시간 제한 (초, 0이면 무제한)
    pub duration_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            update_time_secs: 15,
            tick_ms: 1000,
            duration_secs: 0,
        }
    }
}

impl RuntimeConfig {
    /// 틱 간격
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// 룰 변경 확인 주기 (`None`이면 비활성)
    pub fn update_interval(&self) -> Option<Duration> {
        (self.update_time_secs > 0).then(|| Duration::from_secs(self.update_time_secs))
    }

    /// 실행 시간 제한 (`None`이면 무제한)
    pub fn duration(&self) -> Option<Duration> {
        (self.duration_secs > 0).then(|| Duration::from_secs(self.duration_secs))
    }
}

/// 통계 출력 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// 통계 집계 활성화
    pub enabled: bool,
    /// `true`면 초당 비율, `false`면 시작 이후 누적값 출력
    pub per_second: bool,
    /// 집계 주기 (밀리초)
    pub interval_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_second: false,
            interval_ms: 1000,
        }
    }
}

/// 감사 이벤트 드레인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// 폴링 1회당 최대 대기 시간 (밀리초)
    pub poll_timeout_ms: u64,
    /// 폴링 1회당 최대 레코드 수
    pub max_batch: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
            max_batch: 1024,
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 메트릭 엔드포인트 활성화
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// 엔드포인트 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9317,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_modes(target: &mut Vec<AttachMode>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        let parsed: Result<Vec<AttachMode>, String> =
            val.split(',').map(|s| s.parse::<AttachMode>()).collect();
        match parsed {
            Ok(modes) => *target = modes,
            Err(reason) => warn!(
                env_key,
                value = val.as_str(),
                reason = reason.as_str(),
                "failed to parse attach modes from env var, ignoring"
            ),
        }
    }
}
