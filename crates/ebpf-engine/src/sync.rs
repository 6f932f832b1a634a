//! 룰 동기화 — 룰 소스 → 룰 테이블
//!
//! [`ConfigSync`]는 룰 소스의 수정 시각을 마지막으로 적용한 버전과 비교해
//! 바뀌었을 때만 룰 세트를 다시 읽어 테이블 전체를 교체합니다.
//!
//! # 실패 처리
//! 파싱/검증/용량 에러는 테이블에 쓰기 전에 발생하므로 이전 룰이 그대로
//! 유지됩니다. 같은 수정 시각에 대한 리로드는 한 번만 시도하며, 다음 시도는
//! 소스가 다시 바뀐 뒤입니다.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{info, warn};

use xdpfwd_core::error::{ConfigError, XdpFwdError};
use xdpfwd_core::metrics as m;

use crate::iface::InterfaceResolver;
use crate::rule::{CompiledRules, RuleSet};
use crate::tables::RuleTable;

/// 외부 룰 소스
pub trait RuleSource: Send {
    /// 로그용 설명 (파일 경로 등)
    fn describe(&self) -> String;

    /// 마지막 수정 시각 (변경 증거)
    fn modified(&self) -> Result<SystemTime, ConfigError>;

    fn load(&self) -> Result<RuleSet, ConfigError>;
}

/// TOML 파일 룰 소스 (`default_action` + `[[rules]]`)
#[derive(Debug, Clone)]
pub struct FileRuleSource {
    path: PathBuf,
}

impl FileRuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_error(&self, e: &std::io::Error) -> ConfigError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound {
                path: self.path.display().to_string(),
            }
        } else {
            ConfigError::ParseFailed {
                reason: format!("failed to read {}: {e}", self.path.display()),
            }
        }
    }
}

impl RuleSource for FileRuleSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn modified(&self) -> Result<SystemTime, ConfigError> {
        std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .map_err(|e| self.read_error(&e))
    }

    fn load(&self) -> Result<RuleSet, ConfigError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| self.read_error(&e))?;
        RuleSet::from_toml(&content)
    }
}

/// 동기화 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// 소스가 바뀌지 않음
    Unchanged,
    /// 새 룰 세트를 적용함
    Reloaded { rules: usize },
}

/// 룰 소스와 룰 테이블 사이의 동기화기
pub struct ConfigSync<S, R> {
    source: S,
    resolver: R,
    capacity: u32,
    auditing: bool,
    /// 마지막으로 시도한 소스 버전
    last_seen: Option<SystemTime>,
    applied: Option<CompiledRules>,
    reloads: u64,
}

impl<S: RuleSource, R: InterfaceResolver> ConfigSync<S, R> {
    pub fn new(source: S, resolver: R, capacity: u32, auditing: bool) -> Self {
        Self {
            source,
            resolver,
            capacity,
            auditing,
            last_seen: None,
            applied: None,
            reloads: 0,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// 현재 테이블에 적용된 룰 (아직 없으면 `None`)
    pub fn applied(&self) -> Option<&CompiledRules> {
        self.applied.as_ref()
    }

    /// 시작 이후 성공한 리로드 수 (최초 적용 제외)
    pub fn reloads(&self) -> u64 {
        self.reloads
    }

    /// 감사 이벤트 활성화 여부를 바꿉니다. 다음 적용부터 반영됩니다.
    pub fn set_auditing(&mut self, auditing: bool) {
        self.auditing = auditing;
    }

    /// 룰 소스를 읽고 검증합니다 (테이블은 건드리지 않음).
    pub fn load(&self) -> Result<CompiledRules, XdpFwdError> {
        let rule_set = self.source.load()?;
        rule_set.compile(self.capacity, &self.resolver)
    }

    /// 시작 시 룰을 테이블에 적용합니다. 실패는 호출자에게 그대로 전달됩니다.
    pub fn apply_initial(&mut self, table: &mut impl RuleTable) -> Result<usize, XdpFwdError> {
        let version = self.source.modified().ok();
        let compiled = self.load()?;
        table.replace(&compiled, self.auditing)?;
        let count = compiled.len();
        self.last_seen = version;
        self.applied = Some(compiled);

        metrics::gauge!(m::RULES_LOADED).set(count as f64);
        info!(source = %self.source.describe(), rules = count, "rule table loaded");
        Ok(count)
    }

    /// 소스가 바뀌었으면 테이블 전체를 교체합니다.
    ///
    /// 에러를 반환해도 테이블은 이전 룰을 유지합니다 (쓰기 도중의 테이블 에러 제외).
    pub fn sync(&mut self, table: &mut impl RuleTable) -> Result<SyncOutcome, XdpFwdError> {
        let version = match self.source.modified() {
            Ok(version) => version,
            Err(e) => {
                warn!(
                    source = %self.source.describe(),
                    error = %e,
                    "rule source unavailable, keeping previous rule table"
                );
                return Err(e.into());
            }
        };
        if self.last_seen.is_some_and(|seen| version <= seen) {
            return Ok(SyncOutcome::Unchanged);
        }
        self.last_seen = Some(version);

        let result = self
            .load()
            .and_then(|compiled| table.replace(&compiled, self.auditing).map(|()| compiled));

        match result {
            Ok(compiled) => {
                let count = compiled.len();
                self.applied = Some(compiled);
                self.reloads += 1;
                metrics::counter!(m::RULE_RELOADS_TOTAL, m::LABEL_RESULT => "success").increment(1);
                metrics::gauge!(m::RULES_LOADED).set(count as f64);
                info!(source = %self.source.describe(), rules = count, "rule table reloaded");
                Ok(SyncOutcome::Reloaded { rules: count })
            }
            Err(e) => {
                metrics::counter!(m::RULE_RELOADS_TOTAL, m::LABEL_RESULT => "failure").increment(1);
                warn!(
                    source = %self.source.describe(),
                    error = %e,
                    "rule reload failed, keeping previous rule table"
                );
                Err(e)
            }
        }
    }
}
