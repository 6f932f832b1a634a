//! 공유 테이블 핸들
//!
//! 커널과 공유하는 각 테이블은 그 테이블에 쓰는 컴포넌트가 소유하는 핸들로
//! 표현됩니다. 룰 테이블 쓰기는 [`ConfigSync`](crate::sync::ConfigSync)만,
//! 카운터 읽기는 [`StatsAggregator`](crate::stats::StatsAggregator)만,
//! 이벤트 소비는 [`EventDrain`](crate::audit::EventDrain)만 수행합니다.
//!
//! 백엔드는 두 가지입니다.
//! - `datapath::kernel`: aya 맵 (Linux 전용)
//! - `datapath::emulated`: 프로세스 내 에뮬레이션 (테스트, 비-Linux)

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use xdpfwd_common::{AuditEvent, RuleEntry, Settings, StatsSlot};
use xdpfwd_core::error::{CapacityError, ChannelError, PinError, TableError, XdpFwdError};

use crate::rule::CompiledRules;

/// 룰 테이블 + 설정 엔트리
pub trait RuleTable: Send {
    /// 테이블 생성 시 고정된 최대 엔트리 수
    fn capacity(&self) -> u32;

    fn write_entry(&mut self, index: u32, entry: &RuleEntry) -> Result<(), TableError>;

    fn write_settings(&mut self, settings: &Settings) -> Result<(), TableError>;

    fn read_settings(&self) -> Result<Settings, TableError>;

    /// 테이블 내용 전체를 교체합니다.
    ///
    /// 엔트리를 앞에서부터 쓰고 마지막에 `rule_count`를 갱신합니다. 교체 도중
    /// 커널은 일부만 갱신된 테이블을 볼 수 있습니다. 용량을 넘으면 아무것도
    /// 쓰지 않습니다.
    fn replace(&mut self, compiled: &CompiledRules, audit_enabled: bool) -> Result<(), XdpFwdError> {
        let capacity = self.capacity();
        if compiled.len() > capacity as usize {
            return Err(CapacityError::TooManyRules {
                requested: compiled.len(),
                capacity,
            }
            .into());
        }
        for (index, entry) in compiled.entries.iter().enumerate() {
            self.write_entry(index as u32, entry)?;
        }
        self.write_settings(&compiled.settings(audit_enabled))?;
        Ok(())
    }
}

/// CPU별 카운터 테이블 (읽기 전용)
pub trait CounterTable: Send {
    /// 모든 CPU의 슬롯을 읽습니다. 한 번도 증가하지 않은 슬롯은 0입니다.
    fn read_slots(&self) -> Result<Vec<StatsSlot>, TableError>;
}

/// 감사 이벤트 채널 (소비자 측)
pub trait EventChannel: Send {
    /// 최대 `timeout` 동안 기다리며 현재 쌓인 레코드를 최대 `max`개 반환합니다.
    ///
    /// 빈 채널은 에러가 아니라 빈 `Vec`입니다.
    fn poll(
        &mut self,
        timeout: Duration,
        max: usize,
    ) -> impl Future<Output = Result<Vec<AuditEvent>, ChannelError>> + Send;
}

/// 파일시스템에 핀할 수 있는 테이블 묶음
pub trait Pinnable {
    /// 핀 대상 테이블 이름
    fn pin_names(&self) -> &'static [&'static str];

    /// `name` 테이블을 `path`에 핀합니다.
    fn pin_table(&self, name: &str, path: &Path) -> Result<(), PinError>;
}
