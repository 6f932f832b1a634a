//! 커널 데이터패스 (aya)
//!
//! XDP 오브젝트 파일을 로드하고 `xdpfwd` 프로그램과 공유 맵을 꺼냅니다.
//!
//! | 맵 | 타입 | 필수 |
//! |---|---|---|
//! | `FWD_RULES` | `Array<RuleEntry>` | O |
//! | `FWD_SETTINGS` | `Array<Settings>` | O |
//! | `FWD_STATS` | `PerCpuArray<StatsSlot>` | O |
//! | `AUDIT_EVENTS` | `RingBuf` | X (없으면 감사 비활성) |

use std::path::{Path, PathBuf};
use std::time::Duration;

use aya::Ebpf;
use aya::maps::{Array, Map, MapData, PerCpuArray, RingBuf};
use aya::programs::{Xdp, XdpFlags, xdp::XdpLinkId};
use tokio::io::unix::AsyncFd;
use tracing::{debug, info, warn};

use xdpfwd_common::{
    AuditEvent, MAP_AUDIT_EVENTS, MAP_RULES, MAP_SETTINGS, MAP_STATS, PROGRAM_NAME, RuleEntry, Settings, StatsSlot,
};
use xdpfwd_core::error::{
    AttachmentError, ChannelError, MapLookupError, PinError, TableError, XdpFwdError,
};
use xdpfwd_core::types::AttachMode;

use super::{Datapath, DatapathParts};
use crate::attach::AttachBackend;
use crate::iface::{SystemInterfaces, raise_memlock_rlimit};
use crate::tables::{CounterTable, EventChannel, Pinnable, RuleTable};

fn xdp_flags(mode: AttachMode) -> XdpFlags {
    match mode {
        AttachMode::Offload => XdpFlags::HW_MODE,
        AttachMode::Native => XdpFlags::DRV_MODE,
        AttachMode::Generic => XdpFlags::SKB_MODE,
    }
}

fn take_map(bpf: &mut Ebpf, name: &str) -> Result<Map, MapLookupError> {
    bpf.take_map(name).ok_or_else(|| MapLookupError::Missing {
        name: name.to_owned(),
    })
}

fn wrong_type(name: &str, e: impl std::fmt::Display) -> MapLookupError {
    MapLookupError::WrongType {
        name: name.to_owned(),
        reason: e.to_string(),
    }
}

// =============================================================================
// 프로그램
// =============================================================================

/// 로드된 XDP 프로그램
///
/// `Ebpf` 핸들을 함께 보관해 프로그램이 어태치된 동안 해제되지 않게 합니다.
pub struct KernelProgram {
    bpf: Ebpf,
}

impl KernelProgram {
    fn program(&mut self) -> Result<&mut Xdp, String> {
        let program = self
            .bpf
            .program_mut(PROGRAM_NAME)
            .ok_or_else(|| format!("program '{PROGRAM_NAME}' not found"))?;
        program.try_into().map_err(|e| format!("{e}"))
    }
}

impl AttachBackend for KernelProgram {
    type Link = XdpLinkId;

    fn attach(&mut self, ifindex: u32, mode: AttachMode) -> Result<XdpLinkId, String> {
        self.program()?
            .attach_to_if_index(ifindex, xdp_flags(mode))
            .map_err(|e| e.to_string())
    }

    fn detach(&mut self, _ifindex: u32, link: XdpLinkId) -> Result<(), String> {
        self.program()?.detach(link).map_err(|e| e.to_string())
    }
}

// =============================================================================
// 룰 테이블
// =============================================================================

/// `FWD_RULES` + `FWD_SETTINGS` 핸들
pub struct KernelRules {
    rules: Map,
    settings: Map,
    capacity: u32,
}

impl KernelRules {
    fn table_error(table: &str, write: bool, e: impl std::fmt::Display) -> TableError {
        if write {
            TableError::Write {
                table: table.to_owned(),
                reason: e.to_string(),
            }
        } else {
            TableError::Read {
                table: table.to_owned(),
                reason: e.to_string(),
            }
        }
    }
}

impl RuleTable for KernelRules {
    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn write_entry(&mut self, index: u32, entry: &RuleEntry) -> Result<(), TableError> {
        let mut array = Array::<&mut MapData, RuleEntry>::try_from(&mut self.rules)
            .map_err(|e| Self::table_error(MAP_RULES, true, e))?;
        array
            .set(index, entry, 0)
            .map_err(|e| Self::table_error(MAP_RULES, true, e))
    }

    fn write_settings(&mut self, settings: &Settings) -> Result<(), TableError> {
        let mut array = Array::<&mut MapData, Settings>::try_from(&mut self.settings)
            .map_err(|e| Self::table_error(MAP_SETTINGS, true, e))?;
        array
            .set(0, settings, 0)
            .map_err(|e| Self::table_error(MAP_SETTINGS, true, e))
    }

    fn read_settings(&self) -> Result<Settings, TableError> {
        let array = Array::<&MapData, Settings>::try_from(&self.settings)
            .map_err(|e| Self::table_error(MAP_SETTINGS, false, e))?;
        array
            .get(&0, 0)
            .map_err(|e| Self::table_error(MAP_SETTINGS, false, e))
    }
}

impl Pinnable for KernelRules {
    fn pin_names(&self) -> &'static [&'static str] {
        &[MAP_RULES, MAP_SETTINGS]
    }

    fn pin_table(&self, name: &str, path: &Path) -> Result<(), PinError> {
        let map = if name == MAP_SETTINGS {
            &self.settings
        } else {
            &self.rules
        };
        map.pin(path).map_err(|e| PinError::Pin {
            name: name.to_owned(),
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// 카운터
// =============================================================================

/// `FWD_STATS` 핸들 (읽기 전용)
pub struct KernelCounters {
    stats: PerCpuArray<MapData, StatsSlot>,
}

impl CounterTable for KernelCounters {
    fn read_slots(&self) -> Result<Vec<StatsSlot>, TableError> {
        let values = self.stats.get(&0, 0).map_err(|e| TableError::Read {
            table: MAP_STATS.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(values.iter().copied().collect())
    }
}

// =============================================================================
// 감사 이벤트
// =============================================================================

/// `AUDIT_EVENTS` RingBuf 소비자
pub struct KernelEvents {
    ring: AsyncFd<RingBuf<MapData>>,
}

impl KernelEvents {
    fn read_available(ring: &mut RingBuf<MapData>, out: &mut Vec<AuditEvent>, max: usize) {
        while out.len() < max {
            let Some(item) = ring.next() else {
                break;
            };
            if item.len() < std::mem::size_of::<AuditEvent>() {
                debug!(len = item.len(), "skipping short audit record");
                continue;
            }
            // SAFETY: 길이를 확인했고 AuditEvent는 #[repr(C)] POD입니다.
            let event = unsafe { std::ptr::read_unaligned(item.as_ptr().cast::<AuditEvent>()) };
            out.push(event);
        }
    }
}

impl EventChannel for KernelEvents {
    async fn poll(&mut self, timeout: Duration, max: usize) -> Result<Vec<AuditEvent>, ChannelError> {
        let mut out = Vec::new();
        Self::read_available(self.ring.get_mut(), &mut out, max);
        if !out.is_empty() || timeout.is_zero() {
            return Ok(out);
        }

        match tokio::time::timeout(timeout, self.ring.readable_mut()).await {
            Err(_elapsed) => Ok(out),
            Ok(Err(e)) => Err(ChannelError::Poll(e.to_string())),
            Ok(Ok(mut guard)) => {
                Self::read_available(guard.get_inner_mut(), &mut out, max);
                guard.clear_ready();
                Ok(out)
            }
        }
    }
}

// =============================================================================
// 백엔드
// =============================================================================

/// aya 커널 데이터패스
#[derive(Debug, Clone)]
pub struct KernelDatapath {
    object_path: PathBuf,
}

impl KernelDatapath {
    pub fn new(object_path: impl Into<PathBuf>) -> Self {
        Self {
            object_path: object_path.into(),
        }
    }

    pub fn object_path(&self) -> &Path {
        &self.object_path
    }
}

impl Datapath for KernelDatapath {
    type Program = KernelProgram;
    type Rules = KernelRules;
    type Counters = KernelCounters;
    type Events = KernelEvents;
    type Resolver = SystemInterfaces;

    fn name(&self) -> &'static str {
        "kernel"
    }

    fn prepare(&mut self) -> Result<(), XdpFwdError> {
        // 5.11 이상은 memcg 계산이라 실패해도 진행
        if let Err(e) = raise_memlock_rlimit() {
            warn!(error = %e, "failed to raise RLIMIT_MEMLOCK");
        }
        Ok(())
    }

    fn resolver(&self) -> SystemInterfaces {
        SystemInterfaces
    }

    fn open(self) -> Result<DatapathParts<Self>, XdpFwdError> {
        let data = std::fs::read(&self.object_path).map_err(|e| {
            AttachmentError::Load(format!("failed to read {}: {e}", self.object_path.display()))
        })?;
        let mut bpf = Ebpf::load(&data).map_err(|e| AttachmentError::Load(e.to_string()))?;

        if let Err(e) = aya_log::EbpfLogger::init(&mut bpf) {
            warn!(error = %e, "kernel log forwarding unavailable");
        }

        {
            let program: &mut Xdp = bpf
                .program_mut(PROGRAM_NAME)
                .ok_or_else(|| AttachmentError::Load(format!("program '{PROGRAM_NAME}' not found")))?
                .try_into()
                .map_err(|e: aya::programs::ProgramError| AttachmentError::Load(e.to_string()))?;
            program
                .load()
                .map_err(|e| AttachmentError::Load(e.to_string()))?;
        }

        let mut rules = take_map(&mut bpf, MAP_RULES)?;
        let settings = take_map(&mut bpf, MAP_SETTINGS)?;
        let stats = take_map(&mut bpf, MAP_STATS)?;

        let capacity = Array::<&mut MapData, RuleEntry>::try_from(&mut rules)
            .map_err(|e| wrong_type(MAP_RULES, e))?
            .len();
        Array::<&MapData, Settings>::try_from(&settings).map_err(|e| wrong_type(MAP_SETTINGS, e))?;
        let stats = PerCpuArray::<MapData, StatsSlot>::try_from(stats).map_err(|e| wrong_type(MAP_STATS, e))?;

        let events = match bpf.take_map(MAP_AUDIT_EVENTS) {
            Some(map) => {
                let ring = RingBuf::try_from(map).map_err(|e| wrong_type(MAP_AUDIT_EVENTS, e))?;
                let ring = AsyncFd::new(ring)?;
                Some(KernelEvents { ring })
            }
            None => {
                warn!(map = MAP_AUDIT_EVENTS, "audit channel missing from image, auditing disabled");
                None
            }
        };

        info!(
            object = %self.object_path.display(),
            rule_capacity = capacity,
            audit = events.is_some(),
            "classifier image loaded"
        );

        Ok(DatapathParts {
            program: KernelProgram { bpf },
            rules: KernelRules {
                rules,
                settings,
                capacity,
            },
            counters: KernelCounters { stats },
            events,
        })
    }
}
