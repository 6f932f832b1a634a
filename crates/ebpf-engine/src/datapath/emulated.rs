//! 에뮬레이션 데이터패스
//!
//! 커널 없이 컨트롤 플레인 전체를 실행하기 위한 백엔드입니다. 룰 테이블,
//! CPU별 카운터 슬롯, 감사 링은 [`EmulatedKernel`] 안에 있고, 프레임 처리는
//! [`EmulatedKernel::process`]가 [`classify`](crate::classifier::classify)로
//! 수행합니다. 카운터와 판정 로직은 XDP 프로그램과 같은 `xdpfwd-common`
//! 코드를 사용합니다.
//!
//! 감사 링 push는 잠금을 기다리지 않습니다. 잠금이 경합 중이거나 링이 가득
//! 차면 레코드를 버립니다.

use std::collections::{HashMap, VecDeque};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::debug;

use xdpfwd_common::{
    ACTION_DROP, ACTION_REDIRECT, AuditEvent, MAP_RULES, MAP_SETTINGS, MAX_RULES, RuleEntry, Settings, StatsSlot,
};
use xdpfwd_core::error::{ChannelError, PinError, TableError, XdpFwdError};
use xdpfwd_core::types::AttachMode;

use super::{Datapath, DatapathParts};
use crate::attach::AttachBackend;
use crate::classifier::classify;
use crate::iface::StaticInterfaces;
use crate::tables::{CounterTable, EventChannel, Pinnable, RuleTable};

/// 에뮬레이션 프레임 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XdpVerdict {
    Pass,
    Drop,
    Redirect { ifindex: u32 },
}

/// 감사 링이 가득 찼을 때의 동작
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// 새 레코드를 버림 (커널 RingBuf와 같음)
    #[default]
    DropNewest,
    /// 가장 오래된 레코드를 버리고 새 레코드를 넣음
    OverwriteOldest,
}

// =============================================================================
// 감사 링
// =============================================================================

struct AuditRing {
    queue: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
    policy: OverflowPolicy,
    notify: Notify,
    lost: AtomicU64,
}

impl AuditRing {
    fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            policy,
            notify: Notify::new(),
            lost: AtomicU64::new(0),
        }
    }

    /// 생산자 측 push. 절대 기다리지 않습니다.
    fn push(&self, event: AuditEvent) -> bool {
        let Ok(mut queue) = self.queue.try_lock() else {
            self.lost.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        if queue.len() >= self.capacity {
            self.lost.fetch_add(1, Ordering::Relaxed);
            match self.policy {
                OverflowPolicy::DropNewest => return false,
                OverflowPolicy::OverwriteOldest => {
                    queue.pop_front();
                }
            }
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
        true
    }

    fn take(&self, max: usize) -> Vec<AuditEvent> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let n = max.min(queue.len());
        queue.drain(..n).collect()
    }

    fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

// =============================================================================
// 에뮬레이션 커널
// =============================================================================

#[derive(Default)]
struct ProgramState {
    attempts: Vec<AttachMode>,
    attached: HashMap<u32, AttachMode>,
}

/// 프로세스 내 커널 상태 (테이블 + 어태치 상태)
pub struct EmulatedKernel {
    rules: RwLock<Vec<RuleEntry>>,
    settings: RwLock<Settings>,
    slots: Vec<Mutex<StatsSlot>>,
    audit: Option<AuditRing>,
    interfaces: StaticInterfaces,
    unsupported_modes: Vec<AttachMode>,
    program: Mutex<ProgramState>,
    boot: Instant,
}

impl EmulatedKernel {
    /// CPU 수 (카운터 슬롯 수)
    pub fn cpus(&self) -> usize {
        self.slots.len()
    }

    /// 프레임 하나를 분류하고 판정을 적용합니다.
    ///
    /// `cpu`번 카운터 슬롯을 증가시키고, 룰이 발동했고 감사가 켜져 있으면
    /// 감사 링에 레코드를 추가합니다. 리다이렉트에 MAC 재작성이 있으면
    /// `frame`의 목적지 MAC을 덮어씁니다.
    pub fn process(&self, cpu: usize, ingress_ifindex: u32, frame: &mut [u8]) -> XdpVerdict {
        let settings = *self.settings.read().unwrap_or_else(PoisonError::into_inner);
        let classification = {
            let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
            classify(frame, &rules, &settings)
        };
        let decision = classification.decision;
        let pkt_len = frame.len() as u64;

        if let Some(slot) = self.slots.get(cpu % self.slots.len().max(1)) {
            let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if classification.parse_fault.is_some() {
                slot.record_parse_error(pkt_len, decision.action);
            } else {
                slot.record(pkt_len, decision.action);
            }
        }

        if settings.audit_enabled != 0 && decision.rule_fired() {
            if let (Some(ring), Some(key)) = (&self.audit, classification.key) {
                let ts = self.boot.elapsed().as_nanos() as u64;
                ring.push(AuditEvent::new(ts, &key, &decision, ingress_ifindex, pkt_len));
            }
        }

        match decision.action {
            ACTION_DROP => XdpVerdict::Drop,
            ACTION_REDIRECT if decision.redirect_ifindex != 0 => {
                if let Some(mac) = decision.rewrite_mac {
                    if frame.len() < mac.len() {
                        return XdpVerdict::Pass;
                    }
                    frame[..mac.len()].copy_from_slice(&mac);
                }
                XdpVerdict::Redirect {
                    ifindex: decision.redirect_ifindex,
                }
            }
            _ => XdpVerdict::Pass,
        }
    }

    /// 현재 설정 엔트리
    pub fn settings(&self) -> Settings {
        *self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// 현재 `rule_count`까지의 룰 엔트리
    pub fn active_rules(&self) -> Vec<RuleEntry> {
        let count = self.settings().rule_count as usize;
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        rules.iter().take(count).copied().collect()
    }

    /// 지금까지 시도된 어태치 모드 (순서대로)
    pub fn attach_attempts(&self) -> Vec<AttachMode> {
        self.program_state().attempts.clone()
    }

    /// 인터페이스에 현재 어태치된 모드
    pub fn attached_mode(&self, ifindex: u32) -> Option<AttachMode> {
        self.program_state().attached.get(&ifindex).copied()
    }

    pub fn has_audit_channel(&self) -> bool {
        self.audit.is_some()
    }

    /// 아직 소비되지 않은 감사 레코드 수
    pub fn pending_events(&self) -> usize {
        self.audit.as_ref().map_or(0, AuditRing::len)
    }

    /// 링이 가득 차거나 경합으로 버려진 감사 레코드 수
    pub fn lost_events(&self) -> u64 {
        self.audit
            .as_ref()
            .map_or(0, |ring| ring.lost.load(Ordering::Relaxed))
    }

    fn program_state(&self) -> std::sync::MutexGuard<'_, ProgramState> {
        self.program.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// 핸들
// =============================================================================

/// 어태치 핸들
pub struct EmulatedProgram {
    kernel: Arc<EmulatedKernel>,
}

/// 에뮬레이션 어태치 링크
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulatedLink {
    pub ifindex: u32,
    pub mode: AttachMode,
}

impl AttachBackend for EmulatedProgram {
    type Link = EmulatedLink;

    fn attach(&mut self, ifindex: u32, mode: AttachMode) -> Result<EmulatedLink, String> {
        let mut state = self.kernel.program_state();
        state.attempts.push(mode);
        if self.kernel.unsupported_modes.contains(&mode) {
            return Err(format!("{mode} mode not supported by device"));
        }
        if state.attached.contains_key(&ifindex) {
            return Err("device busy".to_owned());
        }
        state.attached.insert(ifindex, mode);
        Ok(EmulatedLink { ifindex, mode })
    }

    fn detach(&mut self, ifindex: u32, link: EmulatedLink) -> Result<(), String> {
        let mut state = self.kernel.program_state();
        match state.attached.get(&ifindex) {
            Some(mode) if *mode == link.mode => {
                state.attached.remove(&ifindex);
                Ok(())
            }
            _ => Err("no such attachment".to_owned()),
        }
    }
}

/// 룰 테이블 + 설정 핸들
pub struct EmulatedRules {
    kernel: Arc<EmulatedKernel>,
}

impl RuleTable for EmulatedRules {
    fn capacity(&self) -> u32 {
        let rules = self.kernel.rules.read().unwrap_or_else(PoisonError::into_inner);
        rules.len() as u32
    }

    fn write_entry(&mut self, index: u32, entry: &RuleEntry) -> Result<(), TableError> {
        let mut rules = self.kernel.rules.write().unwrap_or_else(PoisonError::into_inner);
        let slot = rules.get_mut(index as usize).ok_or_else(|| TableError::Write {
            table: MAP_RULES.to_owned(),
            reason: format!("index {index} out of bounds"),
        })?;
        *slot = *entry;
        Ok(())
    }

    fn write_settings(&mut self, settings: &Settings) -> Result<(), TableError> {
        *self.kernel.settings.write().unwrap_or_else(PoisonError::into_inner) = *settings;
        Ok(())
    }

    fn read_settings(&self) -> Result<Settings, TableError> {
        Ok(self.kernel.settings())
    }
}

impl Pinnable for EmulatedRules {
    fn pin_names(&self) -> &'static [&'static str] {
        &[MAP_RULES, MAP_SETTINGS]
    }

    /// 핀 파일을 만듭니다. bpffs처럼 이미 존재하는 경로에는 핀할 수 없습니다.
    fn pin_table(&self, name: &str, path: &Path) -> Result<(), PinError> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map(|_| ())
            .map_err(|e| PinError::Pin {
                name: name.to_owned(),
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }
}

/// CPU별 카운터 핸들
pub struct EmulatedCounters {
    kernel: Arc<EmulatedKernel>,
}

impl CounterTable for EmulatedCounters {
    fn read_slots(&self) -> Result<Vec<StatsSlot>, TableError> {
        Ok(self
            .kernel
            .slots
            .iter()
            .map(|slot| *slot.lock().unwrap_or_else(PoisonError::into_inner))
            .collect())
    }
}

/// 감사 링 소비자 핸들
pub struct EmulatedEvents {
    kernel: Arc<EmulatedKernel>,
}

impl EventChannel for EmulatedEvents {
    async fn poll(&mut self, timeout: Duration, max: usize) -> Result<Vec<AuditEvent>, ChannelError> {
        let Some(ring) = self.kernel.audit.as_ref() else {
            return Ok(Vec::new());
        };

        let batch = ring.take(max);
        if !batch.is_empty() || timeout.is_zero() {
            return Ok(batch);
        }

        if tokio::time::timeout(timeout, ring.notify.notified()).await.is_err() {
            return Ok(Vec::new());
        }
        Ok(ring.take(max))
    }
}

// =============================================================================
// 백엔드
// =============================================================================

/// 에뮬레이션 데이터패스
///
/// # 사용 예시
/// ```ignore
/// let datapath = EmulatedDatapath::builder()
///     .cpus(4)
///     .interface("eth0", 2)
///     .unsupported_mode(AttachMode::Offload)
///     .build();
/// let kernel = datapath.kernel();
/// ```
#[derive(Clone)]
pub struct EmulatedDatapath {
    kernel: Arc<EmulatedKernel>,
}

impl EmulatedDatapath {
    pub fn builder() -> EmulatedDatapathBuilder {
        EmulatedDatapathBuilder::new()
    }

    /// 프레임 주입과 상태 확인용 커널 핸들
    pub fn kernel(&self) -> Arc<EmulatedKernel> {
        Arc::clone(&self.kernel)
    }

    /// 테이블 핸들을 직접 만듭니다 (라이프사이클 없이 컴포넌트를 조립할 때).
    pub fn handles(&self) -> DatapathParts<Self> {
        DatapathParts {
            program: EmulatedProgram {
                kernel: self.kernel(),
            },
            rules: EmulatedRules {
                kernel: self.kernel(),
            },
            counters: EmulatedCounters {
                kernel: self.kernel(),
            },
            events: self.kernel.audit.as_ref().map(|_| EmulatedEvents {
                kernel: self.kernel(),
            }),
        }
    }
}

impl Datapath for EmulatedDatapath {
    type Program = EmulatedProgram;
    type Rules = EmulatedRules;
    type Counters = EmulatedCounters;
    type Events = EmulatedEvents;
    type Resolver = StaticInterfaces;

    fn name(&self) -> &'static str {
        "emulated"
    }

    fn prepare(&mut self) -> Result<(), XdpFwdError> {
        Ok(())
    }

    fn resolver(&self) -> StaticInterfaces {
        self.kernel.interfaces.clone()
    }

    fn open(self) -> Result<DatapathParts<Self>, XdpFwdError> {
        debug!(
            cpus = self.kernel.cpus(),
            audit = self.kernel.has_audit_channel(),
            "emulated datapath opened"
        );
        Ok(self.handles())
    }
}

/// [`EmulatedDatapath`] 빌더
pub struct EmulatedDatapathBuilder {
    cpus: usize,
    rule_capacity: u32,
    audit_capacity: Option<usize>,
    overflow: OverflowPolicy,
    interfaces: StaticInterfaces,
    unsupported_modes: Vec<AttachMode>,
}

impl EmulatedDatapathBuilder {
    fn new() -> Self {
        Self {
            cpus: 1,
            rule_capacity: MAX_RULES,
            audit_capacity: Some(1024),
            overflow: OverflowPolicy::default(),
            interfaces: StaticInterfaces::default(),
            unsupported_modes: Vec::new(),
        }
    }

    /// 카운터 슬롯 수 (기본: 1)
    pub fn cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus.max(1);
        self
    }

    /// 룰 테이블 엔트리 수 (기본: `MAX_RULES`)
    pub fn rule_capacity(mut self, capacity: u32) -> Self {
        self.rule_capacity = capacity;
        self
    }

    /// 감사 링 용량 (레코드 수, 기본: 1024)
    pub fn audit_capacity(mut self, capacity: usize) -> Self {
        self.audit_capacity = Some(capacity);
        self
    }

    /// 감사 채널이 없는 이미지를 흉내 냅니다.
    pub fn without_audit_channel(mut self) -> Self {
        self.audit_capacity = None;
        self
    }

    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    /// 조회 가능한 인터페이스를 추가합니다.
    pub fn interface(mut self, name: impl Into<String>, ifindex: u32) -> Self {
        self.interfaces.insert(name, ifindex);
        self
    }

    /// 해당 어태치 모드가 실패하도록 합니다.
    pub fn unsupported_mode(mut self, mode: AttachMode) -> Self {
        self.unsupported_modes.push(mode);
        self
    }

    pub fn build(self) -> EmulatedDatapath {
        let kernel = EmulatedKernel {
            rules: RwLock::new(vec![RuleEntry::zeroed(); self.rule_capacity as usize]),
            settings: RwLock::new(Settings::zeroed()),
            slots: (0..self.cpus).map(|_| Mutex::new(StatsSlot::zeroed())).collect(),
            audit: self
                .audit_capacity
                .map(|capacity| AuditRing::new(capacity, self.overflow)),
            interfaces: self.interfaces,
            unsupported_modes: self.unsupported_modes,
            program: Mutex::new(ProgramState::default()),
            boot: Instant::now(),
        };
        EmulatedDatapath {
            kernel: Arc::new(kernel),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::classifier::frame;
    use crate::rule::RuleSet;

    const DST_5: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
    const SRC: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

    fn load(datapath: &EmulatedDatapath, toml: &str) {
        let compiled = RuleSet::from_toml(toml)
            .unwrap()
            .compile(MAX_RULES, &datapath.resolver())
            .unwrap();
        datapath.handles().rules.replace(&compiled, true).unwrap();
    }

    #[test]
    fn process_drops_matching_packet() {
        let datapath = EmulatedDatapath::builder().build();
        load(&datapath, "[[rules]]\ndst = \"10.0.0.5\"\naction = \"drop\"\n");
        let kernel = datapath.kernel();

        let mut hit = frame::udp(SRC, DST_5, 1000, 53);
        let mut miss = frame::udp(SRC, Ipv4Addr::new(10, 0, 0, 6), 1000, 53);
        assert_eq!(kernel.process(0, 1, &mut hit), XdpVerdict::Drop);
        assert_eq!(kernel.process(0, 1, &mut miss), XdpVerdict::Pass);
        assert_eq!(kernel.pending_events(), 1);
    }

    #[test]
    fn process_redirect_rewrites_destination_mac() {
        let datapath = EmulatedDatapath::builder().interface("eth1", 7).build();
        load(
            &datapath,
            "[[rules]]\ndst = \"10.0.0.5\"\naction = \"redirect\"\nredirect_interface = \"eth1\"\nredirect_mac = \"02:00:00:00:00:53\"\n",
        );

        let mut pkt = frame::udp(SRC, DST_5, 1000, 53);
        let verdict = datapath.kernel().process(0, 1, &mut pkt);
        assert_eq!(verdict, XdpVerdict::Redirect { ifindex: 7 });
        assert_eq!(&pkt[..6], &[0x02, 0, 0, 0, 0, 0x53]);
    }

    #[test]
    fn counters_are_per_cpu() {
        let datapath = EmulatedDatapath::builder().cpus(3).build();
        let kernel = datapath.kernel();
        for cpu in 0..6 {
            let mut pkt = frame::tcp(SRC, DST_5, 1000, 80);
            kernel.process(cpu, 1, &mut pkt);
        }
        let slots = datapath.handles().counters.read_slots().unwrap();
        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(|s| s.packets == 2));
    }

    #[test]
    fn parse_fault_counts_and_emits_no_record() {
        let datapath = EmulatedDatapath::builder().build();
        load(&datapath, "default_action = \"drop\"\n[[rules]]\naction = \"pass\"\n");
        let kernel = datapath.kernel();

        let mut runt = vec![0u8; 10];
        assert_eq!(kernel.process(0, 1, &mut runt), XdpVerdict::Drop);
        let slot = datapath.handles().counters.read_slots().unwrap()[0];
        assert_eq!(slot.parse_errors, 1);
        assert_eq!(slot.dropped, 1);
        assert_eq!(kernel.pending_events(), 0);
    }

    #[test]
    fn drop_newest_keeps_oldest_records() {
        let datapath = EmulatedDatapath::builder().audit_capacity(2).build();
        load(&datapath, "[[rules]]\naction = \"drop\"\n");
        let kernel = datapath.kernel();
        for port in 1..=5 {
            let mut pkt = frame::udp(SRC, DST_5, port, 53);
            kernel.process(0, 1, &mut pkt);
        }
        assert_eq!(kernel.pending_events(), 2);
        assert_eq!(kernel.lost_events(), 3);
    }

    #[tokio::test]
    async fn overwrite_oldest_keeps_newest_records() {
        let datapath = EmulatedDatapath::builder()
            .audit_capacity(2)
            .overflow(OverflowPolicy::OverwriteOldest)
            .build();
        load(&datapath, "[[rules]]\naction = \"drop\"\n");
        let kernel = datapath.kernel();
        for port in 1..=5 {
            let mut pkt = frame::udp(SRC, DST_5, port, 53);
            kernel.process(0, 1, &mut pkt);
        }

        let mut events = datapath.handles().events.unwrap();
        let batch = events.poll(Duration::ZERO, 16).await.unwrap();
        let ports: Vec<u16> = batch.iter().map(|e| e.src_port).collect();
        assert_eq!(ports, vec![4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_empty_channel_returns_after_timeout() {
        let datapath = EmulatedDatapath::builder().build();
        let mut events = datapath.handles().events.unwrap();
        let batch = events.poll(Duration::from_millis(100), 16).await.unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn audit_disabled_in_settings_emits_nothing() {
        let datapath = EmulatedDatapath::builder().build();
        let compiled = RuleSet::from_toml("[[rules]]\naction = \"drop\"\n")
            .unwrap()
            .compile(MAX_RULES, &datapath.resolver())
            .unwrap();
        datapath.handles().rules.replace(&compiled, false).unwrap();

        let mut pkt = frame::udp(SRC, DST_5, 1, 53);
        datapath.kernel().process(0, 1, &mut pkt);
        assert_eq!(datapath.kernel().pending_events(), 0);
    }

    #[test]
    fn attach_rejects_unsupported_mode() {
        let datapath = EmulatedDatapath::builder()
            .unsupported_mode(AttachMode::Offload)
            .build();
        let mut program = datapath.handles().program;
        assert!(program.attach(2, AttachMode::Offload).is_err());
        let link = program.attach(2, AttachMode::Native).unwrap();
        assert_eq!(datapath.kernel().attached_mode(2), Some(AttachMode::Native));
        program.detach(2, link).unwrap();
        assert_eq!(datapath.kernel().attached_mode(2), None);
        assert_eq!(
            datapath.kernel().attach_attempts(),
            vec![AttachMode::Offload, AttachMode::Native]
        );
    }

    #[test]
    fn write_entry_out_of_bounds() {
        let datapath = EmulatedDatapath::builder().rule_capacity(2).build();
        let mut rules = datapath.handles().rules;
        assert_eq!(rules.capacity(), 2);
        assert!(rules.write_entry(2, &RuleEntry::zeroed()).is_err());
    }
}
