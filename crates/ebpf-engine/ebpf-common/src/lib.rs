//! XDP 분류기 커널/유저스페이스 공유 타입
//!
//! 이 크레이트는 `#![no_std]` 환경에서 사용 가능한 공통 타입을 정의합니다.
//! 커널 분류기와 컨트롤 플레인이 동일한 메모리 레이아웃(`#[repr(C)]`)과
//! 동일한 매칭 로직을 사용하도록 보장합니다.
//!
//! # 맵 타입 선택 근거
//! - **Array** (`FWD_RULES`): 룰 테이블 — 고정 용량, 인덱스 순서가 곧 평가 순서
//! - **Array** (`FWD_SETTINGS`): 룰 수 / 기본 판정 / 감사 활성화 플래그 (엔트리 1개)
//! - **PerCpuArray** (`FWD_STATS`): CPU별 카운터 슬롯 — 락 프리, 유저스페이스에서 합산
//! - **RingBuf** (`AUDIT_EVENTS`): 감사 이벤트 — 손실 허용, 가득 차면 레코드 폐기
//!
//! 주소와 포트는 모두 호스트 바이트 오더로 저장합니다. 커널 분류기는 헤더를
//! 읽을 때 한 번만 변환합니다.

#![cfg_attr(not(test), no_std)]

// =============================================================================
// 맵 / 프로그램 이름 상수
// =============================================================================

/// 룰 테이블 Array 맵 이름
pub const MAP_RULES: &str = "FWD_RULES";
/// 설정 Array 맵 이름
pub const MAP_SETTINGS: &str = "FWD_SETTINGS";
/// 카운터 PerCpuArray 맵 이름
pub const MAP_STATS: &str = "FWD_STATS";
/// 감사 이벤트 RingBuf 맵 이름
pub const MAP_AUDIT_EVENTS: &str = "AUDIT_EVENTS";
/// XDP 엔트리 포인트 이름
pub const PROGRAM_NAME: &str = "xdpfwd";

/// 룰 테이블 최대 엔트리 수 (이미지에 고정)
pub const MAX_RULES: u32 = 256;
/// 감사 RingBuf 크기 (바이트)
pub const AUDIT_RING_BYTES: u32 = 256 * 1024;

// =============================================================================
// 프로토콜 상수
// =============================================================================

/// ICMP 프로토콜 번호
pub const PROTO_ICMP: u8 = 1;
/// TCP 프로토콜 번호
pub const PROTO_TCP: u8 = 6;
/// UDP 프로토콜 번호
pub const PROTO_UDP: u8 = 17;

// =============================================================================
// 액션 코드 / 룰 플래그
// =============================================================================

/// 패킷 통과 (XDP_PASS)
pub const ACTION_PASS: u8 = 0;
/// 패킷 차단 (XDP_DROP)
pub const ACTION_DROP: u8 = 1;
/// 다른 인터페이스로 리다이렉트 (XDP_REDIRECT)
pub const ACTION_REDIRECT: u8 = 2;

/// `protocol` 필드를 매칭에 사용
pub const RULE_MATCH_PROTO: u8 = 0x01;
/// 리다이렉트 전 목적지 MAC을 `redirect_mac`으로 재작성
pub const RULE_REWRITE_MAC: u8 = 0x02;

/// 기본 판정에 해당하는 룰 ID
pub const RULE_ID_DEFAULT: u32 = 0;

// =============================================================================
// 매치 키
// =============================================================================

/// 파싱된 패킷 헤더에서 만든 매치 키
///
/// TCP/UDP가 아니거나 첫 조각이 아닌 IP 조각은 포트가 0입니다.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlowKey {
    pub src_addr: u32,
    pub dst_addr: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub _pad: [u8; 3],
}

impl FlowKey {
    pub const fn new(src_addr: u32, dst_addr: u32, protocol: u8, src_port: u16, dst_port: u16) -> Self {
        Self {
            src_addr,
            dst_addr,
            src_port,
            dst_port,
            protocol,
            _pad: [0; 3],
        }
    }
}

// =============================================================================
// 룰 엔트리
// =============================================================================

/// 룰 테이블 엔트리
///
/// `Array<RuleEntry>` 맵에서 사용됩니다. 컨트롤 플레인이 우선순위 순서로
/// 정렬해서 기록하므로 커널은 앞에서부터 처음 매칭되는 엔트리를 사용합니다.
///
/// # 메모리 레이아웃 (44 바이트, 4바이트 정렬)
/// ```text
/// offset  field             size
/// 0       src_addr          4
/// 4       src_mask          4
/// 8       dst_addr          4
/// 12      dst_mask          4
/// 16      src_port_lo/hi    4
/// 20      dst_port_lo/hi    4
/// 24      redirect_ifindex  4
/// 28      rule_id           4
/// 32      redirect_mac      6
/// 38      protocol          1
/// 39      flags             1
/// 40      action            1
/// 41      _pad              3
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuleEntry {
    /// 출발지 네트워크 주소 (이미 마스크가 적용된 값)
    pub src_addr: u32,
    /// 출발지 넷마스크 (0이면 모든 주소)
    pub src_mask: u32,
    /// 목적지 네트워크 주소 (이미 마스크가 적용된 값)
    pub dst_addr: u32,
    /// 목적지 넷마스크
    pub dst_mask: u32,
    pub src_port_lo: u16,
    pub src_port_hi: u16,
    pub dst_port_lo: u16,
    pub dst_port_hi: u16,
    /// 리다이렉트 대상 인터페이스 인덱스 (ACTION_REDIRECT일 때만 의미)
    pub redirect_ifindex: u32,
    /// 감사 레코드에 기록되는 룰 ID (1부터 시작, 선언 순서)
    pub rule_id: u32,
    pub redirect_mac: [u8; 6],
    pub protocol: u8,
    /// RULE_MATCH_PROTO | RULE_REWRITE_MAC
    pub flags: u8,
    /// ACTION_PASS | ACTION_DROP | ACTION_REDIRECT
    pub action: u8,
    pub _pad: [u8; 3],
}

// SAFETY: RuleEntry는 #[repr(C)]이며 모든 필드가 Plain Old Data입니다.
// 패딩은 명시적으로 정의되어 있습니다.
#[cfg(feature = "user")]
unsafe impl aya::Pod for RuleEntry {}

const _: () = assert!(core::mem::size_of::<RuleEntry>() == 44);

impl RuleEntry {
    /// 모든 패킷에 매칭되는 빈 룰을 생성합니다.
    pub const fn zeroed() -> Self {
        Self {
            src_addr: 0,
            src_mask: 0,
            dst_addr: 0,
            dst_mask: 0,
            src_port_lo: 0,
            src_port_hi: u16::MAX,
            dst_port_lo: 0,
            dst_port_hi: u16::MAX,
            redirect_ifindex: 0,
            rule_id: RULE_ID_DEFAULT,
            redirect_mac: [0; 6],
            protocol: 0,
            flags: 0,
            action: ACTION_PASS,
            _pad: [0; 3],
        }
    }

    /// 매치 키가 이 룰에 해당하는지 검사합니다.
    #[inline(always)]
    pub fn matches(&self, key: &FlowKey) -> bool {
        (key.src_addr & self.src_mask) == self.src_addr
            && (key.dst_addr & self.dst_mask) == self.dst_addr
            && (self.flags & RULE_MATCH_PROTO == 0 || key.protocol == self.protocol)
            && key.src_port >= self.src_port_lo
            && key.src_port <= self.src_port_hi
            && key.dst_port >= self.dst_port_lo
            && key.dst_port <= self.dst_port_hi
    }
}

/// 정렬된 룰 목록에서 처음 매칭되는 룰을 반환합니다.
pub fn first_match<'a, I>(rules: I, key: &FlowKey) -> Option<&'a RuleEntry>
where
    I: IntoIterator<Item = &'a RuleEntry>,
{
    rules.into_iter().find(|rule| rule.matches(key))
}

// =============================================================================
// 설정 엔트리
// =============================================================================

/// 룰 테이블 전역 설정
///
/// `Array<Settings>` 맵의 0번 엔트리에 저장됩니다.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    /// 유효한 룰 엔트리 수 (0..rule_count 만 스캔)
    pub rule_count: u32,
    /// 매칭 룰이 없을 때의 판정 (ACTION_PASS | ACTION_DROP)
    pub default_action: u8,
    /// 0이 아니면 감사 이벤트를 기록
    pub audit_enabled: u8,
    pub _pad: [u8; 2],
}

// SAFETY: Settings는 #[repr(C)]이며 모든 필드가 Plain Old Data입니다.
#[cfg(feature = "user")]
unsafe impl aya::Pod for Settings {}

impl Settings {
    pub const fn zeroed() -> Self {
        Self {
            rule_count: 0,
            default_action: ACTION_PASS,
            audit_enabled: 0,
            _pad: [0; 2],
        }
    }
}

// =============================================================================
// 판정
// =============================================================================

/// 분류 결과
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub action: u8,
    /// 매칭된 룰 ID (기본 판정이면 RULE_ID_DEFAULT)
    pub rule_id: u32,
    pub redirect_ifindex: u32,
    /// 리다이렉트 전 재작성할 목적지 MAC
    pub rewrite_mac: Option<[u8; 6]>,
}

impl Decision {
    /// 기본 판정을 생성합니다.
    pub const fn default_verdict(settings: &Settings) -> Self {
        Self {
            action: settings.default_action,
            rule_id: RULE_ID_DEFAULT,
            redirect_ifindex: 0,
            rewrite_mac: None,
        }
    }

    /// 룰이 발동한 판정인지 반환합니다.
    pub const fn rule_fired(&self) -> bool {
        self.rule_id != RULE_ID_DEFAULT
    }
}

/// 매칭된 룰(또는 없음)과 설정으로 판정을 계산합니다.
#[inline(always)]
pub fn decide(rule: Option<&RuleEntry>, settings: &Settings) -> Decision {
    match rule {
        Some(rule) => Decision {
            action: rule.action,
            rule_id: rule.rule_id,
            redirect_ifindex: rule.redirect_ifindex,
            rewrite_mac: if rule.flags & RULE_REWRITE_MAC != 0 {
                Some(rule.redirect_mac)
            } else {
                None
            },
        },
        None => Decision::default_verdict(settings),
    }
}

// =============================================================================
// 카운터 슬롯
// =============================================================================

/// CPU별 카운터 슬롯
///
/// `PerCpuArray<StatsSlot>` 맵의 0번 엔트리에서 사용됩니다. 각 CPU는 자신의
/// 슬롯만 갱신하므로 원자적 연산이 필요 없습니다. 모든 패킷은 `packets`,
/// `bytes`, 그리고 판정 카테고리 하나를 정확히 한 번 증가시킵니다.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSlot {
    pub packets: u64,
    pub bytes: u64,
    pub passed: u64,
    pub dropped: u64,
    pub redirected: u64,
    /// 헤더 파싱 실패로 기본 판정을 받은 패킷 수
    pub parse_errors: u64,
}

// SAFETY: StatsSlot는 #[repr(C)]이며 모든 필드가 u64입니다.
#[cfg(feature = "user")]
unsafe impl aya::Pod for StatsSlot {}

impl StatsSlot {
    pub const fn zeroed() -> Self {
        Self {
            packets: 0,
            bytes: 0,
            passed: 0,
            dropped: 0,
            redirected: 0,
            parse_errors: 0,
        }
    }

    /// 패킷 하나의 판정을 기록합니다.
    #[inline(always)]
    pub fn record(&mut self, bytes: u64, action: u8) {
        self.packets = self.packets.wrapping_add(1);
        self.bytes = self.bytes.wrapping_add(bytes);
        match action {
            ACTION_DROP => self.dropped = self.dropped.wrapping_add(1),
            ACTION_REDIRECT => self.redirected = self.redirected.wrapping_add(1),
            _ => self.passed = self.passed.wrapping_add(1),
        }
    }

    /// 파싱 실패 패킷을 기본 판정과 함께 기록합니다.
    #[inline(always)]
    pub fn record_parse_error(&mut self, bytes: u64, default_action: u8) {
        self.record(bytes, default_action);
        self.parse_errors = self.parse_errors.wrapping_add(1);
    }

    /// 다른 슬롯의 값을 더합니다.
    pub fn merge(&mut self, other: &StatsSlot) {
        self.packets = self.packets.wrapping_add(other.packets);
        self.bytes = self.bytes.wrapping_add(other.bytes);
        self.passed = self.passed.wrapping_add(other.passed);
        self.dropped = self.dropped.wrapping_add(other.dropped);
        self.redirected = self.redirected.wrapping_add(other.redirected);
        self.parse_errors = self.parse_errors.wrapping_add(other.parse_errors);
    }
}

// =============================================================================
// 감사 이벤트
// =============================================================================

/// 감사 이벤트 레코드
///
/// `RingBuf`를 통해 커널 → 유저스페이스로 전달됩니다. 룰이 발동한 패킷마다
/// 하나씩 기록되며, 버퍼가 가득 차면 폐기됩니다.
///
/// # 메모리 레이아웃 (40 바이트, 8바이트 정렬)
/// ```text
/// offset  field             size
/// 0       timestamp_ns      8
/// 8       src_addr          4
/// 12      dst_addr          4
/// 16      rule_id           4
/// 20      ingress_ifindex   4
/// 24      redirect_ifindex  4
/// 28      src_port          2
/// 30      dst_port          2
/// 32      pkt_len           2
/// 34      protocol          1
/// 35      action            1
/// 36      _pad              4
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuditEvent {
    /// 단조 시계 기준 타임스탬프 (나노초)
    pub timestamp_ns: u64,
    pub src_addr: u32,
    pub dst_addr: u32,
    pub rule_id: u32,
    pub ingress_ifindex: u32,
    pub redirect_ifindex: u32,
    pub src_port: u16,
    pub dst_port: u16,
    /// 패킷 길이 (65535에서 포화)
    pub pkt_len: u16,
    pub protocol: u8,
    pub action: u8,
    pub _pad: [u8; 4],
}

// SAFETY: AuditEvent는 #[repr(C)]이며 모든 필드가 Plain Old Data입니다.
#[cfg(feature = "user")]
unsafe impl aya::Pod for AuditEvent {}

const _: () = assert!(core::mem::size_of::<AuditEvent>() == 40);

impl AuditEvent {
    /// 매치 키와 판정으로 레코드를 생성합니다.
    #[inline(always)]
    pub fn new(
        timestamp_ns: u64,
        key: &FlowKey,
        decision: &Decision,
        ingress_ifindex: u32,
        pkt_len: u64,
    ) -> Self {
        Self {
            timestamp_ns,
            src_addr: key.src_addr,
            dst_addr: key.dst_addr,
            rule_id: decision.rule_id,
            ingress_ifindex,
            redirect_ifindex: decision.redirect_ifindex,
            src_port: key.src_port,
            dst_port: key.dst_port,
            pkt_len: if pkt_len > u16::MAX as u64 {
                u16::MAX
            } else {
                pkt_len as u16
            },
            protocol: key.protocol,
            action: decision.action,
            _pad: [0; 4],
        }
    }
}
