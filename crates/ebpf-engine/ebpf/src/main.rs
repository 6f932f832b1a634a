#![no_std]
#![no_main]

use core::mem;

use aya_ebpf::{
    bindings::xdp_action,
    helpers::{bpf_ktime_get_ns, bpf_redirect},
    macros::{map, xdp},
    maps::{Array, PerCpuArray, RingBuf},
    programs::XdpContext,
};
use aya_log_ebpf::warn;
use network_types::{
    eth::EthHdr,
    ip::{IpProto, Ipv4Hdr},
    tcp::TcpHdr,
    udp::UdpHdr,
};
use xdpfwd_common::{
    ACTION_DROP, ACTION_REDIRECT, AUDIT_RING_BYTES, AuditEvent, Decision, FlowKey, MAX_RULES,
    RuleEntry, Settings, StatsSlot, decide,
};

// ── Constants ───────────────────────────────────────────────────────

const ETH_P_IP: u16 = 0x0800;
const ETH_P_8021Q: u16 = 0x8100;
const VLAN_HDR_LEN: usize = 4;
const IPV4_MIN_HDR_LEN: usize = 20;
/// IPv4 fragment offset mask (low 13 bits of flags/frag_off)
const IP_OFFSET_MASK: u16 = 0x1FFF;

/// 802.1Q VLAN tag (EthHdr 뒤 4바이트)
#[repr(C)]
struct VlanHdr {
    _tci: u16,
    ether_type: u16,
}

// ── Maps ────────────────────────────────────────────────────────────

/// 룰 테이블 (0..rule_count, 우선순위 순서)
#[map(name = "FWD_RULES")]
static FWD_RULES: Array<RuleEntry> = Array::with_max_entries(MAX_RULES, 0);

/// 룰 수 / 기본 판정 / 감사 플래그 (엔트리 1개)
#[map(name = "FWD_SETTINGS")]
static FWD_SETTINGS: Array<Settings> = Array::with_max_entries(1, 0);

/// CPU별 카운터 슬롯
#[map(name = "FWD_STATS")]
static FWD_STATS: PerCpuArray<StatsSlot> = PerCpuArray::with_max_entries(1, 0);

/// 감사 이벤트 링 버퍼
#[map(name = "AUDIT_EVENTS")]
static AUDIT_EVENTS: RingBuf = RingBuf::with_byte_size(AUDIT_RING_BYTES, 0);

// ── Entry point ─────────────────────────────────────────────────────

/// XDP 포워딩 분류기
///
/// 수신 패킷마다 한 번 실행됩니다. 헤더 파싱 실패는 기본 판정으로 처리하고
/// `parse_errors` 카운터만 증가시킵니다.
#[xdp]
pub fn xdpfwd(ctx: XdpContext) -> u32 {
    let settings = match FWD_SETTINGS.get(0) {
        Some(s) => *s,
        None => Settings::zeroed(),
    };
    let pkt_len = (ctx.data_end() - ctx.data()) as u64;

    match parse_flow(&ctx) {
        Ok(Some(key)) => classify(&ctx, &key, &settings, pkt_len),
        Ok(None) => {
            let decision = Decision::default_verdict(&settings);
            record_stats(pkt_len, decision.action, false);
            apply(&ctx, &decision)
        }
        Err(()) => {
            let decision = Decision::default_verdict(&settings);
            record_stats(pkt_len, decision.action, true);
            apply(&ctx, &decision)
        }
    }
}

#[inline(always)]
fn classify(ctx: &XdpContext, key: &FlowKey, settings: &Settings, pkt_len: u64) -> u32 {
    let count = if settings.rule_count > MAX_RULES {
        MAX_RULES
    } else {
        settings.rule_count
    };

    let mut matched: Option<&RuleEntry> = None;
    for i in 0..MAX_RULES {
        if i >= count {
            break;
        }
        if let Some(rule) = FWD_RULES.get(i) {
            if rule.matches(key) {
                matched = Some(rule);
                break;
            }
        }
    }

    let decision = decide(matched, settings);
    record_stats(pkt_len, decision.action, false);

    if settings.audit_enabled != 0 && decision.rule_fired() {
        emit_audit(ctx, key, &decision, pkt_len);
    }

    apply(ctx, &decision)
}

// ── Parsing ─────────────────────────────────────────────────────────

/// 매치 키를 만듭니다. IPv4가 아니면 `Ok(None)`, 헤더가 잘렸으면 `Err(())`.
#[inline(always)]
fn parse_flow(ctx: &XdpContext) -> Result<Option<FlowKey>, ()> {
    let ethhdr: *const EthHdr = unsafe { ptr_at(ctx, 0)? };
    let mut ether_type = u16::from_be(unsafe { (*ethhdr).ether_type });
    let mut l3_offset = EthHdr::LEN;

    if ether_type == ETH_P_8021Q {
        let vhdr: *const VlanHdr = unsafe { ptr_at(ctx, l3_offset)? };
        ether_type = u16::from_be(unsafe { (*vhdr).ether_type });
        l3_offset += VLAN_HDR_LEN;
    }

    if ether_type != ETH_P_IP {
        return Ok(None);
    }

    let ipv4hdr: *const Ipv4Hdr = unsafe { ptr_at(ctx, l3_offset)? };
    // ihl() returns the header length in bytes
    let ihl = unsafe { (*ipv4hdr).ihl() } as usize;
    if ihl < IPV4_MIN_HDR_LEN {
        return Err(());
    }
    let src_addr = u32::from_be_bytes(unsafe { (*ipv4hdr).src_addr });
    let dst_addr = u32::from_be_bytes(unsafe { (*ipv4hdr).dst_addr });
    let protocol = unsafe { (*ipv4hdr).proto };

    let frag: *const [u8; 2] = unsafe { ptr_at(ctx, l3_offset + 6)? };
    let frag_offset = u16::from_be_bytes(unsafe { *frag }) & IP_OFFSET_MASK;

    let l4_offset = l3_offset + ihl;
    let (src_port, dst_port) = if frag_offset != 0 {
        (0u16, 0u16)
    } else {
        match protocol {
            IpProto::Tcp => {
                let tcphdr: *const TcpHdr = unsafe { ptr_at(ctx, l4_offset)? };
                (
                    u16::from_be_bytes(unsafe { (*tcphdr).source }),
                    u16::from_be_bytes(unsafe { (*tcphdr).dest }),
                )
            }
            IpProto::Udp => {
                let udphdr: *const UdpHdr = unsafe { ptr_at(ctx, l4_offset)? };
                (
                    u16::from_be_bytes(unsafe { (*udphdr).src }),
                    u16::from_be_bytes(unsafe { (*udphdr).dst }),
                )
            }
            _ => (0u16, 0u16),
        }
    };

    Ok(Some(FlowKey::new(
        src_addr,
        dst_addr,
        protocol as u8,
        src_port,
        dst_port,
    )))
}

// ── Verdict / side effects ──────────────────────────────────────────

#[inline(always)]
fn apply(ctx: &XdpContext, decision: &Decision) -> u32 {
    match decision.action {
        ACTION_DROP => xdp_action::XDP_DROP,
        ACTION_REDIRECT => {
            if decision.redirect_ifindex == 0 {
                warn!(ctx, "rule {} has no redirect target", decision.rule_id);
                return xdp_action::XDP_PASS;
            }
            if let Some(mac) = decision.rewrite_mac {
                match unsafe { ptr_at_mut::<[u8; 6]>(ctx, 0) } {
                    Ok(dst) => unsafe { *dst = mac },
                    Err(()) => return xdp_action::XDP_PASS,
                }
            }
            unsafe { bpf_redirect(decision.redirect_ifindex, 0) as u32 }
        }
        _ => xdp_action::XDP_PASS,
    }
}

#[inline(always)]
fn record_stats(pkt_len: u64, action: u8, parse_error: bool) {
    if let Some(slot) = FWD_STATS.get_ptr_mut(0) {
        unsafe {
            if parse_error {
                (*slot).record_parse_error(pkt_len, action);
            } else {
                (*slot).record(pkt_len, action);
            }
        }
    }
}

/// 링 버퍼가 가득 차면 레코드를 조용히 버립니다.
#[inline(always)]
fn emit_audit(ctx: &XdpContext, key: &FlowKey, decision: &Decision, pkt_len: u64) {
    if let Some(mut entry) = AUDIT_EVENTS.reserve::<AuditEvent>(0) {
        let ingress_ifindex = unsafe { (*ctx.ctx).ingress_ifindex };
        let timestamp_ns = unsafe { bpf_ktime_get_ns() };
        entry.write(AuditEvent::new(
            timestamp_ns,
            key,
            decision,
            ingress_ifindex,
            pkt_len,
        ));
        entry.submit(0);
    }
}

// ── Pointer helpers ─────────────────────────────────────────────────

#[inline(always)]
unsafe fn ptr_at<T>(ctx: &XdpContext, offset: usize) -> Result<*const T, ()> {
    let start = ctx.data();
    let end = ctx.data_end();
    let len = mem::size_of::<T>();
    if start + offset + len > end {
        return Err(());
    }
    Ok((start + offset) as *const T)
}

#[inline(always)]
unsafe fn ptr_at_mut<T>(ctx: &XdpContext, offset: usize) -> Result<*mut T, ()> {
    let ptr = unsafe { ptr_at::<T>(ctx, offset)? };
    Ok(ptr as *mut T)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
