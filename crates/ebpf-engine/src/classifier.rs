//! 패킷 분류기 — 유저스페이스 모델
//!
//! 커널 XDP 프로그램과 같은 규칙으로 프레임을 파싱하고 판정합니다.
//! 매칭/판정/카운터 로직은 `xdpfwd-common`을 그대로 공유하므로 에뮬레이션
//! 데이터패스, 퍼징, 벤치마크가 커널과 같은 결과를 냅니다.
//!
//! # 파싱 규칙
//! - Ethernet + 선택적 802.1Q 태그 1개
//! - IPv4만 매칭 대상 (그 외 EtherType은 파싱 실패가 아닌 기본 판정)
//! - IHL < 5 또는 잘린 헤더 → [`ParseFault`]
//! - 첫 조각이 아닌 IP 조각은 포트 0

use xdpfwd_common::{Decision, FlowKey, PROTO_TCP, PROTO_UDP, RuleEntry, Settings, decide, first_match};

const ETH_HDR_LEN: usize = 14;
const VLAN_HDR_LEN: usize = 4;
const IPV4_MIN_HDR_LEN: usize = 20;
const ETH_P_IP: u16 = 0x0800;
const ETH_P_8021Q: u16 = 0x8100;
const IP_OFFSET_MASK: u16 = 0x1FFF;

/// 헤더 파싱 실패
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseFault {
    /// 헤더가 프레임 끝을 넘어감
    #[error("truncated {layer} header")]
    Truncated { layer: &'static str },

    /// IPv4 IHL이 최소값(5)보다 작음
    #[error("invalid IPv4 header length {ihl}")]
    BadIhl { ihl: u8 },
}

fn read_u16(frame: &[u8], offset: usize, layer: &'static str) -> Result<u16, ParseFault> {
    frame
        .get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(ParseFault::Truncated { layer })
}

fn read_u32(frame: &[u8], offset: usize, layer: &'static str) -> Result<u32, ParseFault> {
    frame
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(ParseFault::Truncated { layer })
}

/// 프레임에서 매치 키를 만듭니다.
///
/// IPv4가 아니면 `Ok(None)`을 반환합니다.
pub fn parse_frame(frame: &[u8]) -> Result<Option<FlowKey>, ParseFault> {
    if frame.len() < ETH_HDR_LEN {
        return Err(ParseFault::Truncated { layer: "ethernet" });
    }
    let mut ether_type = read_u16(frame, 12, "ethernet")?;
    let mut l3 = ETH_HDR_LEN;

    if ether_type == ETH_P_8021Q {
        ether_type = read_u16(frame, l3 + 2, "vlan")?;
        l3 += VLAN_HDR_LEN;
    }

    if ether_type != ETH_P_IP {
        return Ok(None);
    }

    if frame.len() < l3 + IPV4_MIN_HDR_LEN {
        return Err(ParseFault::Truncated { layer: "ipv4" });
    }
    let ihl = frame[l3] & 0x0F;
    if usize::from(ihl) * 4 < IPV4_MIN_HDR_LEN {
        return Err(ParseFault::BadIhl { ihl });
    }
    let frag_offset = read_u16(frame, l3 + 6, "ipv4")? & IP_OFFSET_MASK;
    let protocol = frame[l3 + 9];
    let src_addr = read_u32(frame, l3 + 12, "ipv4")?;
    let dst_addr = read_u32(frame, l3 + 16, "ipv4")?;

    let l4 = l3 + usize::from(ihl) * 4;
    let (src_port, dst_port) = if frag_offset != 0 {
        (0, 0)
    } else {
        match protocol {
            PROTO_TCP => {
                // 커널과 동일하게 TCP 헤더 전체(20바이트)가 있어야 함
                if frame.len() < l4 + 20 {
                    return Err(ParseFault::Truncated { layer: "tcp" });
                }
                (read_u16(frame, l4, "tcp")?, read_u16(frame, l4 + 2, "tcp")?)
            }
            PROTO_UDP => {
                if frame.len() < l4 + 8 {
                    return Err(ParseFault::Truncated { layer: "udp" });
                }
                (read_u16(frame, l4, "udp")?, read_u16(frame, l4 + 2, "udp")?)
            }
            _ => (0, 0),
        }
    };

    Ok(Some(FlowKey::new(
        src_addr, dst_addr, protocol, src_port, dst_port,
    )))
}

/// 분류 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub decision: Decision,
    /// IPv4 매치 키 (IPv4가 아니거나 파싱 실패면 `None`)
    pub key: Option<FlowKey>,
    pub parse_fault: Option<ParseFault>,
}

/// 프레임 하나를 룰 테이블 내용으로 판정합니다.
///
/// `rules`는 테이블 전체여도 되며, `settings.rule_count`까지만 스캔합니다.
pub fn classify(frame: &[u8], rules: &[RuleEntry], settings: &Settings) -> Classification {
    match parse_frame(frame) {
        Ok(Some(key)) => {
            let count = (settings.rule_count as usize).min(rules.len());
            let rule = first_match(&rules[..count], &key);
            Classification {
                decision: decide(rule, settings),
                key: Some(key),
                parse_fault: None,
            }
        }
        Ok(None) => Classification {
            decision: Decision::default_verdict(settings),
            key: None,
            parse_fault: None,
        },
        Err(fault) => Classification {
            decision: Decision::default_verdict(settings),
            key: None,
            parse_fault: Some(fault),
        },
    }
}

/// 테스트/퍼징/벤치마크용 프레임 생성기
pub mod frame {
    use std::net::Ipv4Addr;

    use xdpfwd_common::{PROTO_TCP, PROTO_UDP};

    /// Ethernet + IPv4 + (TCP|UDP) 프레임을 만듭니다.
    pub fn ipv4(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, src_port: u16, dst_port: u16) -> Vec<u8> {
        let l4_len = match protocol {
            PROTO_TCP => 20,
            PROTO_UDP => 8,
            _ => 8,
        };
        let mut frame = Vec::with_capacity(14 + 20 + l4_len);
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02]);
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
        frame.extend_from_slice(&0x0800u16.to_be_bytes());

        let total_len = (20 + l4_len) as u16;
        frame.push(0x45);
        frame.push(0);
        frame.extend_from_slice(&total_len.to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0, 0]);
        frame.push(64);
        frame.push(protocol);
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(&src.octets());
        frame.extend_from_slice(&dst.octets());

        let mut l4 = vec![0u8; l4_len];
        if protocol == PROTO_TCP || protocol == PROTO_UDP {
            l4[0..2].copy_from_slice(&src_port.to_be_bytes());
            l4[2..4].copy_from_slice(&dst_port.to_be_bytes());
        }
        frame.extend_from_slice(&l4);
        frame
    }

    /// UDP 프레임
    pub fn udp(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16) -> Vec<u8> {
        ipv4(src, dst, PROTO_UDP, src_port, dst_port)
    }

    /// TCP 프레임
    pub fn tcp(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16) -> Vec<u8> {
        ipv4(src, dst, PROTO_TCP, src_port, dst_port)
    }

    /// 802.1Q 태그를 삽입합니다.
    pub fn with_vlan(frame: &[u8], vlan_id: u16) -> Vec<u8> {
        let mut tagged = Vec::with_capacity(frame.len() + 4);
        tagged.extend_from_slice(&frame[..12]);
        tagged.extend_from_slice(&0x8100u16.to_be_bytes());
        tagged.extend_from_slice(&(vlan_id & 0x0FFF).to_be_bytes());
        tagged.extend_from_slice(&frame[12..]);
        tagged
    }
}
