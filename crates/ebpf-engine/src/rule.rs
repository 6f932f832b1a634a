//! 포워딩 룰 모델 — 파싱, 검증, 룰 테이블 엔트리로 컴파일
//!
//! [`RuleSet`]은 룰 소스에서 읽은 선언 순서 그대로의 룰 목록입니다.
//! [`RuleSet::compile`]은 룰을 검증하고 우선순위 내림차순(같으면 선언 순서)으로
//! 정렬한 [`CompiledRules`]를 만듭니다. 커널은 이 순서대로 처음 매칭되는 룰을
//! 사용하므로, 우선순위 정책은 전부 컴파일 단계에서 결정됩니다.
//!
//! # 설정 예시 (TOML)
//! ```toml
//! default_action = "pass"
//!
//! [[rules]]
//! id = "block-host"
//! dst = "10.0.0.5"
//! action = "drop"
//!
//! [[rules]]
//! id = "dns"
//! dst = "10.0.0.0/24"
//! protocol = "udp"
//! dst_port = 53
//! action = "redirect"
//! redirect_interface = "eth1"
//! priority = 5
//! ```

use std::cmp::Reverse;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use xdpfwd_common::{
    ACTION_DROP, ACTION_PASS, ACTION_REDIRECT, PROTO_ICMP, PROTO_TCP, PROTO_UDP,
    RULE_MATCH_PROTO, RULE_REWRITE_MAC, RuleEntry, Settings,
};
use xdpfwd_core::error::{CapacityError, ConfigError, XdpFwdError};

use crate::iface::InterfaceResolver;

// =============================================================================
// 액션
// =============================================================================

/// 룰 액션 / 분류 판정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// 그대로 통과 (XDP_PASS)
    Pass,
    /// 조용히 폐기 (XDP_DROP)
    Drop,
    /// 다른 인터페이스로 전달 (XDP_REDIRECT)
    Redirect,
}

impl RuleAction {
    /// 커널 액션 코드
    pub fn code(self) -> u8 {
        match self {
            Self::Pass => ACTION_PASS,
            Self::Drop => ACTION_DROP,
            Self::Redirect => ACTION_REDIRECT,
        }
    }

    /// 커널 액션 코드에서 변환합니다.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            ACTION_PASS => Some(Self::Pass),
            ACTION_DROP => Some(Self::Drop),
            ACTION_REDIRECT => Some(Self::Redirect),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Drop => "drop",
            Self::Redirect => "redirect",
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 매칭 룰이 없을 때의 판정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultAction {
    #[default]
    Pass,
    Drop,
}

impl DefaultAction {
    pub fn code(self) -> u8 {
        match self {
            Self::Pass => ACTION_PASS,
            Self::Drop => ACTION_DROP,
        }
    }
}

// =============================================================================
// 매치 필드
// =============================================================================

/// IPv4 CIDR 블록 (`10.0.0.0/24`, 접두사가 없으면 /32)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, String> {
        if prefix > 32 {
            return Err(format!("prefix length {prefix} exceeds 32"));
        }
        Ok(Self { addr, prefix })
    }

    /// 넷마스크 (호스트 바이트 오더)
    pub fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    /// 마스크가 적용된 네트워크 주소 (호스트 바이트 오더)
    pub fn network(&self) -> u32 {
        u32::from(self.addr) & self.mask()
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == self.network()
    }
}

impl FromStr for Ipv4Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => {
                let prefix = prefix
                    .trim()
                    .parse::<u8>()
                    .map_err(|_| format!("invalid prefix length in '{s}'"))?;
                (addr, prefix)
            }
            None => (s, 32),
        };
        let addr = addr
            .trim()
            .parse::<Ipv4Addr>()
            .map_err(|_| format!("invalid IPv4 address in '{s}'"))?;
        Self::new(addr, prefix)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(value: Ipv4Cidr) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// 포트 범위 (양 끝 포함). TOML에서는 `53` 또는 `"1024-65535"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PortSpec", into = "String")]
pub struct PortRange {
    pub lo: u16,
    pub hi: u16,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortSpec {
    Single(u16),
    Text(String),
}

impl PortRange {
    pub fn new(lo: u16, hi: u16) -> Result<Self, String> {
        if lo > hi {
            return Err(format!("port range {lo}-{hi} is inverted"));
        }
        Ok(Self { lo, hi })
    }

    pub fn single(port: u16) -> Self {
        Self { lo: port, hi: port }
    }
}

impl FromStr for PortRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| format!("invalid port in '{s}'"))
        };
        match s.split_once('-') {
            Some((lo, hi)) => Self::new(parse(lo)?, parse(hi)?),
            None => Ok(Self::single(parse(s)?)),
        }
    }
}

impl TryFrom<PortSpec> for PortRange {
    type Error = String;

    fn try_from(value: PortSpec) -> Result<Self, Self::Error> {
        match value {
            PortSpec::Single(port) => Ok(Self::single(port)),
            PortSpec::Text(text) => text.parse(),
        }
    }
}

impl From<PortRange> for String {
    fn from(value: PortRange) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lo == self.hi {
            write!(f, "{}", self.lo)
        } else {
            write!(f, "{}-{}", self.lo, self.hi)
        }
    }
}

/// 전송 계층 프로토콜 (`"tcp"`, `"udp"`, `"icmp"` 또는 프로토콜 번호)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ProtocolSpec", into = "String")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other(u8),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProtocolSpec {
    Number(u8),
    Name(String),
}

impl Protocol {
    pub fn number(self) -> u8 {
        match self {
            Self::Tcp => PROTO_TCP,
            Self::Udp => PROTO_UDP,
            Self::Icmp => PROTO_ICMP,
            Self::Other(n) => n,
        }
    }

    pub fn from_number(n: u8) -> Self {
        match n {
            PROTO_TCP => Self::Tcp,
            PROTO_UDP => Self::Udp,
            PROTO_ICMP => Self::Icmp,
            other => Self::Other(other),
        }
    }

    /// 포트 매칭이 의미 있는 프로토콜인지 반환합니다.
    pub fn has_ports(self) -> bool {
        matches!(self, Self::Tcp | Self::Udp)
    }
}

impl TryFrom<ProtocolSpec> for Protocol {
    type Error = String;

    fn try_from(value: ProtocolSpec) -> Result<Self, Self::Error> {
        match value {
            ProtocolSpec::Number(n) => Ok(Self::from_number(n)),
            ProtocolSpec::Name(name) => match name.to_ascii_lowercase().as_str() {
                "tcp" => Ok(Self::Tcp),
                "udp" => Ok(Self::Udp),
                "icmp" => Ok(Self::Icmp),
                other => other
                    .parse::<u8>()
                    .map(Self::from_number)
                    .map_err(|_| format!("unknown protocol '{name}'")),
            },
        }
    }
}

impl From<Protocol> for String {
    fn from(value: Protocol) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
            Self::Icmp => f.write_str("icmp"),
            Self::Other(n) => write!(f, "{n}"),
        }
    }
}

/// 이더넷 MAC 주소 (`02:00:00:00:00:01`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in &mut bytes {
            let part = parts
                .next()
                .ok_or_else(|| format!("MAC address '{s}' is too short"))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| format!("invalid MAC address octet '{part}'"))?;
        }
        if parts.next().is_some() {
            return Err(format!("MAC address '{s}' is too long"));
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(value: MacAddr) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

// =============================================================================
// 룰 / 룰 세트
// =============================================================================

fn enabled_default() -> bool {
    true
}

/// 포워딩 룰
///
/// `None` 매치 필드는 "모든 값"을 의미합니다 (와일드카드).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// 룰 이름 (없으면 `rule-<n>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<Ipv4Cidr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<Ipv4Cidr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_port: Option<PortRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<PortRange>,
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_ifindex: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_mac: Option<MacAddr>,
    /// 높을수록 먼저 평가 (기본 0)
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

impl Rule {
    /// 와일드카드 매치의 새 룰을 생성합니다.
    pub fn new(action: RuleAction) -> Self {
        Self {
            id: None,
            src: None,
            dst: None,
            protocol: None,
            src_port: None,
            dst_port: None,
            action,
            redirect_ifindex: None,
            redirect_interface: None,
            redirect_mac: None,
            priority: 0,
            enabled: true,
        }
    }

    /// 로그/에러에 쓰는 룰 이름
    pub fn label(&self, position: usize) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("rule-{}", position + 1),
        }
    }

    fn to_entry(
        &self,
        position: usize,
        resolver: &dyn InterfaceResolver,
    ) -> Result<RuleEntry, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidRule {
            rule: self.label(position),
            reason,
        };

        let mut entry = RuleEntry::zeroed();
        entry.rule_id = u32::try_from(position + 1)
            .map_err(|_| invalid("rule position overflows u32".to_owned()))?;
        entry.action = self.action.code();

        if let Some(src) = &self.src {
            entry.src_addr = src.network();
            entry.src_mask = src.mask();
        }
        if let Some(dst) = &self.dst {
            entry.dst_addr = dst.network();
            entry.dst_mask = dst.mask();
        }

        if let Some(proto) = self.protocol {
            entry.protocol = proto.number();
            entry.flags |= RULE_MATCH_PROTO;
        }

        if self.src_port.is_some() || self.dst_port.is_some() {
            match self.protocol {
                Some(proto) if proto.has_ports() => {}
                _ => {
                    return Err(invalid(
                        "ports require protocol \"tcp\" or \"udp\"".to_owned(),
                    ));
                }
            }
        }
        if let Some(range) = self.src_port {
            entry.src_port_lo = range.lo;
            entry.src_port_hi = range.hi;
        }
        if let Some(range) = self.dst_port {
            entry.dst_port_lo = range.lo;
            entry.dst_port_hi = range.hi;
        }

        match self.action {
            RuleAction::Redirect => {
                entry.redirect_ifindex = self.redirect_target(resolver).map_err(invalid)?;
                if let Some(mac) = self.redirect_mac {
                    entry.redirect_mac = mac.0;
                    entry.flags |= RULE_REWRITE_MAC;
                }
            }
            _ => {
                if self.redirect_ifindex.is_some()
                    || self.redirect_interface.is_some()
                    || self.redirect_mac.is_some()
                {
                    return Err(invalid(format!(
                        "redirect target given for action \"{}\"",
                        self.action
                    )));
                }
            }
        }

        Ok(entry)
    }

    fn redirect_target(&self, resolver: &dyn InterfaceResolver) -> Result<u32, String> {
        match (&self.redirect_interface, self.redirect_ifindex) {
            (Some(_), Some(_)) => Err(
                "set only one of redirect_interface and redirect_ifindex".to_owned(),
            ),
            (Some(name), None) => resolver
                .resolve(name)
                .ok_or_else(|| format!("redirect interface '{name}' not found")),
            (None, Some(0)) => Err("redirect_ifindex must not be 0".to_owned()),
            (None, Some(ifindex)) => Ok(ifindex),
            (None, None) => Err("redirect action requires a target interface".to_owned()),
        }
    }
}

/// 룰 소스가 제공하는 전체 룰 목록 (선언 순서)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub default_action: DefaultAction,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// 룰 테이블에 기록할 형태로 컴파일된 룰 세트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRules {
    /// 평가 순서대로 정렬된 엔트리
    pub entries: Vec<RuleEntry>,
    pub default_action: u8,
}

impl CompiledRules {
    /// 룰 테이블 설정 엔트리를 생성합니다.
    pub fn settings(&self, audit_enabled: bool) -> Settings {
        Settings {
            rule_count: self.entries.len() as u32,
            default_action: self.default_action,
            audit_enabled: u8::from(audit_enabled),
            ..Settings::zeroed()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RuleSet {
    /// TOML 문자열에서 룰 세트를 파싱합니다.
    ///
    /// `default_action`과 `[[rules]]` 외의 항목은 무시합니다.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })
    }

    /// 활성화된 룰 수
    pub fn enabled_count(&self) -> usize {
        self.rules.iter().filter(|r| r.enabled).count()
    }

    /// 룰을 검증하고 평가 순서로 정렬된 엔트리 목록을 만듭니다.
    ///
    /// 룰 ID는 선언 순서 기준 1부터 시작합니다. 용량을 넘으면 아무것도 쓰지
    /// 않고 `CapacityError`를 반환합니다.
    pub fn compile(
        &self,
        capacity: u32,
        resolver: &dyn InterfaceResolver,
    ) -> Result<CompiledRules, XdpFwdError> {
        let mut ordered: Vec<(usize, &Rule)> = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.enabled)
            .collect();

        if ordered.len() > capacity as usize {
            return Err(CapacityError::TooManyRules {
                requested: ordered.len(),
                capacity,
            }
            .into());
        }

        // stable sort: 같은 우선순위는 선언 순서 유지
        ordered.sort_by_key(|(_, rule)| Reverse(rule.priority));

        let entries = ordered
            .into_iter()
            .map(|(position, rule)| rule.to_entry(position, resolver))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CompiledRules {
            entries,
            default_action: self.default_action.code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::StaticInterfaces;

    fn no_ifaces() -> StaticInterfaces {
        StaticInterfaces::default()
    }

    fn drop_dst(dst: &str) -> Rule {
        Rule {
            dst: Some(dst.parse().unwrap()),
            ..Rule::new(RuleAction::Drop)
        }
    }

    #[test]
    fn test_cidr_parse_bare_address_is_host_route() {
        let cidr: Ipv4Cidr = "10.0.0.5".parse().unwrap();
        assert_eq!(cidr.mask(), u32::MAX);
        assert!(cidr.contains(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(!cidr.contains(Ipv4Addr::new(10, 0, 0, 6)));
    }

    #[test]
    fn test_cidr_network_masks_host_bits() {
        let cidr: Ipv4Cidr = "10.0.0.77/24".parse().unwrap();
        assert_eq!(cidr.network(), u32::from(Ipv4Addr::new(10, 0, 0, 0)));
        assert_eq!(cidr.mask(), 0xFFFF_FF00);
    }

    #[test]
    fn test_cidr_zero_prefix_matches_everything() {
        let cidr: Ipv4Cidr = "0.0.0.0/0".parse().unwrap();
        assert_eq!(cidr.mask(), 0);
        assert!(cidr.contains(Ipv4Addr::new(192, 168, 1, 1)));
    }

    #[test]
    fn test_cidr_rejects_long_prefix() {
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0/8".parse::<Ipv4Cidr>().is_err());
    }

    #[test]
    fn test_port_range_parse() {
        assert_eq!("53".parse::<PortRange>().unwrap(), PortRange::single(53));
        assert_eq!(
            "1024-65535".parse::<PortRange>().unwrap(),
            PortRange::new(1024, 65535).unwrap()
        );
        assert!("200-100".parse::<PortRange>().is_err());
        assert!("http".parse::<PortRange>().is_err());
    }

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "02:00:0a:FF:00:01".parse().unwrap();
        assert_eq!(mac.0, [0x02, 0x00, 0x0a, 0xff, 0x00, 0x01]);
        assert_eq!(mac.to_string(), "02:00:0a:ff:00:01");
        assert!("02:00:00".parse::<MacAddr>().is_err());
        assert!("02:00:00:00:00:00:00".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_rule_set_from_toml() {
        let set = RuleSet::from_toml(
            r#"
default_action = "drop"

[general]
log_level = "debug"

[[rules]]
id = "dns"
dst = "10.0.0.0/24"
protocol = "udp"
dst_port = 53
action = "pass"

[[rules]]
protocol = 47
src_port = "1-2"
action = "drop"
enabled = false
"#,
        )
        .unwrap();

        assert_eq!(set.default_action, DefaultAction::Drop);
        assert_eq!(set.rules.len(), 2);
        assert_eq!(set.rules[0].dst_port, Some(PortRange::single(53)));
        assert_eq!(set.rules[1].protocol, Some(Protocol::Other(47)));
        assert!(!set.rules[1].enabled);
        assert_eq!(set.enabled_count(), 1);
    }

    #[test]
    fn test_rule_set_from_toml_rejects_unknown_action() {
        let err = RuleSet::from_toml("[[rules]]\naction = \"reject\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed { .. }));
    }

    #[test]
    fn test_compile_orders_by_priority_then_insertion() {
        let mut low = drop_dst("10.0.0.0/24");
        low.action = RuleAction::Pass;
        low.priority = 1;
        let mut high = drop_dst("10.0.0.5");
        high.priority = 5;
        let tie = drop_dst("10.0.0.9");

        let set = RuleSet {
            default_action: DefaultAction::Pass,
            rules: vec![low, high, tie.clone(), Rule { priority: 5, ..tie }],
        };
        let compiled = set.compile(16, &no_ifaces()).unwrap();
        let ids: Vec<u32> = compiled.entries.iter().map(|e| e.rule_id).collect();
        assert_eq!(ids, vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_compile_skips_disabled_rules_but_keeps_ids() {
        let set = RuleSet {
            default_action: DefaultAction::Pass,
            rules: vec![
                Rule {
                    enabled: false,
                    ..drop_dst("10.0.0.1")
                },
                drop_dst("10.0.0.2"),
            ],
        };
        let compiled = set.compile(16, &no_ifaces()).unwrap();
        assert_eq!(compiled.len(), 1);
        assert_eq!(compiled.entries[0].rule_id, 2);
    }

    #[test]
    fn test_compile_capacity_error_counts_enabled_rules() {
        let set = RuleSet {
            default_action: DefaultAction::Pass,
            rules: vec![drop_dst("10.0.0.1"), drop_dst("10.0.0.2"), drop_dst("10.0.0.3")],
        };
        let err = set.compile(2, &no_ifaces()).unwrap_err();
        assert!(matches!(
            err,
            XdpFwdError::Capacity(CapacityError::TooManyRules {
                requested: 3,
                capacity: 2
            })
        ));
    }

    #[test]
    fn test_compile_rejects_ports_without_transport() {
        let set = RuleSet {
            default_action: DefaultAction::Pass,
            rules: vec![Rule {
                dst_port: Some(PortRange::single(80)),
                ..Rule::new(RuleAction::Drop)
            }],
        };
        let err = set.compile(16, &no_ifaces()).unwrap_err();
        assert!(err.to_string().contains("rule-1"));
    }

    #[test]
    fn test_compile_redirect_requires_target() {
        let set = RuleSet {
            default_action: DefaultAction::Pass,
            rules: vec![Rule::new(RuleAction::Redirect)],
        };
        assert!(matches!(
            set.compile(16, &no_ifaces()).unwrap_err(),
            XdpFwdError::Config(ConfigError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_compile_redirect_resolves_interface_and_mac() {
        let ifaces = StaticInterfaces::default().with("eth1", 7);
        let set = RuleSet {
            default_action: DefaultAction::Pass,
            rules: vec![Rule {
                redirect_interface: Some("eth1".to_owned()),
                redirect_mac: Some("02:00:00:00:00:53".parse().unwrap()),
                ..Rule::new(RuleAction::Redirect)
            }],
        };
        let compiled = set.compile(16, &ifaces).unwrap();
        let entry = &compiled.entries[0];
        assert_eq!(entry.redirect_ifindex, 7);
        assert_eq!(entry.action, ACTION_REDIRECT);
        assert_ne!(entry.flags & RULE_REWRITE_MAC, 0);
        assert_eq!(entry.redirect_mac, [2, 0, 0, 0, 0, 0x53]);
    }

    #[test]
    fn test_compile_rejects_unknown_redirect_interface() {
        let set = RuleSet {
            default_action: DefaultAction::Pass,
            rules: vec![Rule {
                redirect_interface: Some("missing0".to_owned()),
                ..Rule::new(RuleAction::Redirect)
            }],
        };
        let err = set.compile(16, &no_ifaces()).unwrap_err();
        assert!(err.to_string().contains("missing0"));
    }

    #[test]
    fn test_compile_rejects_redirect_fields_on_drop() {
        let set = RuleSet {
            default_action: DefaultAction::Pass,
            rules: vec![Rule {
                redirect_ifindex: Some(3),
                ..Rule::new(RuleAction::Drop)
            }],
        };
        assert!(set.compile(16, &no_ifaces()).is_err());
    }

    #[test]
    fn test_settings_from_compiled() {
        let set = RuleSet {
            default_action: DefaultAction::Drop,
            rules: vec![drop_dst("10.0.0.1")],
        };
        let settings = set.compile(16, &no_ifaces()).unwrap().settings(true);
        assert_eq!(settings.rule_count, 1);
        assert_eq!(settings.default_action, ACTION_DROP);
        assert_eq!(settings.audit_enabled, 1);
    }
}
