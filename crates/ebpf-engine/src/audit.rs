//! 감사 이벤트 소비 — 이벤트 채널 → 감사 싱크
//!
//! [`EventDrain`]은 패킷 경로와 통계 집계와는 별도의 주기로 감사 이벤트 채널을
//! 비웁니다. 한 번의 [`EventDrain::drain_once`]는 최대 `timeout` 동안 기다리고
//! 그 시점에 쌓인 레코드를 최대 `max_batch`개까지 싱크로 전달합니다.
//!
//! 빈 채널은 정상 상태이며 0을 반환합니다.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use xdpfwd_common::AuditEvent;
use xdpfwd_core::error::ChannelError;
use xdpfwd_core::metrics as m;

use crate::rule::{Protocol, RuleAction};
use crate::tables::EventChannel;

/// 사용자에게 보이는 감사 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    /// 단조 시계 기준 타임스탬프 (나노초)
    pub timestamp_ns: u64,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: Protocol,
    pub src_port: u16,
    pub dst_port: u16,
    /// 1부터 시작하는 선언 순서 룰 ID
    pub rule_id: u32,
    /// 알 수 없는 액션 코드면 `None`
    pub verdict: Option<RuleAction>,
    pub ingress_ifindex: u32,
    pub redirect_ifindex: u32,
    pub pkt_len: u16,
}

impl From<&AuditEvent> for AuditRecord {
    fn from(event: &AuditEvent) -> Self {
        Self {
            timestamp_ns: event.timestamp_ns,
            src: Ipv4Addr::from(event.src_addr),
            dst: Ipv4Addr::from(event.dst_addr),
            protocol: Protocol::from_number(event.protocol),
            src_port: event.src_port,
            dst_port: event.dst_port,
            rule_id: event.rule_id,
            verdict: RuleAction::from_code(event.action),
            ingress_ifindex: event.ingress_ifindex,
            redirect_ifindex: event.redirect_ifindex,
            pkt_len: event.pkt_len,
        }
    }
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = self.verdict.map_or("unknown", RuleAction::as_str);
        write!(
            f,
            "rule {} {} {}:{} -> {}:{} ({}, {} bytes)",
            self.rule_id,
            verdict,
            self.src,
            self.src_port,
            self.dst,
            self.dst_port,
            self.protocol,
            self.pkt_len
        )
    }
}

/// 감사 레코드를 받는 대상
pub trait AuditSink: Send {
    fn deliver(&mut self, record: &AuditRecord);
}

/// 구조화 로그로 감사 레코드를 남기는 싱크 (target: `xdpfwd::audit`)
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn deliver(&mut self, record: &AuditRecord) {
        info!(
            target: "xdpfwd::audit",
            rule_id = record.rule_id,
            verdict = record.verdict.map_or("unknown", RuleAction::as_str),
            src = %record.src,
            dst = %record.dst,
            protocol = %record.protocol,
            src_port = record.src_port,
            dst_port = record.dst_port,
            ingress_ifindex = record.ingress_ifindex,
            redirect_ifindex = record.redirect_ifindex,
            pkt_len = record.pkt_len,
            "rule fired"
        );
    }
}

/// 레코드를 메모리에 모으는 싱크
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    pub records: Vec<AuditRecord>,
}

impl AuditSink for CollectingSink {
    fn deliver(&mut self, record: &AuditRecord) {
        self.records.push(record.clone());
    }
}

/// 이벤트 채널 소비 루프의 한 단계
pub struct EventDrain<E, K> {
    channel: E,
    sink: K,
    timeout: Duration,
    max_batch: usize,
    delivered: u64,
}

impl<E: EventChannel, K: AuditSink> EventDrain<E, K> {
    pub fn new(channel: E, sink: K, timeout: Duration, max_batch: usize) -> Self {
        Self {
            channel,
            sink,
            timeout,
            max_batch: max_batch.max(1),
            delivered: 0,
        }
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// 시작 이후 전달한 레코드 수
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// 채널을 한 번 폴링해 쌓인 레코드를 싱크로 전달합니다.
    ///
    /// 전달한 레코드 수를 반환합니다.
    pub async fn drain_once(&mut self) -> Result<usize, ChannelError> {
        self.drain_with(self.timeout).await
    }

    /// 지정한 대기 시간으로 한 번 폴링합니다 (종료 시 최종 소비용).
    pub async fn drain_with(&mut self, timeout: Duration) -> Result<usize, ChannelError> {
        let events = self.channel.poll(timeout, self.max_batch).await?;
        for event in &events {
            self.sink.deliver(&AuditRecord::from(event));
        }

        let count = events.len();
        if count > 0 {
            self.delivered += count as u64;
            metrics::counter!(m::AUDIT_EVENTS_TOTAL).increment(count as u64);
            debug!(count, total = self.delivered, "audit events drained");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use xdpfwd_common::{ACTION_DROP, Decision, FlowKey, PROTO_UDP};

    use super::*;

    struct QueueChannel {
        queue: VecDeque<AuditEvent>,
        polls: usize,
    }

    impl EventChannel for QueueChannel {
        async fn poll(&mut self, _timeout: Duration, max: usize) -> Result<Vec<AuditEvent>, ChannelError> {
            self.polls += 1;
            let n = max.min(self.queue.len());
            Ok(self.queue.drain(..n).collect())
        }
    }

    fn event(rule_id: u32) -> AuditEvent {
        let key = FlowKey::new(
            u32::from(Ipv4Addr::new(192, 0, 2, 1)),
            u32::from(Ipv4Addr::new(10, 0, 0, 5)),
            PROTO_UDP,
            4000,
            53,
        );
        let decision = Decision {
            action: ACTION_DROP,
            rule_id,
            redirect_ifindex: 0,
            rewrite_mac: None,
        };
        AuditEvent::new(42, &key, &decision, 2, 128)
    }

    #[test]
    fn test_record_from_event() {
        let record = AuditRecord::from(&event(3));
        assert_eq!(record.src, Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(record.dst, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(record.protocol, Protocol::Udp);
        assert_eq!(record.verdict, Some(RuleAction::Drop));
        assert_eq!(record.rule_id, 3);
        assert_eq!(record.ingress_ifindex, 2);
        assert_eq!(
            record.to_string(),
            "rule 3 drop 192.0.2.1:4000 -> 10.0.0.5:53 (udp, 128 bytes)"
        );
    }

    #[test]
    fn test_record_unknown_action() {
        let mut raw = event(1);
        raw.action = 9;
        assert_eq!(AuditRecord::from(&raw).verdict, None);
    }

    #[tokio::test]
    async fn test_drain_empty_channel_is_not_an_error() {
        let channel = QueueChannel {
            queue: VecDeque::new(),
            polls: 0,
        };
        let mut drain = EventDrain::new(channel, CollectingSink::default(), Duration::from_millis(10), 16);
        assert_eq!(drain.drain_once().await.unwrap(), 0);
        assert_eq!(drain.delivered(), 0);
    }

    #[tokio::test]
    async fn test_drain_respects_batch_limit() {
        let channel = QueueChannel {
            queue: (1..=5).map(event).collect(),
            polls: 0,
        };
        let mut drain = EventDrain::new(channel, CollectingSink::default(), Duration::from_millis(10), 2);

        assert_eq!(drain.drain_once().await.unwrap(), 2);
        assert_eq!(drain.drain_once().await.unwrap(), 2);
        assert_eq!(drain.drain_once().await.unwrap(), 1);
        assert_eq!(drain.drain_once().await.unwrap(), 0);

        let ids: Vec<u32> = drain.sink().records.iter().map(|r| r.rule_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(drain.delivered(), 5);
    }
}
