//! 어태치 관리 — 모드 폴백과 인터페이스당 단일 어태치
//!
//! [`AttachManager::attach`]는 선호 순서대로 모드를 시도하고 처음 성공한
//! 모드를 반환합니다. 그 뒤의 모드는 시도하지 않습니다. 인터페이스마다
//! 활성 어태치는 최대 하나이며, 재어태치는 기존 어태치를 먼저 해제합니다.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use xdpfwd_core::error::AttachmentError;
use xdpfwd_core::types::AttachMode;

/// 분류기 프로그램을 인터페이스에 붙이는 백엔드
///
/// 각 호출은 즉시 성공 또는 실패를 반환합니다 (타임아웃 없음).
pub trait AttachBackend {
    /// 활성 어태치 핸들
    type Link;

    fn attach(&mut self, ifindex: u32, mode: AttachMode) -> Result<Self::Link, String>;

    fn detach(&mut self, ifindex: u32, link: Self::Link) -> Result<(), String>;
}

/// 활성 어태치 상태
#[derive(Debug)]
pub struct Attachment<L> {
    pub ifindex: u32,
    pub mode: AttachMode,
    pub link: L,
}

/// 인터페이스별 어태치 상태 관리자
pub struct AttachManager<B: AttachBackend> {
    backend: B,
    active: HashMap<u32, Attachment<B::Link>>,
}

impl<B: AttachBackend> AttachManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            active: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// 인터페이스에 현재 적용된 모드
    pub fn active_mode(&self, ifindex: u32) -> Option<AttachMode> {
        self.active.get(&ifindex).map(|a| a.mode)
    }

    pub fn is_attached(&self, ifindex: u32) -> bool {
        self.active.contains_key(&ifindex)
    }

    /// 선호 순서대로 모드를 시도해 어태치합니다.
    ///
    /// # 에러
    /// - `AttachmentError::NoModes`: 모드 목록이 비어 있음
    /// - `AttachmentError::ReplaceFailed`: 기존 어태치 해제 실패
    /// - `AttachmentError::AllModesFailed`: 모든 모드 실패 (시도 내역 포함)
    pub fn attach(&mut self, ifindex: u32, modes: &[AttachMode]) -> Result<AttachMode, AttachmentError> {
        if modes.is_empty() {
            return Err(AttachmentError::NoModes { ifindex });
        }

        if let Some(previous) = self.active.remove(&ifindex) {
            debug!(ifindex, mode = %previous.mode, "replacing existing attachment");
            let mode = previous.mode;
            if let Err(reason) = self.backend.detach(ifindex, previous.link) {
                warn!(ifindex, %mode, reason = %reason, "failed to detach previous attachment");
                return Err(AttachmentError::ReplaceFailed { ifindex, reason });
            }
        }

        let mut failures = Vec::new();
        let backend = &mut self.backend;
        let attached = modes.iter().find_map(|&mode| match backend.attach(ifindex, mode) {
            Ok(link) => Some(Attachment { ifindex, mode, link }),
            Err(reason) => {
                debug!(ifindex, %mode, reason = %reason, "attach mode failed, trying next");
                failures.push(format!("{mode}: {reason}"));
                None
            }
        });

        match attached {
            Some(attachment) => {
                let mode = attachment.mode;
                info!(ifindex, %mode, skipped = failures.len(), "classifier attached");
                self.active.insert(ifindex, attachment);
                Ok(mode)
            }
            None => Err(AttachmentError::AllModesFailed {
                ifindex,
                attempts: failures.join("; "),
            }),
        }
    }

    /// 인터페이스에서 분류기를 해제합니다.
    ///
    /// 어태치돼 있지 않으면 `Ok(false)`입니다.
    pub fn detach(&mut self, ifindex: u32) -> Result<bool, AttachmentError> {
        let Some(attachment) = self.active.remove(&ifindex) else {
            return Ok(false);
        };
        self.backend
            .detach(ifindex, attachment.link)
            .map_err(|reason| AttachmentError::DetachFailed { ifindex, reason })?;
        info!(ifindex, mode = %attachment.mode, "classifier detached");
        Ok(true)
    }

    /// 모든 인터페이스에서 해제합니다. 실패는 모아서 반환합니다.
    pub fn detach_all(&mut self) -> Vec<AttachmentError> {
        let ifindexes: Vec<u32> = self.active.keys().copied().collect();
        ifindexes
            .into_iter()
            .filter_map(|ifindex| self.detach(ifindex).err())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 지정된 모드만 성공하는 백엔드
    #[derive(Default)]
    struct ScriptedBackend {
        working: Vec<AttachMode>,
        attempts: Vec<AttachMode>,
        detached: Vec<u32>,
        fail_detach: bool,
        next_link: u64,
    }

    impl AttachBackend for ScriptedBackend {
        type Link = u64;

        fn attach(&mut self, _ifindex: u32, mode: AttachMode) -> Result<u64, String> {
            self.attempts.push(mode);
            if self.working.contains(&mode) {
                self.next_link += 1;
                Ok(self.next_link)
            } else {
                Err("operation not supported".to_owned())
            }
        }

        fn detach(&mut self, ifindex: u32, _link: u64) -> Result<(), String> {
            if self.fail_detach {
                return Err("device busy".to_owned());
            }
            self.detached.push(ifindex);
            Ok(())
        }
    }

    const FALLBACK: [AttachMode; 3] = [AttachMode::Offload, AttachMode::Native, AttachMode::Generic];

    #[test]
    fn test_fallback_to_generic_stops_after_success() {
        let backend = ScriptedBackend {
            working: vec![AttachMode::Generic],
            ..Default::default()
        };
        let mut manager = AttachManager::new(backend);

        let mode = manager.attach(3, &FALLBACK).unwrap();

        assert_eq!(mode, AttachMode::Generic);
        assert_eq!(manager.backend().attempts, FALLBACK.to_vec());
        assert_eq!(manager.active_mode(3), Some(AttachMode::Generic));
    }

    #[test]
    fn test_first_working_mode_wins() {
        let backend = ScriptedBackend {
            working: vec![AttachMode::Native, AttachMode::Generic],
            ..Default::default()
        };
        let mut manager = AttachManager::new(backend);
        assert_eq!(manager.attach(3, &FALLBACK).unwrap(), AttachMode::Native);
        assert_eq!(
            manager.backend().attempts,
            vec![AttachMode::Offload, AttachMode::Native]
        );
    }

    #[test]
    fn test_all_modes_failed_lists_attempts() {
        let mut manager = AttachManager::new(ScriptedBackend::default());
        let err = manager.attach(3, &FALLBACK).unwrap_err();
        match err {
            AttachmentError::AllModesFailed { ifindex, attempts } => {
                assert_eq!(ifindex, 3);
                assert!(attempts.contains("offload"));
                assert!(attempts.contains("native"));
                assert!(attempts.contains("generic"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!manager.is_attached(3));
    }

    #[test]
    fn test_empty_mode_list() {
        let mut manager = AttachManager::new(ScriptedBackend::default());
        assert!(matches!(
            manager.attach(1, &[]),
            Err(AttachmentError::NoModes { ifindex: 1 })
        ));
    }

    #[test]
    fn test_reattach_detaches_previous_first() {
        let backend = ScriptedBackend {
            working: vec![AttachMode::Generic],
            ..Default::default()
        };
        let mut manager = AttachManager::new(backend);
        manager.attach(3, &[AttachMode::Generic]).unwrap();
        manager.attach(3, &[AttachMode::Generic]).unwrap();
        assert_eq!(manager.backend().detached, vec![3]);
        assert!(manager.is_attached(3));
    }

    #[test]
    fn test_reattach_fails_explicitly_when_detach_fails() {
        let backend = ScriptedBackend {
            working: vec![AttachMode::Generic],
            ..Default::default()
        };
        let mut manager = AttachManager::new(backend);
        manager.attach(3, &[AttachMode::Generic]).unwrap();
        manager.backend.fail_detach = true;
        assert!(matches!(
            manager.attach(3, &[AttachMode::Generic]),
            Err(AttachmentError::ReplaceFailed { .. })
        ));
    }

    #[test]
    fn test_detach_is_idempotent() {
        let backend = ScriptedBackend {
            working: vec![AttachMode::Native],
            ..Default::default()
        };
        let mut manager = AttachManager::new(backend);
        manager.attach(5, &[AttachMode::Native]).unwrap();
        assert!(manager.detach(5).unwrap());
        assert!(!manager.detach(5).unwrap());
        assert!(!manager.detach(99).unwrap());
        assert_eq!(manager.backend().detached, vec![5]);
    }

    #[test]
    fn test_detach_all() {
        let backend = ScriptedBackend {
            working: vec![AttachMode::Native],
            ..Default::default()
        };
        let mut manager = AttachManager::new(backend);
        manager.attach(1, &[AttachMode::Native]).unwrap();
        manager.attach(2, &[AttachMode::Native]).unwrap();
        assert!(manager.detach_all().is_empty());
        assert!(!manager.is_attached(1));
        assert!(!manager.is_attached(2));
    }
}
