//! 테이블 핀 관리
//!
//! [`PinManager`]는 테이블을 `<pin_dir>/<map name>` 경로에 핀하고, 종료 시
//! 언핀합니다. 이전 프로세스가 비정상 종료해 남긴 핀이 있으면 먼저 언핀을
//! 시도(에러 무시)한 뒤 핀하므로 재시작이 스스로 복구됩니다.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use xdpfwd_core::error::PinError;

use crate::tables::Pinnable;

/// 핀 디렉토리와 현재 핀된 경로 목록
#[derive(Debug)]
pub struct PinManager {
    dir: PathBuf,
    pinned: Vec<(String, PathBuf)>,
}

impl PinManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pinned: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 테이블 이름의 핀 경로
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// 현재 이 매니저가 핀한 테이블 이름
    pub fn pinned(&self) -> impl Iterator<Item = &str> {
        self.pinned.iter().map(|(name, _)| name.as_str())
    }

    /// 테이블 하나를 핀합니다.
    pub fn pin(&mut self, target: &impl Pinnable, name: &str) -> Result<PathBuf, PinError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| PinError::Directory {
            path: self.dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let path = self.path_for(name);
        // 이전 실행이 남긴 핀 정리 (실패 무시)
        if let Err(e) = remove_pin(&path) {
            debug!(path = %path.display(), error = %e, "ignoring stale pin cleanup failure");
        }

        target.pin_table(name, &path)?;
        debug!(table = name, path = %path.display(), "table pinned");

        if !self.pinned.iter().any(|(n, _)| n == name) {
            self.pinned.push((name.to_owned(), path.clone()));
        }
        Ok(path)
    }

    /// 대상의 모든 핀 테이블을 핀합니다.
    pub fn pin_all(&mut self, target: &impl Pinnable) -> Result<(), PinError> {
        for name in target.pin_names() {
            self.pin(target, name)?;
        }
        info!(dir = %self.dir.display(), count = self.pinned.len(), "tables pinned");
        Ok(())
    }

    /// 테이블 하나를 언핀합니다.
    ///
    /// 핀이 없으면 `Ok(false)`입니다.
    pub fn unpin(&mut self, name: &str) -> Result<bool, PinError> {
        let path = self.path_for(name);
        self.pinned.retain(|(n, _)| n != name);
        match remove_pin(&path) {
            Ok(removed) => Ok(removed),
            Err(e) => Err(PinError::Unpin {
                name: name.to_owned(),
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// 이 매니저가 핀한 모든 테이블을 언핀합니다.
    ///
    /// 실패는 경고로 보고하고 나머지를 계속 진행합니다.
    pub fn unpin_all(&mut self) -> Vec<PinError> {
        let names: Vec<String> = self.pinned.iter().map(|(n, _)| n.clone()).collect();
        let mut errors = Vec::new();
        for name in names {
            if let Err(e) = self.unpin(&name) {
                warn!(error = %e, "failed to unpin table");
                errors.push(e);
            }
        }
        errors
    }
}

fn remove_pin(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
