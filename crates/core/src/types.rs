//! 도메인 타입 — 어태치 모드, 데이터패스 종류

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// XDP 어태치 모드
///
/// 성능/기능 순으로 정렬되어 있습니다. 기본 선호 순서는
/// `native → generic`이며, `offload`는 지원 NIC에서만 성공합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachMode {
    /// NIC 하드웨어 오프로드 (XDP_FLAGS_HW_MODE)
    Offload,
    /// 드라이버 네이티브 (XDP_FLAGS_DRV_MODE)
    Native,
    /// 제네릭 / SKB 폴백 (XDP_FLAGS_SKB_MODE)
    Generic,
}

impl AttachMode {
    /// 설정 문자열 표현
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offload => "offload",
            Self::Native => "native",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for AttachMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttachMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "offload" | "hw" => Ok(Self::Offload),
            "native" | "drv" | "driver" => Ok(Self::Native),
            "generic" | "skb" => Ok(Self::Generic),
            other => Err(format!(
                "unknown attach mode '{other}', expected offload, native or generic"
            )),
        }
    }
}

/// 데이터패스 백엔드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatapathKind {
    /// 커널 XDP 프로그램 (aya)
    Kernel,
    /// 프로세스 내 에뮬레이션 (권한 없이 컨트롤 플레인 점검용)
    Emulated,
}

impl fmt::Display for DatapathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kernel => f.write_str("kernel"),
            Self::Emulated => f.write_str("emulated"),
        }
    }
}
