//! xdpfwd 공통 크레이트
//!
//! 컨트롤 플레인 전체가 공유하는 설정 모델, 에러 분류, 도메인 타입,
//! 메트릭 이름 상수를 정의합니다. 커널 프로그램과 공유하는 메모리 레이아웃은
//! `xdpfwd-common` 크레이트에 있습니다.

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{
    AttachmentError, CapacityError, ChannelError, ConfigError, MapLookupError, PinError,
    TableError, XdpFwdError,
};

// 설정
pub use config::XdpFwdConfig;

// 도메인 타입
pub use types::{AttachMode, DatapathKind};
