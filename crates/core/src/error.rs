//! 에러 타입 — 컨트롤 플레인 에러 분류
//!
//! 시작 단계의 실패(`Attachment`, `MapLookup`)는 치명적이고,
//! 정상 운영 중의 실패(`Config`, `Capacity`, `Pin`, `Table`)는 이전 상태를 유지한 채
//! 경고로 보고됩니다. 패킷 경로의 실패는 에러로 전파되지 않습니다.

/// xdpfwd 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum XdpFwdError {
    /// 설정 / 룰 소스 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 어태치 에러
    #[error("attachment error: {0}")]
    Attachment(#[from] AttachmentError),

    /// 룰 테이블 용량 초과
    #[error("capacity error: {0}")]
    Capacity(#[from] CapacityError),

    /// 로드된 이미지에 필요한 테이블이 없음
    #[error("map lookup error: {0}")]
    MapLookup(#[from] MapLookupError),

    /// 핀/언핀 실패
    #[error("pin error: {0}")]
    Pin(#[from] PinError),

    /// 공유 테이블 읽기/쓰기 실패
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// 감사 이벤트 채널 에러
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl XdpFwdError {
    /// 시작 단계에서 프로세스를 종료시켜야 하는 에러인지 반환합니다.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Attachment(_) | Self::MapLookup(_) | Self::Io(_)
        )
    }
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// 유효하지 않은 룰
    #[error("invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
}

/// 어태치 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    /// 시도할 모드가 하나도 없음
    #[error("no attach modes given for ifindex {ifindex}")]
    NoModes { ifindex: u32 },

    /// 모든 모드에서 어태치 실패
    #[error("every attach mode failed on ifindex {ifindex}: {attempts}")]
    AllModesFailed { ifindex: u32, attempts: String },

    /// 기존 어태치를 해제하지 못해 재어태치 불가
    #[error("failed to replace existing attachment on ifindex {ifindex}: {reason}")]
    ReplaceFailed { ifindex: u32, reason: String },

    /// 디태치 실패
    #[error("failed to detach from ifindex {ifindex}: {reason}")]
    DetachFailed { ifindex: u32, reason: String },

    /// 인터페이스를 찾을 수 없음
    #[error("network interface not found: {name}")]
    InterfaceNotFound { name: String },

    /// 분류기 이미지 로드 실패
    #[error("failed to load classifier image: {0}")]
    Load(String),
}

/// 룰 테이블 용량 에러
#[derive(Debug, thiserror::Error)]
pub enum CapacityError {
    /// 룰 수가 테이블 용량을 초과
    #[error("{requested} rules exceed table capacity {capacity}")]
    TooManyRules { requested: usize, capacity: u32 },
}

/// 맵 조회 에러
#[derive(Debug, thiserror::Error)]
pub enum MapLookupError {
    /// 이미지에 맵이 없음
    #[error("map '{name}' not found in classifier image")]
    Missing { name: String },

    /// 맵 타입이 예상과 다름
    #[error("map '{name}' has unexpected type: {reason}")]
    WrongType { name: String, reason: String },
}

/// 핀 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum PinError {
    /// 핀 디렉토리 생성 실패
    #[error("failed to prepare pin directory {path}: {reason}")]
    Directory { path: String, reason: String },

    /// 핀 실패
    #[error("failed to pin '{name}' at {path}: {reason}")]
    Pin {
        name: String,
        path: String,
        reason: String,
    },

    /// 언핀 실패
    #[error("failed to unpin '{name}' at {path}: {reason}")]
    Unpin {
        name: String,
        path: String,
        reason: String,
    },
}

/// 공유 테이블 접근 에러
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// 읽기 실패
    #[error("failed to read table '{table}': {reason}")]
    Read { table: String, reason: String },

    /// 쓰기 실패
    #[error("failed to write table '{table}': {reason}")]
    Write { table: String, reason: String },
}

/// 감사 이벤트 채널 에러
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// 채널이 가득 차 레코드를 버림
    #[error("audit channel full, record dropped")]
    Overflow,

    /// 채널 폴링 실패
    #[error("audit channel poll failed: {0}")]
    Poll(String),
}
