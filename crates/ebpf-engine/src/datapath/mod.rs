//! 데이터패스 백엔드
//!
//! 라이프사이클 컨트롤러는 [`Datapath`]를 통해 분류기 이미지를 열고 테이블
//! 핸들을 받습니다. 핸들은 각각 그 테이블을 쓰는 컴포넌트에 넘겨집니다.
//!
//! - [`kernel::KernelDatapath`]: aya로 XDP 오브젝트를 로드 (Linux 전용)
//! - [`emulated::EmulatedDatapath`]: 같은 분류 로직을 프로세스 안에서 실행

pub mod emulated;
#[cfg(target_os = "linux")]
pub mod kernel;

use xdpfwd_core::error::XdpFwdError;

use crate::attach::AttachBackend;
use crate::iface::InterfaceResolver;
use crate::tables::{CounterTable, EventChannel, Pinnable, RuleTable};

/// 분류기 이미지와 공유 테이블을 제공하는 백엔드
pub trait Datapath: Send {
    type Program: AttachBackend<Link: Send> + Send;
    type Rules: RuleTable + Pinnable;
    type Counters: CounterTable;
    type Events: EventChannel;
    type Resolver: InterfaceResolver + Clone + 'static;

    /// 로그용 백엔드 이름
    fn name(&self) -> &'static str;

    /// 이미지 로드 전 준비 (자원 한도 등)
    fn prepare(&mut self) -> Result<(), XdpFwdError>;

    /// 인터페이스 이름 조회기
    fn resolver(&self) -> Self::Resolver;

    /// 분류기 이미지를 로드하고 테이블 핸들을 꺼냅니다.
    ///
    /// 필수 테이블이 없으면 `MapLookupError`입니다. 감사 이벤트 채널은
    /// 선택 사항이며 없으면 `events`가 `None`입니다.
    fn open(self) -> Result<DatapathParts<Self>, XdpFwdError>
    where
        Self: Sized;
}

/// 열린 데이터패스의 핸들 묶음
pub struct DatapathParts<D: Datapath> {
    pub program: D::Program,
    pub rules: D::Rules,
    pub counters: D::Counters,
    pub events: Option<D::Events>,
}
