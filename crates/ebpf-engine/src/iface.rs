//! 네트워크 인터페이스 조회 및 프로세스 자원 한도

use std::collections::HashMap;
use std::io;

/// 인터페이스 이름 → 인덱스 변환
///
/// 룰 컴파일(`redirect_interface`)과 어태치 대상 인터페이스 조회에 사용됩니다.
pub trait InterfaceResolver: Send + Sync {
    /// 인터페이스 인덱스를 반환합니다. 없으면 `None`.
    fn resolve(&self, name: &str) -> Option<u32>;
}

/// 고정된 이름/인덱스 테이블
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces {
    entries: HashMap<String, u32>,
}

impl StaticInterfaces {
    pub fn with(mut self, name: impl Into<String>, ifindex: u32) -> Self {
        self.entries.insert(name.into(), ifindex);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, ifindex: u32) {
        self.entries.insert(name.into(), ifindex);
    }
}

impl InterfaceResolver for StaticInterfaces {
    fn resolve(&self, name: &str) -> Option<u32> {
        self.entries.get(name).copied()
    }
}

/// 호스트 커널의 인터페이스 테이블 (`if_nametoindex`)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceResolver for SystemInterfaces {
    #[cfg(target_os = "linux")]
    fn resolve(&self, name: &str) -> Option<u32> {
        let name = std::ffi::CString::new(name).ok()?;
        // SAFETY: name은 NUL로 끝나는 유효한 C 문자열입니다.
        let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
        (ifindex != 0).then_some(ifindex)
    }

    #[cfg(not(target_os = "linux"))]
    fn resolve(&self, _name: &str) -> Option<u32> {
        None
    }
}

/// `RLIMIT_MEMLOCK`을 무제한으로 올립니다.
///
/// 5.11 이전 커널은 BPF 맵 메모리를 memlock 한도로 계산합니다.
#[cfg(target_os = "linux")]
pub fn raise_memlock_rlimit() -> io::Result<()> {
    let lim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    // SAFETY: lim은 유효한 rlimit 구조체를 가리킵니다.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &lim) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn raise_memlock_rlimit() -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_interfaces_resolve() {
        let ifaces = StaticInterfaces::default().with("eth0", 2).with("eth1", 3);
        assert_eq!(ifaces.resolve("eth1"), Some(3));
        assert_eq!(ifaces.resolve("eth9"), None);
    }

    #[test]
    fn system_interfaces_unknown_name() {
        assert_eq!(SystemInterfaces.resolve("xdpfwd-no-such-if0"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn system_interfaces_loopback() {
        assert!(SystemInterfaces.resolve("lo").is_some());
    }
}
