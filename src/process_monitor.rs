use sysinfo::{Pid, ProcessRefreshKind, System, UpdateKind};

/// 포트를 점유한 프로세스 스냅샷
#[derive(Debug, Clone)]
pub struct ProcessSummary {
    pub pid: u32,
    pub name: String,
    /// 프로세스 커맨드라인 인수 (예: ["python", "-m", "uvicorn", "api.main:app"])
    pub cmd: Vec<String>,
}

impl ProcessSummary {
    /// 조회에 실패한 PID용 자리표시자
    pub fn unknown(pid: u32) -> Self {
        Self {
            pid,
            name: "<unknown>".to_string(),
            cmd: Vec::new(),
        }
    }
}

impl std::fmt::Display for ProcessSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cmd.is_empty() {
            write!(f, "{} (pid {})", self.name, self.pid)
        } else {
            write!(f, "{} (pid {}): {}", self.name, self.pid, self.cmd.join(" "))
        }
    }
}

/// PID 하나의 이름과 커맨드라인 조회
pub fn describe(pid: u32) -> Option<ProcessSummary> {
    let mut sys = System::new();
    let pid = Pid::from_u32(pid);
    sys.refresh_process_specifics(
        pid,
        ProcessRefreshKind::new().with_cmd(UpdateKind::OnlyIfNotSet),
    );
    sys.process(pid).map(|process| ProcessSummary {
        pid: pid.as_u32(),
        name: process.name().to_string(),
        cmd: process.cmd().to_vec(),
    })
}

/// 특정 PID가 살아 있는지 확인 (좀비는 종료된 것으로 취급)
pub fn is_running(pid: u32) -> bool {
    let mut sys = System::new();
    let pid = Pid::from_u32(pid);
    sys.refresh_process_specifics(pid, ProcessRefreshKind::new());
    match sys.process(pid) {
        Some(p) => p.status() != sysinfo::ProcessStatus::Zombie,
        None => false,
    }
}

// ── Async wrappers ─────────────────────────────────────────
// sysinfo 조회는 동기 시스템 콜이므로 tokio 워커 스레드를 막지 않도록
// spawn_blocking 스레드풀에서 실행합니다.

/// `describe`의 비동기 래퍼.
pub async fn describe_async(pid: u32) -> Option<ProcessSummary> {
    tokio::task::spawn_blocking(move || describe(pid))
        .await
        .unwrap_or(None)
}

/// `is_running`의 비동기 래퍼.
pub async fn is_running_async(pid: u32) -> bool {
    tokio::task::spawn_blocking(move || is_running(pid))
        .await
        .unwrap_or(false)
}
