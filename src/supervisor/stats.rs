use std::path::PathBuf;

use serde::Serialize;
use sysinfo::{Pid, System};

/// Resource usage snapshot for one instance.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ProcessStats {
    pub running: bool,
    pub pid: Option<u32>,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    pub uptime_secs: u64,
}

/// CPU and resident memory of `pid`, or `None` if the OS no longer knows it.
///
/// sysinfo needs two refreshes to compute a CPU delta, so this blocks for
/// at least `MINIMUM_CPU_UPDATE_INTERVAL`.
pub fn sample_process(pid: u32) -> Option<(f32, u64)> {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    if !sys.refresh_process(pid) {
        return None;
    }
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_process(pid);
    sys.process(pid).map(|p| (p.cpu_usage(), p.memory()))
}

// sysinfo 및 디렉터리 순회는 동기 호출이므로 블로킹 스레드풀에서 실행합니다.

/// `sample_process`의 비동기 래퍼.
pub async fn sample_process_async(pid: u32) -> Option<(f32, u64)> {
    tokio::task::spawn_blocking(move || sample_process(pid))
        .await
        .unwrap_or(None)
}

/// `utils::dir_size`의 비동기 래퍼.
pub async fn dir_size_async(dir: PathBuf) -> u64 {
    tokio::task::spawn_blocking(move || crate::utils::dir_size(&dir))
        .await
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sample_own_process() {
        let (_cpu, memory) = sample_process_async(std::process::id()).await.expect("own pid is visible");
        assert!(memory > 0);
    }

    #[tokio::test]
    async fn test_sample_unknown_pid() {
        assert!(sample_process_async(u32::MAX - 1).await.is_none());
    }
}
