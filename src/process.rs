//! Forced termination of foreign processes.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("process {pid} not found")]
    NotFound { pid: u32 },
    #[error("permission denied killing process {pid}")]
    PermissionDenied { pid: u32 },
    #[error("failed to terminate process {pid}: {reason}")]
    TerminationFailed { pid: u32, reason: String },
}

/// Force-kill a process by PID. SIGKILL on Unix, `TerminateProcess` on
/// Windows. There is no grace period.
#[cfg(not(target_os = "windows"))]
pub fn force_kill_pid(pid: u32) -> Result<(), ProcessError> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| ProcessError::NotFound { pid })?;
    // 0 and negative values address process groups
    if raw <= 0 {
        return Err(ProcessError::NotFound { pid });
    }

    match signal::kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(ProcessError::NotFound { pid }),
        Err(Errno::EPERM) => Err(ProcessError::PermissionDenied { pid }),
        Err(e) => Err(ProcessError::TerminationFailed {
            pid,
            reason: e.to_string(),
        }),
    }
}

#[cfg(target_os = "windows")]
pub fn force_kill_pid(pid: u32) -> Result<(), ProcessError> {
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
    use winapi::um::winnt::PROCESS_TERMINATE;

    if pid == 0 {
        return Err(ProcessError::NotFound { pid });
    }

    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if handle.is_null() {
            return Err(ProcessError::TerminationFailed {
                pid,
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        let result = TerminateProcess(handle, 1);
        CloseHandle(handle);
        if result == 0 {
            return Err(ProcessError::TerminationFailed {
                pid,
                reason: "TerminateProcess failed".to_string(),
            });
        }
    }
    Ok(())
}
