//! Process validation utilities for PID checking and verification.

/// Kill a process with SIGKILL.
///
/// # Returns
/// * `true` - Process was killed or doesn't exist
/// * `false` - Failed to kill (permission denied)
pub fn kill_process(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, libc::SIGKILL) == 0 || !is_process_alive(pid) }
}

/// Check if a process with the given PID exists.
///
/// Uses `libc::kill(pid, 0)` which sends a null signal to check existence.
pub fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Verify that a PID still belongs to the container process we launched.
///
/// Guards recovery against PID reuse: a recycled PID must not make a dead
/// container look alive.
///
/// * **Linux**: read `/proc/{pid}/cmdline` and compare against the declared
///   command's argv0
/// * **macOS**: compare the process name from `sysinfo` against the argv0
///   basename
pub fn is_same_command(pid: u32, argv0: &str) -> bool {
    #[cfg(target_os = "linux")]
    {
        is_same_command_linux(pid, argv0)
    }

    #[cfg(target_os = "macos")]
    {
        is_same_command_macos(pid, argv0)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = argv0;
        is_process_alive(pid)
    }
}

#[cfg(target_os = "linux")]
fn is_same_command_linux(pid: u32, argv0: &str) -> bool {
    use std::fs;

    let cmdline_path = format!("/proc/{}/cmdline", pid);

    match fs::read_to_string(&cmdline_path) {
        // cmdline is null-separated; argv0 is the first field
        Ok(cmdline) => cmdline
            .split('\0')
            .next()
            .is_some_and(|first| first == argv0 || basename(first) == basename(argv0)),
        Err(_) => false, // Process doesn't exist or no permission
    }
}

#[cfg(target_os = "macos")]
fn is_same_command_macos(pid: u32, argv0: &str) -> bool {
    use sysinfo::{Pid, System};

    let mut sys = System::new();
    let pid_obj = Pid::from_u32(pid);

    sys.refresh_process(pid_obj);

    match sys.process(pid_obj) {
        Some(process) => process.name() == basename(argv0),
        None => false,
    }
}

#[allow(dead_code)]
fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_process_alive_current() {
        // Current process should always be alive
        let current_pid = std::process::id();
        assert!(is_process_alive(current_pid));
    }

    #[test]
    fn test_is_process_alive_invalid() {
        // Very high PIDs are unlikely to exist. u32::MAX becomes -1 when
        // cast to i32, which has special meaning in kill(), so avoid it.
        assert!(!is_process_alive(999999999));
        assert!(!is_process_alive(888888888));
    }

    #[test]
    fn test_is_same_command_mismatch() {
        let current_pid = std::process::id();
        // The current process is not "uvicorn"
        assert!(!is_same_command(current_pid, "uvicorn"));
    }

    #[test]
    fn test_is_same_command_dead_pid() {
        assert!(!is_same_command(999999999, "uvicorn"));
    }
}
