//! Process liveness probe.
//!
//! Staleness classification needs to know whether the pid recorded in a lock
//! is still running, which can only be answered for locks created on the
//! current host.

/// Whether a process with the given pid is alive on this host.
///
/// Only a positive "no such process" answer reports dead; permission errors
/// and anything else unexpected count as alive, so a lock is never declared
/// abandoned on shaky evidence.
#[cfg(unix)]
pub(crate) fn process_alive(pid: u32) -> bool {
    // Signal 0 performs the permission and existence checks without
    // delivering anything.
    #[allow(clippy::cast_possible_wrap)]
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    let errno = std::io::Error::last_os_error().raw_os_error();
    !matches!(errno, Some(code) if code == libc::ESRCH)
}

#[cfg(windows)]
pub(crate) fn process_alive(pid: u32) -> bool {
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::minwinbase::STILL_ACTIVE;
    use winapi::um::processthreadsapi::{GetExitCodeProcess, OpenProcess};
    use winapi::um::winnt::PROCESS_QUERY_LIMITED_INFORMATION;

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            return false;
        }
        let mut exit_code: u32 = 0;
        let queried = GetExitCodeProcess(handle, &mut exit_code);
        CloseHandle(handle);
        if queried == 0 {
            return false;
        }
        exit_code == STILL_ACTIVE
    }
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn process_alive(_pid: u32) -> bool {
    // No way to tell; err on the side of a live holder.
    true
}
