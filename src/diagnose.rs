//! Blocking-process diagnoser (component C7): identifies which running
//! processes hold open files on a volume, via the kernel's process
//! inspection APIs (`libproc`-shaped `libc` bindings). Purely diagnostic —
//! never invoked automatically by the eject pipeline (spec §4.7).

use std::collections::HashSet;
use std::ffi::CStr;
use std::path::Path;

use libc::{c_void, pid_t};
use tracing::{debug, trace};

use crate::error::DiskError;

const PROC_ALL_PIDS: u32 = 1;
const PROC_PIDLISTFDS: libc::c_int = 1;
const PROC_PIDFDVNODEPATHINFO: libc::c_int = 2;
const PROX_FDTYPE_VNODE: u32 = 1;

/// `pid_t` plus which file descriptor on that process resolved to a path
/// under the volume. Mirrors the kernel's `proc_fdinfo` entry shape.
#[repr(C)]
#[derive(Clone, Copy)]
struct ProcFdInfo {
    fd: i32,
    fdtype: u32,
}

/// Identifying information for a process holding a volume open (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: i32,
    pub command: String,
    pub user: String,
}

fn list_all_pids() -> Vec<pid_t> {
    let size = unsafe { libc::proc_listpids(PROC_ALL_PIDS, 0, std::ptr::null_mut(), 0) };
    if size <= 0 {
        return Vec::new();
    }
    let capacity = (size as usize) / std::mem::size_of::<pid_t>();
    let mut buf: Vec<pid_t> = vec![0; capacity];
    let filled = unsafe {
        libc::proc_listpids(
            PROC_ALL_PIDS,
            0,
            buf.as_mut_ptr() as *mut c_void,
            (buf.len() * std::mem::size_of::<pid_t>()) as i32,
        )
    };
    if filled <= 0 {
        return Vec::new();
    }
    let count = (filled as usize) / std::mem::size_of::<pid_t>();
    buf.truncate(count);
    buf.into_iter().filter(|&pid| pid != 0).collect()
}

fn list_fds(pid: pid_t) -> Vec<ProcFdInfo> {
    let size = unsafe { libc::proc_pidinfo(pid, PROC_PIDLISTFDS, 0, std::ptr::null_mut(), 0) };
    if size <= 0 {
        return Vec::new();
    }
    let capacity = (size as usize) / std::mem::size_of::<ProcFdInfo>();
    let mut buf: Vec<ProcFdInfo> = vec![ProcFdInfo { fd: 0, fdtype: 0 }; capacity];
    let filled = unsafe {
        libc::proc_pidinfo(
            pid,
            PROC_PIDLISTFDS,
            0,
            buf.as_mut_ptr() as *mut c_void,
            (buf.len() * std::mem::size_of::<ProcFdInfo>()) as i32,
        )
    };
    if filled <= 0 {
        return Vec::new();
    }
    let count = (filled as usize) / std::mem::size_of::<ProcFdInfo>();
    buf.truncate(count);
    buf
}

fn vnode_path_for_fd(pid: pid_t, fd: i32) -> Option<String> {
    const MAXPATHLEN: usize = 1024;
    let mut buf = vec![0u8; MAXPATHLEN];
    let written = unsafe {
        libc::proc_pidfdinfo(
            pid,
            fd,
            PROC_PIDFDVNODEPATHINFO,
            buf.as_mut_ptr() as *mut c_void,
            buf.len() as i32,
        )
    };
    if written <= 0 {
        return None;
    }
    let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Some(String::from_utf8_lossy(&buf[..nul]).into_owned())
}

fn executable_command(pid: pid_t) -> String {
    let mut buf = vec![0u8; libc::PROC_PIDPATHINFO_MAXSIZE as usize];
    let written = unsafe { libc::proc_pidpath(pid, buf.as_mut_ptr() as *mut c_void, buf.len() as u32) };
    if written <= 0 {
        return "<unknown>".to_string();
    }
    let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let full_path = String::from_utf8_lossy(&buf[..nul]).into_owned();
    Path::new(&full_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or(full_path)
}

fn uid_for_pid(pid: pid_t) -> Option<u32> {
    #[repr(C)]
    struct ProcBsdShortInfo {
        pbsi_pid: u32,
        pbsi_ppid: u32,
        pbsi_pgid: u32,
        pbsi_status: u32,
        pbsi_comm: [u8; 16],
        pbsi_flags: u32,
        pbsi_uid: u32,
        pbsi_gid: u32,
        pbsi_ruid: u32,
        pbsi_rgid: u32,
        pbsi_svuid: u32,
        pbsi_svgid: u32,
        pbsi_rfu_1: u32,
    }
    const PROC_PIDT_SHORTBSDINFO: libc::c_int = 13;

    let mut info: ProcBsdShortInfo = unsafe { std::mem::zeroed() };
    let size = std::mem::size_of::<ProcBsdShortInfo>() as i32;
    let written = unsafe {
        libc::proc_pidinfo(
            pid,
            PROC_PIDT_SHORTBSDINFO,
            0,
            &mut info as *mut _ as *mut c_void,
            size,
        )
    };
    if written != size {
        return None;
    }
    Some(info.pbsi_uid)
}

fn username_for_uid(uid: u32) -> String {
    let mut buf = vec![0i8; 4096];
    let mut passwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    let rc = unsafe {
        libc::getpwuid_r(
            uid,
            &mut passwd,
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };

    if rc == 0 && !result.is_null() {
        let name = unsafe { CStr::from_ptr(passwd.pw_name) };
        return name.to_string_lossy().into_owned();
    }
    uid.to_string()
}

/// True if `candidate` is equal to or nested under `mount_path`. Factored
/// out as a pure function so the prefix rule is unit-testable without a
/// real kernel/process table.
pub(crate) fn path_is_under(candidate: &str, mount_path: &Path) -> bool {
    let mount_str = mount_path.to_string_lossy();
    candidate == mount_str || candidate.starts_with(&format!("{mount_str}/"))
}

/// Deduplicate a list of blocking PIDs while preserving first-seen order.
pub(crate) fn dedup_pids(pids: Vec<pid_t>) -> Vec<pid_t> {
    let mut seen = HashSet::new();
    pids.into_iter().filter(|pid| seen.insert(*pid)).collect()
}

/// Enumerate processes holding any open file under `volume_path` (spec
/// §4.7). `volume_path` should already be absolute and canonicalized.
pub fn blocking_processes(volume_path: &Path) -> Result<Vec<ProcessInfo>, DiskError> {
    let mut blocking_pids = Vec::new();

    for pid in list_all_pids() {
        let fds = list_fds(pid);
        let mut is_blocking = false;
        for fd in fds {
            if fd.fdtype != PROX_FDTYPE_VNODE {
                continue;
            }
            let Some(path) = vnode_path_for_fd(pid, fd.fd) else {
                continue;
            };
            if path_is_under(&path, volume_path) {
                trace!(pid, fd = fd.fd, %path, "process holds path under volume");
                is_blocking = true;
                break;
            }
        }
        if is_blocking {
            blocking_pids.push(pid);
        }
    }

    let blocking_pids = dedup_pids(blocking_pids);
    debug!(count = blocking_pids.len(), volume = %volume_path.display(), "blocking process scan complete");

    let processes = blocking_pids
        .into_iter()
        .map(|pid| {
            let command = executable_command(pid);
            let user = uid_for_pid(pid)
                .map(username_for_uid)
                .unwrap_or_else(|| "<unknown>".to_string());
            ProcessInfo { pid, command, user }
        })
        .collect();

    Ok(processes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn exact_mount_path_match_is_under() {
        let mount = PathBuf::from("/Volumes/USB");
        assert!(path_is_under("/Volumes/USB", &mount));
    }

    #[test]
    fn nested_file_path_is_under() {
        let mount = PathBuf::from("/Volumes/USB");
        assert!(path_is_under("/Volumes/USB/folder/file.txt", &mount));
    }

    #[test]
    fn sibling_path_with_shared_prefix_is_not_under() {
        let mount = PathBuf::from("/Volumes/USB");
        assert!(!path_is_under("/Volumes/USB2/file.txt", &mount));
    }

    #[test]
    fn unrelated_path_is_not_under() {
        let mount = PathBuf::from("/Volumes/USB");
        assert!(!path_is_under("/System/Library/file", &mount));
    }

    #[test]
    fn dedup_preserves_first_seen_order() {
        let pids = vec![10, 20, 10, 30, 20];
        assert_eq!(dedup_pids(pids), vec![10, 20, 30]);
    }
}
