//! Lifecycle Probe (spec.md §4.J, §6 lockfile).
//!
//! `lc_daemon_running` reads a decimal PID out of the lockfile and probes
//! it with `kill(pid, 0)`. Any failure along the way — missing lockfile,
//! short read, a PID that doesn't parse, or a failed `kill` — is folded
//! into "not running"; the original has no distinct error path here and
//! neither does this.

use std::fs;
use std::path::Path;

/// Outcome of probing a lockfile-recorded PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    NotRunning,
}

/// `lc_daemon_running`: reads `lockfile_path`, parses a PID, and sends it
/// signal 0. Any failure collapses to `NotRunning`.
pub fn running(lockfile_path: &Path) -> Liveness {
    let contents = match fs::read_to_string(lockfile_path) {
        Ok(contents) => contents,
        Err(_) => return Liveness::NotRunning,
    };

    let pid: libc::pid_t = match contents.trim().parse() {
        Ok(pid) => pid,
        Err(_) => return Liveness::NotRunning,
    };

    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        Liveness::Running
    } else {
        Liveness::NotRunning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn running_process_is_detected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", unsafe { libc::getpid() }).unwrap();
        assert_eq!(running(file.path()), Liveness::Running);
    }

    #[test]
    fn missing_lockfile_is_not_running() {
        assert_eq!(running(Path::new("/nonexistent/lockfile")), Liveness::NotRunning);
    }

    #[test]
    fn unparseable_pid_is_not_running() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not-a-pid").unwrap();
        assert_eq!(running(file.path()), Liveness::NotRunning);
    }

    #[test]
    fn implausible_pid_is_not_running() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "999999999").unwrap();
        assert_eq!(running(file.path()), Liveness::NotRunning);
    }
}
