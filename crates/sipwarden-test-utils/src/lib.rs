//! Shared test utilities for sipwarden integration tests.
//!
//! The supervisor is exercised against fake workers: small `/bin/sh`
//! scripts written into a per-test temp directory and marked executable.
//! A "worker" here only needs to be a process the supervisor can launch,
//! observe, and kill; the scripts stand in for the real softphone binary.

use std::path::{Path, PathBuf};

/// Write an executable `/bin/sh` script with the given body into `dir`
/// and return its path.
pub fn fake_worker(dir: &Path, body: &str) -> PathBuf {
    fake_worker_named(dir, "fake-worker.sh", body)
}

/// Like [`fake_worker`] but with a caller-chosen file name, for tests that
/// need several distinct workers in one directory.
pub fn fake_worker_named(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let script = format!("#!/bin/sh\n{body}");
    std::fs::write(&path, script).expect("failed to write fake worker script");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to mark fake worker executable");
    }

    path
}

/// A fake worker that ignores its arguments and sleeps until killed,
/// standing in for a healthy long-lived softphone process.
pub fn sleeping_worker(dir: &Path) -> PathBuf {
    fake_worker(dir, "exec sleep 3600\n")
}

/// A fake worker that prints a line and exits immediately with `code`,
/// standing in for a worker that dies during startup.
pub fn dying_worker(dir: &Path, code: i32) -> PathBuf {
    fake_worker(dir, &format!("echo 'startup failure'\nexit {code}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_worker_is_executable_script() {
        let tmp = tempfile::tempdir().unwrap();
        let path = fake_worker(tmp.path(), "echo hi\n");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("#!/bin/sh\n"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_ne!(mode & 0o111, 0, "script should be executable");
        }
    }

    #[test]
    fn named_workers_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let a = fake_worker_named(tmp.path(), "a.sh", "exit 0\n");
        let b = fake_worker_named(tmp.path(), "b.sh", "exit 1\n");
        assert_ne!(a, b);
    }
}
