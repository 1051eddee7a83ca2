//! Child process helpers shared by the supervisor and the installer.
//!
//! Children start in their own process group so a kill reaches any
//! grandchildren too, and their environment is rebuilt from an allow-list.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};

/// Grace period for reaping a killed child.
pub(crate) const REAP_GRACE: Duration = Duration::from_secs(2);

/// Host variables a child may inherit.
const ENV_ALLOWLIST: &[&str] = &[
    "PATH",
    "LANG",
    "SYSTEMROOT",
    "WINDIR",
    "COMSPEC",
    "PATHEXT",
];

/// Extra variables the package manager needs to reach the registry.
pub(crate) const PROXY_ENV: &[&str] = &[
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "http_proxy",
    "https_proxy",
    "no_proxy",
];

/// Build a command scoped to `dir` with a scrubbed environment.
///
/// `HOME`, `TMPDIR` and `NODE_PATH` all point into the sandbox so module
/// resolution and caches never leave it.
pub(crate) fn sandboxed_command(program: &str, dir: &Path, extra_env: &[&str]) -> Command {
    let mut cmd = Command::new(program);
    cmd.current_dir(dir).env_clear();
    for key in ENV_ALLOWLIST.iter().chain(extra_env) {
        if let Some(value) = std::env::var_os(key) {
            cmd.env(key, value);
        }
    }
    cmd.env("HOME", dir)
        .env("TMPDIR", dir)
        .env("NODE_PATH", dir.join("node_modules"))
        .stdin(Stdio::null())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// SIGKILL whatever is left of the process group led by `pid`.
///
/// Takes the pid captured at spawn: once the leader has been reaped
/// `Child::id` returns `None`, but its background children may still hold
/// the group. Best-effort; an empty group is not an error.
pub(crate) fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pid, error = %e, "killpg failed"),
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Forcefully kill the child and its process group. Best-effort.
pub(crate) fn kill_tree(child: &mut Child) {
    kill_group(child.id());
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "start_kill after group kill");
    }
}

/// Kill the child tree and wait for it once, bounded by [`REAP_GRACE`].
///
/// Returns `None` if the child could not be reaped in time; `kill_on_drop`
/// and the runtime's orphan reaper take over from there.
pub(crate) async fn kill_and_reap(child: &mut Child) -> Option<ExitStatus> {
    kill_tree(child);
    match tokio::time::timeout(REAP_GRACE, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to reap killed child");
            None
        }
        Err(_) => {
            tracing::warn!("Killed child did not exit within grace period");
            None
        }
    }
}

/// Signal that terminated the process, if any.
pub(crate) fn termination_signal(status: &ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_environment_is_scrubbed() {
        std::env::set_var("GG_SANDBOX_TEST_SECRET", "leak");
        let dir = tempfile::tempdir().unwrap();
        let output = sandboxed_command("sh", dir.path(), &[])
            .arg("-c")
            .arg("echo \"$GG_SANDBOX_TEST_SECRET|$HOME\"")
            .output()
            .await
            .unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(!stdout.contains("leak"));
        assert!(stdout.contains(dir.path().to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_kill_and_reap_stops_child() {
        let dir = tempfile::tempdir().unwrap();
        let mut child = sandboxed_command("sleep", dir.path(), &[])
            .arg("30")
            .spawn()
            .unwrap();
        let status = kill_and_reap(&mut child).await.unwrap();
        assert!(!status.success());
        assert!(termination_signal(&status).is_some());
    }
}
