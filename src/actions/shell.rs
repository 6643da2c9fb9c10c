//! Shell 执行：sh -c（Windows 为 cmd /C），工作目录固定为任务工作区
//!
//! 子进程放入独立进程组；超时后整组 SIGKILL。shell 按时退出但后台进程仍占用输出时，
//! 短暂收集输出后同样清理整组，结果按 shell 的退出码返回。非零退出码是正常观察结果。

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::actions::types::CommandOutput;
use crate::core::ActionError;

/// shell 退出后等待输出管道关闭的上限
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ShellRunner {
    default_timeout_secs: u64,
}

impl ShellRunner {
    pub fn new(default_timeout_secs: u64) -> Self {
        Self {
            default_timeout_secs: default_timeout_secs.max(1),
        }
    }

    pub fn default_timeout_secs(&self) -> u64 {
        self.default_timeout_secs
    }

    pub async fn run(
        &self,
        cmd: &str,
        cwd: &Path,
        timeout_secs: Option<u64>,
    ) -> Result<CommandOutput, ActionError> {
        let secs = timeout_secs.unwrap_or(self.default_timeout_secs).max(1);

        let mut std_cmd = if cfg!(target_os = "windows") {
            let mut c = std::process::Command::new("cmd");
            c.args(["/C", cmd]);
            c
        } else {
            let mut c = std::process::Command::new("sh");
            c.args(["-c", cmd]);
            c
        };
        std_cmd
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }

        let mut command = Command::from(std_cmd);
        command.kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| ActionError::Io(format!("failed to spawn shell: {}", e)))?;
        let pid = child.id();
        debug!(pid = ?pid, timeout_secs = secs, "shell command started");

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let status = match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(ActionError::Io(format!("failed to wait for command: {}", e))),
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                warn!(timeout_secs = secs, "shell command timed out");
                return Err(ActionError::Timeout { secs });
            }
        };

        // shell 已退出；后台进程可能仍持有输出管道
        let readers = async { (collect(stdout).await, collect(stderr).await) };
        tokio::pin!(readers);
        let (stdout, stderr) = match tokio::time::timeout(OUTPUT_DRAIN, &mut readers).await {
            Ok(out) => out,
            Err(_) => {
                debug!(pid = ?pid, "background processes hold the output pipes; killing group");
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                tokio::time::timeout(OUTPUT_DRAIN, &mut readers)
                    .await
                    .unwrap_or_default()
            }
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            exit_code: status.code(),
        })
    }
}

fn spawn_reader<R>(mut pipe: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!(error = %e, "output pipe closed with error");
        }
        buf
    })
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match reader {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let status = std::process::Command::new("kill")
        .args(["-s", "KILL", "--", &format!("-{}", pid)])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = status {
        debug!(pid, error = %e, "failed to kill process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::new(10);
        let out = runner
            .run("echo hello; echo oops >&2; exit 3", dir.path(), None)
            .await
            .unwrap();
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "oops\n");
        assert_eq!(out.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let out = ShellRunner::new(10).run("ls", dir.path(), None).await.unwrap();
        assert!(out.stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::new(300);
        let started = Instant::now();
        let err = runner
            .run("sleep 30; touch late.txt", dir.path(), Some(1))
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::Timeout { secs: 1 });
        assert!(started.elapsed() < Duration::from_secs(10));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!dir.path().join("late.txt").exists());
    }

    #[tokio::test]
    async fn test_background_process_does_not_count_as_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let out = ShellRunner::new(3)
            .run("sleep 30 & echo started", dir.path(), None)
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.stdout, "started\n");
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
