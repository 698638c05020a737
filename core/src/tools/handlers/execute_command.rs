use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use nexus_config::SecurityConfig;

use crate::tools::context::{ToolCall, ToolCallError, ToolContext, ToolOutput};
use crate::tools::handlers::list_files::resolve_directory;
use crate::tools::registry::ToolHandler;
use crate::tools::validation::{CommandPolicy, command_text};

/// Proxy that refuses every connection; set on commands that did not ask for
/// network access.
const BLACKHOLE_PROXY: &str = "http://127.0.0.1:9";
const PROXY_VARS: &[&str] = &[
  "HTTP_PROXY",
  "HTTPS_PROXY",
  "ALL_PROXY",
  "http_proxy",
  "https_proxy",
  "all_proxy",
];
const READ_CHUNK: usize = 8 * 1024;
/// How long pipe readers may keep draining once the command has ended.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
  pub command: String,
  pub exit_code: i32,
  pub stdout: String,
  pub stderr: String,
  pub truncated: bool,
  pub duration_ms: u64,
}

impl CommandOutput {
  pub fn to_value(&self) -> Value {
    json!({
      "command": self.command,
      "exitCode": self.exit_code,
      "stdout": self.stdout,
      "stderr": self.stderr,
      "truncated": self.truncated,
      "durationMs": self.duration_ms,
    })
  }
}

/// Starts allowlisted programs directly (no shell) inside a workspace.
#[derive(Debug, Clone)]
pub struct CommandRunner {
  policy: CommandPolicy,
  default_timeout_ms: u64,
  min_timeout_ms: u64,
  max_timeout_ms: u64,
  max_output_bytes: usize,
}

impl CommandRunner {
  pub fn new(security: &SecurityConfig) -> Self {
    Self {
      policy: CommandPolicy::from_config(security),
      default_timeout_ms: security.default_timeout_ms,
      min_timeout_ms: security.min_timeout_ms,
      max_timeout_ms: security.max_timeout_ms,
      max_output_bytes: security.max_output_bytes,
    }
  }

  pub fn effective_timeout(&self, requested_ms: Option<u64>) -> Duration {
    let ms = requested_ms
      .unwrap_or(self.default_timeout_ms)
      .clamp(self.min_timeout_ms, self.max_timeout_ms.max(self.min_timeout_ms));
    Duration::from_millis(ms)
  }

  /// Runs `command` with `workdir` relative to `root`. A non-zero exit is an
  /// execution failure carrying the captured output as diagnostics.
  pub async fn run(
    &self,
    root: &Path,
    command: &str,
    workdir: Option<&str>,
    timeout_ms: Option<u64>,
    allow_network: bool,
  ) -> Result<CommandOutput, ToolCallError> {
    let argv = self.policy.check(command, allow_network)?;
    let cwd = resolve_directory(root, workdir)?;
    if !cwd.is_dir() {
      return Err(ToolCallError::execution(format!(
        "working directory does not exist: {}",
        workdir.unwrap_or(".")
      )));
    }
    let timeout = self.effective_timeout(timeout_ms);

    let mut cmd = Command::new(&argv[0]);
    cmd
      .args(&argv[1..])
      .current_dir(&cwd)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    // Own process group, so forked children can be killed with the command.
    #[cfg(unix)]
    cmd.process_group(0);
    if !allow_network {
      for var in PROXY_VARS {
        cmd.env(var, BLACKHOLE_PROXY);
      }
      cmd.env("NO_PROXY", "").env("no_proxy", "");
    }

    debug!(program = %argv[0], cwd = %cwd.display(), timeout_ms = timeout.as_millis() as u64, "spawning command");
    let started = Instant::now();
    let mut child = cmd
      .spawn()
      .map_err(|e| ToolCallError::execution(format!("failed to start `{}`: {e}", argv[0])))?;
    let pid = child.id();

    let cap = self.max_output_bytes;
    let stdout_task = child
      .stdout
      .take()
      .map(|pipe| tokio::spawn(read_capped(pipe, cap)));
    let stderr_task = child
      .stderr
      .take()
      .map(|pipe| tokio::spawn(read_capped(pipe, cap)));

    let status = match tokio::time::timeout(timeout, child.wait()).await {
      Ok(status) => {
        Some(status.map_err(|e| ToolCallError::execution(format!("failed to wait for command: {e}")))?)
      }
      Err(_) => {
        kill_process_group(pid);
        if let Err(err) = child.kill().await {
          warn!(error = %err, "failed to kill timed out command");
        }
        None
      }
    };
    // Background processes left by the command would keep the pipes open.
    kill_process_group(pid);

    let ((stdout, stdout_truncated), (stderr, stderr_truncated)) =
      tokio::join!(collect(stdout_task), collect(stderr_task));
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let Some(status) = status else {
      return Err(ToolCallError::Timeout {
        message: format!(
          "Command timed out after {} ms and was terminated",
          timeout.as_millis()
        ),
        diagnostics: Some(json!({ "stdout": stdout, "stderr": stderr })),
      });
    };

    let output = CommandOutput {
      command: command.to_string(),
      exit_code: status.code().unwrap_or(-1),
      stdout,
      stderr,
      truncated: stdout_truncated || stderr_truncated,
      duration_ms,
    };
    if !status.success() {
      return Err(ToolCallError::Execution {
        message: format!("Command exited with status {}", output.exit_code),
        diagnostics: Some(json!({
          "exitCode": output.exit_code,
          "stdout": output.stdout,
          "stderr": output.stderr,
        })),
      });
    }
    Ok(output)
  }
}

/// Reads a pipe to EOF, keeping at most `cap` bytes.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> (Vec<u8>, bool) {
  let mut kept = Vec::new();
  let mut truncated = false;
  let mut chunk = vec![0u8; READ_CHUNK];
  loop {
    match reader.read(&mut chunk).await {
      Ok(0) | Err(_) => break,
      Ok(n) => {
        let room = cap.saturating_sub(kept.len());
        if n > room {
          truncated = true;
        }
        kept.extend_from_slice(&chunk[..n.min(room)]);
      }
    }
  }
  (kept, truncated)
}

/// Joins a pipe reader, giving up after [`DRAIN_GRACE`].
async fn collect(task: Option<tokio::task::JoinHandle<(Vec<u8>, bool)>>) -> (String, bool) {
  let Some(mut task) = task else {
    return (String::new(), false);
  };
  match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
    Ok(Ok((bytes, truncated))) => (String::from_utf8_lossy(&bytes).into_owned(), truncated),
    Ok(Err(_)) => (String::new(), false),
    Err(_) => {
      warn!("output pipe still open after the command ended; dropping its reader");
      task.abort();
      (String::new(), true)
    }
  }
}

/// SIGKILLs every process in the group led by `pid`. A group that is
/// already gone is not an error.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
  let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
    return;
  };
  // SAFETY: kill(2) takes plain integers; a negative pid addresses the group.
  let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
  if rc != 0 {
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::ESRCH) {
      warn!(pgid, error = %err, "failed to kill process group");
    }
  }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

pub struct ExecuteCommandHandler {
  runner: CommandRunner,
}

impl ExecuteCommandHandler {
  pub fn new(runner: CommandRunner) -> Self {
    Self { runner }
  }
}

#[async_trait]
impl ToolHandler for ExecuteCommandHandler {
  async fn handle(&self, call: ToolCall, ctx: &ToolContext) -> Result<ToolOutput, ToolCallError> {
    let command = command_text(&call)
      .ok_or_else(|| ToolCallError::Validation("missing required argument `command`".to_string()))?;
    let root = ctx.workspace_root()?;

    let output = self
      .runner
      .run(
        &root,
        command,
        call.str_arg("workdir"),
        call.u64_arg("timeout")?,
        call.flag("network"),
      )
      .await?;

    let summary = format!(
      "Command completed (exit {}) in {} ms",
      output.exit_code, output.duration_ms
    );
    Ok(ToolOutput::new(output.to_value()).with_summary(summary))
  }
}
