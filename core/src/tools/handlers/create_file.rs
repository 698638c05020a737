use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use nexus_utils_path::{display_relative, ensure_contained, ensure_not_symlink, resolve_contained};

use crate::tools::context::{ToolCall, ToolCallError, ToolContext, ToolOutput};
use crate::tools::registry::ToolHandler;

pub struct CreateFileHandler {
  max_file_bytes: u64,
}

impl CreateFileHandler {
  pub fn new(max_file_bytes: u64) -> Self {
    Self { max_file_bytes }
  }
}

#[derive(Debug, Deserialize)]
struct CreateFileArgs {
  path: String,
  #[serde(default)]
  content: String,
}

/// A file written inside a workspace.
#[derive(Debug, Clone)]
pub(crate) struct WrittenFile {
  pub relative: String,
  pub full_path: PathBuf,
  pub size: u64,
}

/// Writes `content` under `root`, creating parent directories. The path is
/// sanitized and then checked on disk, so neither a traversal segment nor a
/// symbolic link planted in the workspace can redirect the write outside it.
pub(crate) async fn write_workspace_file(
  root: &Path,
  raw_path: &str,
  content: &str,
  max_file_bytes: u64,
) -> Result<WrittenFile, ToolCallError> {
  let size = content.len() as u64;
  if size > max_file_bytes {
    return Err(ToolCallError::Validation(format!(
      "content is {size} bytes; the limit is {max_file_bytes}"
    )));
  }

  let full_path = resolve_contained(root, raw_path)?;
  if let Some(parent) = full_path.parent()
    && !parent.as_os_str().is_empty()
  {
    tokio::fs::create_dir_all(parent).await.map_err(|e| {
      ToolCallError::execution(format!("failed to create {}: {e}", parent.display()))
    })?;
    ensure_contained(root, parent)?;
  }
  ensure_not_symlink(&full_path)?;

  tokio::fs::write(&full_path, content.as_bytes())
    .await
    .map_err(|e| ToolCallError::execution(format!("failed to write {}: {e}", full_path.display())))?;

  let relative = display_relative(root, &full_path).unwrap_or_else(|| raw_path.to_string());
  Ok(WrittenFile {
    relative,
    full_path,
    size,
  })
}

#[async_trait]
impl ToolHandler for CreateFileHandler {
  async fn handle(&self, call: ToolCall, ctx: &ToolContext) -> Result<ToolOutput, ToolCallError> {
    let args: CreateFileArgs = call.parse_arguments()?;
    let root = ctx.workspace_root()?;

    let written = write_workspace_file(&root, &args.path, &args.content, self.max_file_bytes).await?;
    let summary = format!("Created file {} ({} bytes)", written.relative, written.size);

    Ok(
      ToolOutput::new(json!({
        "filePath": written.relative,
        "fullPath": written.full_path.display().to_string(),
        "size": written.size,
      }))
      .with_summary(summary),
    )
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;
  use crate::tools::sandboxing::SandboxInfo;

  fn context(root: &Path) -> ToolContext {
    let mut ctx = ToolContext::new("conv", "msg", 0);
    ctx.sandbox = Some(SandboxInfo {
      id: "local-test".to_string(),
      conversation_id: "conv".to_string(),
      root: root.to_path_buf(),
    });
    ctx
  }

  #[tokio::test]
  async fn writes_file_content_and_reports_size() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = CreateFileHandler::new(1024)
      .handle(
        ToolCall::new(
          "create_file",
          json!({ "path": "reports/q3.md", "content": "hello" }),
        ),
        &context(dir.path()),
      )
      .await
      .expect("write file");

    assert_eq!(out.data["filePath"], "reports/q3.md");
    assert_eq!(out.data["size"], 5);
    let written =
      std::fs::read_to_string(dir.path().join("reports/q3.md")).expect("read written file");
    assert_eq!(written, "hello");
  }

  #[tokio::test]
  async fn traversal_stays_inside_workspace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("ws");
    std::fs::create_dir_all(&root).expect("mkdir");

    let out = CreateFileHandler::new(1024)
      .handle(
        ToolCall::new(
          "create_file",
          json!({ "path": "../../etc/passwd", "content": "x" }),
        ),
        &context(&root),
      )
      .await
      .expect("write file");

    assert_eq!(out.data["filePath"], "etc/passwd");
    assert!(root.join("etc/passwd").is_file());
    assert!(!dir.path().join("etc").exists());
  }

  #[tokio::test]
  async fn oversized_content_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = CreateFileHandler::new(3)
      .handle(
        ToolCall::new("create_file", json!({ "path": "a.txt", "content": "four" })),
        &context(dir.path()),
      )
      .await
      .expect_err("too large");
    assert!(matches!(err, ToolCallError::Validation(_)));
    assert!(!dir.path().join("a.txt").exists());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn planted_symlink_cannot_redirect_write_outside_workspace() {
    let outside = tempfile::tempdir().expect("outside");
    let victim = outside.path().join("victim.txt");
    std::fs::write(&victim, "original").expect("write victim");
    let dir = tempfile::tempdir().expect("tempdir");
    std::os::unix::fs::symlink(&victim, dir.path().join("link.txt")).expect("symlink");
    std::os::unix::fs::symlink(outside.path(), dir.path().join("outdir")).expect("symlink dir");

    for path in ["link.txt", "outdir/fresh.txt"] {
      let err = CreateFileHandler::new(1024)
        .handle(
          ToolCall::new("create_file", json!({ "path": path, "content": "PWNED" })),
          &context(dir.path()),
        )
        .await
        .expect_err("write through symlink");
      assert!(matches!(err, ToolCallError::Security(_)), "{path}: {err}");
    }

    assert_eq!(std::fs::read_to_string(&victim).expect("read victim"), "original");
    assert!(!outside.path().join("fresh.txt").exists());
  }
}
