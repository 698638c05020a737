use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use nexus_utils_path::{display_relative, ensure_contained, resolve_within};

use crate::tools::context::{ToolCall, ToolCallError, ToolContext, ToolOutput};
use crate::tools::registry::ToolHandler;

pub struct DeleteFileHandler;

/// Removes one file under `root`; returns its workspace-relative path. The
/// parent directory must resolve inside `root`. A symbolic link is removed
/// itself and never followed.
pub(crate) async fn delete_workspace_file(root: &Path, raw_path: &str) -> Result<String, ToolCallError> {
  let target = resolve_within(root, raw_path)?;
  if let Some(parent) = target.parent() {
    ensure_contained(root, parent)?;
  }
  let relative = display_relative(root, &target).unwrap_or_else(|| raw_path.to_string());

  match tokio::fs::symlink_metadata(&target).await {
    Ok(metadata) if metadata.is_dir() => {
      return Err(ToolCallError::execution(format!(
        "{relative} is a directory, not a file"
      )));
    }
    Ok(_) => {}
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
      return Err(ToolCallError::execution(format!("File not found: {relative}")));
    }
    Err(err) => {
      return Err(ToolCallError::execution(format!("cannot access {relative}: {err}")));
    }
  }

  tokio::fs::remove_file(&target)
    .await
    .map_err(|e| ToolCallError::execution(format!("failed to delete {relative}: {e}")))?;
  Ok(relative)
}

#[async_trait]
impl ToolHandler for DeleteFileHandler {
  async fn handle(&self, call: ToolCall, ctx: &ToolContext) -> Result<ToolOutput, ToolCallError> {
    let path = call
      .str_arg("path")
      .ok_or_else(|| ToolCallError::Validation("missing required argument `path`".to_string()))?;
    let root = ctx.workspace_root()?;
    let relative = delete_workspace_file(&root, path).await?;
    Ok(
      ToolOutput::new(json!({ "filePath": relative, "deleted": true }))
        .with_summary(format!("Deleted {relative}")),
    )
  }
}
