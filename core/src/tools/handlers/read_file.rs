use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use nexus_utils_path::{display_relative, ensure_contained, resolve_within};

use crate::tools::context::{ToolCall, ToolCallError, ToolContext, ToolOutput};
use crate::tools::registry::ToolHandler;

pub struct ReadFileHandler {
  max_file_bytes: u64,
}

impl ReadFileHandler {
  pub fn new(max_file_bytes: u64) -> Self {
    Self { max_file_bytes }
  }
}

/// A text file read from a workspace.
#[derive(Debug, Clone)]
pub(crate) struct WorkspaceText {
  pub relative: String,
  pub content: String,
}

/// Reads a UTF-8 file under `root`. Links are followed only while they stay
/// inside the workspace.
pub(crate) async fn read_workspace_file(
  root: &Path,
  raw_path: &str,
  max_file_bytes: u64,
) -> Result<WorkspaceText, ToolCallError> {
  let target = resolve_within(root, raw_path)?;
  ensure_contained(root, &target)?;
  let relative = display_relative(root, &target).unwrap_or_else(|| raw_path.to_string());

  let metadata = match tokio::fs::metadata(&target).await {
    Ok(metadata) => metadata,
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
      return Err(ToolCallError::execution(format!("File not found: {relative}")));
    }
    Err(err) => {
      return Err(ToolCallError::execution(format!("cannot access {relative}: {err}")));
    }
  };
  if metadata.is_dir() {
    return Err(ToolCallError::execution(format!(
      "{relative} is a directory, not a file"
    )));
  }
  if metadata.len() > max_file_bytes {
    return Err(ToolCallError::execution(format!(
      "{relative} is {} bytes; the limit is {max_file_bytes}",
      metadata.len()
    )));
  }

  let bytes = tokio::fs::read(&target)
    .await
    .map_err(|e| ToolCallError::execution(format!("failed to read {relative}: {e}")))?;
  let content = String::from_utf8(bytes)
    .map_err(|_| ToolCallError::execution(format!("{relative} is not UTF-8 text")))?;
  Ok(WorkspaceText { relative, content })
}

#[async_trait]
impl ToolHandler for ReadFileHandler {
  async fn handle(&self, call: ToolCall, ctx: &ToolContext) -> Result<ToolOutput, ToolCallError> {
    let path = call
      .str_arg("path")
      .ok_or_else(|| ToolCallError::Validation("missing required argument `path`".to_string()))?;
    let root = ctx.workspace_root()?;

    let file = read_workspace_file(&root, path, self.max_file_bytes).await?;
    let summary = format!("Read {} ({} bytes)", file.relative, file.content.len());
    Ok(
      ToolOutput::new(json!({
        "filePath": file.relative,
        "size": file.content.len(),
        "content": file.content,
      }))
      .with_summary(summary),
    )
  }
}
