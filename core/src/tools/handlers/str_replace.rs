use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use nexus_utils_path::resolve_contained;

use crate::tools::context::{ToolCall, ToolCallError, ToolContext, ToolOutput};
use crate::tools::handlers::read_file::read_workspace_file;
use crate::tools::registry::ToolHandler;

/// Replaces one exact occurrence of `old_str` in a workspace file.
pub struct StrReplaceHandler {
  max_file_bytes: u64,
}

impl StrReplaceHandler {
  pub fn new(max_file_bytes: u64) -> Self {
    Self { max_file_bytes }
  }
}

/// Raw string argument; unlike `str_arg` the value is not trimmed.
fn raw_arg<'a>(call: &'a ToolCall, key: &str) -> Option<&'a str> {
  call.arguments.get(key).and_then(Value::as_str)
}

#[async_trait]
impl ToolHandler for StrReplaceHandler {
  async fn handle(&self, call: ToolCall, ctx: &ToolContext) -> Result<ToolOutput, ToolCallError> {
    let path = call
      .str_arg("path")
      .ok_or_else(|| ToolCallError::Validation("missing required argument `path`".to_string()))?;
    let old_str = raw_arg(&call, "old_str")
      .filter(|text| !text.is_empty())
      .ok_or_else(|| ToolCallError::Validation("missing required argument `old_str`".to_string()))?;
    let new_str = raw_arg(&call, "new_str").unwrap_or_default();
    let root = ctx.workspace_root()?;

    // Links are refused outright since the file is rewritten.
    let target = resolve_contained(&root, path)?;
    let file = read_workspace_file(&root, path, self.max_file_bytes).await?;

    match file.content.matches(old_str).count() {
      0 => {
        return Err(ToolCallError::execution(format!(
          "`old_str` was not found in {}",
          file.relative
        )));
      }
      1 => {}
      count => {
        return Err(ToolCallError::execution(format!(
          "`old_str` appears {count} times in {}; it must match exactly once",
          file.relative
        )));
      }
    }

    let updated = file.content.replacen(old_str, new_str, 1);
    let size = updated.len() as u64;
    if size > self.max_file_bytes {
      return Err(ToolCallError::Validation(format!(
        "result is {size} bytes; the limit is {}",
        self.max_file_bytes
      )));
    }
    tokio::fs::write(&target, updated.as_bytes())
      .await
      .map_err(|e| ToolCallError::execution(format!("failed to write {}: {e}", file.relative)))?;
    debug!(path = %file.relative, removed = old_str.len(), inserted = new_str.len(), "replaced text");

    Ok(
      ToolOutput::new(json!({
        "filePath": file.relative,
        "replacements": 1,
        "size": size,
      }))
      .with_summary(format!("Edited {}", file.relative)),
    )
  }
}
