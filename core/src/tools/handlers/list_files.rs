// List Files Handler
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Value, json};

use nexus_utils_path::{ensure_contained, resolve_within};

use crate::tools::context::{ToolCall, ToolCallError, ToolContext, ToolOutput};
use crate::tools::registry::ToolHandler;

pub struct ListFilesHandler;

/// `""`, `"."` and `"/"` all mean the workspace root. Other paths must resolve
/// inside `root` on disk.
pub(crate) fn resolve_directory(root: &Path, raw: Option<&str>) -> Result<PathBuf, ToolCallError> {
  match raw.map(str::trim) {
    None | Some("" | "." | "./" | "/") => Ok(root.to_path_buf()),
    Some(path) => {
      let dir = resolve_within(root, path)?;
      ensure_contained(root, &dir)?;
      Ok(dir)
    }
  }
}

/// Directory entries as `{name, type, size}`, sorted by name.
pub(crate) async fn list_directory(dir: &Path) -> Result<Vec<Value>, ToolCallError> {
  let mut reader = tokio::fs::read_dir(dir)
    .await
    .map_err(|e| ToolCallError::execution(format!("cannot list {}: {e}", dir.display())))?;

  let mut entries = Vec::new();
  while let Some(entry) = reader
    .next_entry()
    .await
    .map_err(|e| ToolCallError::execution(format!("cannot list {}: {e}", dir.display())))?
  {
    let metadata = entry
      .metadata()
      .await
      .map_err(|e| ToolCallError::execution(format!("cannot stat entry: {e}")))?;
    let kind = if metadata.is_dir() { "directory" } else { "file" };
    entries.push((
      entry.file_name().to_string_lossy().into_owned(),
      kind,
      metadata.len(),
    ));
  }
  entries.sort_by(|a, b| a.0.cmp(&b.0));

  Ok(
    entries
      .into_iter()
      .map(|(name, kind, size)| json!({ "name": name, "type": kind, "size": size }))
      .collect(),
  )
}

#[async_trait]
impl ToolHandler for ListFilesHandler {
  async fn handle(&self, call: ToolCall, ctx: &ToolContext) -> Result<ToolOutput, ToolCallError> {
    let root = ctx.workspace_root()?;
    let dir = resolve_directory(&root, call.str_arg("path"))?;
    let entries = list_directory(&dir).await?;
    let summary = format!("{} entries", entries.len());
    Ok(
      ToolOutput::new(json!({
        "path": call.str_arg("path").unwrap_or("."),
        "entries": entries,
      }))
      .with_summary(summary),
    )
  }
}
