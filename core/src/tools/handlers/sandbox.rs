use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::context::{ToolCall, ToolCallError, ToolContext, ToolOutput};
use crate::tools::handlers::create_file::write_workspace_file;
use crate::tools::handlers::delete_file::delete_workspace_file;
use crate::tools::handlers::execute_command::CommandRunner;
use crate::tools::handlers::list_files::{list_directory, resolve_directory};
use crate::tools::registry::ToolHandler;
use crate::tools::validation::{command_text, normalized_action};

/// Multi-action tool over the conversation's isolated environment.
pub struct SandboxHandler {
  runner: CommandRunner,
  max_file_bytes: u64,
}

impl SandboxHandler {
  pub fn new(runner: CommandRunner, max_file_bytes: u64) -> Self {
    Self {
      runner,
      max_file_bytes,
    }
  }
}

fn required<'a>(call: &'a ToolCall, key: &str, action: &str) -> Result<&'a str, ToolCallError> {
  call
    .str_arg(key)
    .ok_or_else(|| ToolCallError::Validation(format!("`{action}` needs `{key}`")))
}

#[async_trait]
impl ToolHandler for SandboxHandler {
  async fn handle(&self, call: ToolCall, ctx: &ToolContext) -> Result<ToolOutput, ToolCallError> {
    let action = normalized_action(&call)
      .ok_or_else(|| ToolCallError::Validation("missing required argument `action`".to_string()))?;
    let sandbox = ctx.sandbox()?;
    let root = sandbox.root.as_path();

    let (message, extra): (String, Value) = match action.as_str() {
      "create-file" => {
        let path = required(&call, "path", &action)?;
        // Content may be empty, so read it raw instead of through str_arg.
        let content = call
          .arguments
          .get("content")
          .and_then(Value::as_str)
          .unwrap_or_default();
        let written = write_workspace_file(root, path, content, self.max_file_bytes).await?;
        (
          format!("Created {} ({} bytes)", written.relative, written.size),
          json!({ "filePath": written.relative, "size": written.size }),
        )
      }
      "list-files" => {
        let dir = resolve_directory(root, call.str_arg("path"))?;
        let entries = list_directory(&dir).await?;
        (
          format!("Listed {} entries", entries.len()),
          json!({ "path": call.str_arg("path").unwrap_or("."), "entries": entries }),
        )
      }
      "execute-command" => {
        let command = command_text(&call)
          .ok_or_else(|| ToolCallError::Validation(format!("`{action}` needs `command`")))?;
        let output = self
          .runner
          .run(
            root,
            command,
            call.str_arg("workdir"),
            call.u64_arg("timeout")?,
            call.flag("network"),
          )
          .await?;
        (
          format!("Command exited with status {}", output.exit_code),
          output.to_value(),
        )
      }
      "delete-file" => {
        let path = required(&call, "path", &action)?;
        let relative = delete_workspace_file(root, path).await?;
        (format!("Deleted {relative}"), json!({ "filePath": relative }))
      }
      other => {
        return Err(ToolCallError::Validation(format!(
          "unknown sandbox action `{other}`"
        )));
      }
    };

    let mut data = json!({
      "action": action,
      "sandboxId": sandbox.id,
      "message": message,
    });
    if let (Some(data), Value::Object(extra)) = (data.as_object_mut(), extra) {
      data.extend(extra);
    }
    Ok(ToolOutput::new(data).with_summary(message))
  }
}
