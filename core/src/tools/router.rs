use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tracing::{info, warn};

use crate::tools::context::{
  ExecutionMetadata, ExecutionResult, ToolCall, ToolCallError, ToolContext, ToolOutcome,
  ToolOutput,
};
use crate::tools::registry::ToolRegistry;
use crate::tools::sandboxing::{SandboxError, SandboxInfo, SandboxManager};
use crate::tools::spec::ToolSpec;
use crate::tools::validation::ToolValidator;

/// Single entry point for tool execution. Always answers with exactly one
/// [`ExecutionResult`]; handler errors and panics become failed results.
pub struct ToolRouter {
  registry: Arc<ToolRegistry>,
  validator: Arc<ToolValidator>,
  sandboxes: Arc<SandboxManager>,
}

impl ToolRouter {
  pub fn new(
    registry: Arc<ToolRegistry>,
    validator: Arc<ToolValidator>,
    sandboxes: Arc<SandboxManager>,
  ) -> Self {
    Self {
      registry,
      validator,
      sandboxes,
    }
  }

  /// Executes a call addressed by surface tag (`web-search`) or internal
  /// name (`web_search`).
  pub async fn execute_tag(&self, tag: &str, arguments: Value, ctx: ToolContext) -> ExecutionResult {
    let name = self.registry.resolve_tag(tag).unwrap_or(tag).to_string();
    self.execute(&name, arguments, ctx).await
  }

  pub async fn execute(&self, name: &str, arguments: Value, mut ctx: ToolContext) -> ExecutionResult {
    let started = Instant::now();
    let conversation_id = ctx.conversation_id.clone();

    let Some(tool) = self.registry.get(name) else {
      warn!(conversation_id = %conversation_id, tool = name, "unknown tool");
      return finish(
        name,
        &started,
        Err(ToolCallError::UnknownTool(name.to_string())),
      );
    };

    let call = ToolCall::new(name, arguments);
    if let Err(err) = self.validator.validate_tool_call(&tool.spec, &call) {
      warn!(conversation_id = %conversation_id, tool = name, error = %err, "tool call rejected");
      return finish(name, &started, Err(err));
    }

    // Held until the handler returns: one tool at a time per conversation.
    let mut slot = self.sandboxes.lock(&conversation_id).await;
    if tool.spec.requires_sandbox {
      match self.sandboxes.ensure(&conversation_id, &mut slot).await {
        Ok(sandbox) => ctx.sandbox = Some(sandbox),
        Err(err) => {
          warn!(conversation_id = %conversation_id, tool = name, error = %err, "sandbox unavailable");
          return finish(name, &started, Err(sandbox_failure(err)));
        }
      }
    }

    info!(
      conversation_id = %conversation_id,
      message_id = %ctx.message_id,
      tool = name,
      tool_index = ctx.tool_index,
      "executing tool"
    );

    let handler = tool.handler.clone();
    let outcome = AssertUnwindSafe(handler.handle(call, &ctx))
      .catch_unwind()
      .await
      .unwrap_or_else(|payload| {
        Err(ToolCallError::Internal(format!(
          "tool panicked: {}",
          panic_message(payload.as_ref())
        )))
      });
    drop(slot);

    let result = finish(name, &started, outcome);
    match result.error() {
      None => info!(
        conversation_id = %conversation_id,
        tool = name,
        tool_index = ctx.tool_index,
        execution_ms = result.metadata.execution_ms,
        "tool completed"
      ),
      Some(error) => warn!(
        conversation_id = %conversation_id,
        tool = name,
        tool_index = ctx.tool_index,
        kind = ?result.metadata.kind,
        error,
        "tool failed"
      ),
    }
    result
  }

  /// Destroys a conversation's sandbox.
  pub async fn teardown(&self, conversation_id: &str) -> Result<bool, SandboxError> {
    self.sandboxes.teardown(conversation_id).await
  }

  pub async fn active_sandbox(&self, conversation_id: &str) -> Option<SandboxInfo> {
    self.sandboxes.active(conversation_id).await
  }

  pub fn list_available_tools(&self) -> Vec<ToolSpec> {
    self.registry.list_specs()
  }

  pub fn registry(&self) -> Arc<ToolRegistry> {
    self.registry.clone()
  }
}

fn finish(
  tool: &str,
  started: &Instant,
  outcome: Result<ToolOutput, ToolCallError>,
) -> ExecutionResult {
  let execution_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
  let mut metadata = ExecutionMetadata {
    tool: tool.to_string(),
    execution_ms,
    timestamp: Utc::now(),
    human_readable: None,
    kind: None,
  };

  let outcome = match outcome {
    Ok(output) => {
      metadata.human_readable = output.human_readable;
      ToolOutcome::Success { data: output.data }
    }
    Err(err) => {
      metadata.kind = Some(err.kind());
      ToolOutcome::Failure {
        error: err.to_string(),
        diagnostics: err.diagnostics().cloned(),
      }
    }
  };
  ExecutionResult { outcome, metadata }
}

fn sandbox_failure(err: SandboxError) -> ToolCallError {
  ToolCallError::execution(format!("could not provision sandbox: {err}"))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic".to_string()
  }
}
