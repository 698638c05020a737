use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use nexus_protocol::ToolCompletedEvent;

use crate::tools::sandboxing::SandboxInfo;

/// Arguments for one tool execution, keyed by the internal tool name.
#[derive(Debug, Clone)]
pub struct ToolCall {
  pub name: String,
  pub arguments: Value,
}

impl ToolCall {
  pub fn new(name: impl Into<String>, arguments: Value) -> Self {
    Self {
      name: name.into(),
      arguments,
    }
  }

  pub fn parse_arguments<T: DeserializeOwned>(&self) -> Result<T, ToolCallError> {
    serde_json::from_value(self.arguments.clone()).map_err(|e| {
      ToolCallError::Validation(format!("invalid arguments for {}: {e}", self.name))
    })
  }

  /// String argument, ignoring blanks.
  pub fn str_arg(&self, key: &str) -> Option<&str> {
    self
      .arguments
      .get(key)
      .and_then(Value::as_str)
      .map(str::trim)
      .filter(|value| !value.is_empty())
  }

  /// Unsigned integer argument given either as a number or as a numeric string.
  pub fn u64_arg(&self, key: &str) -> Result<Option<u64>, ToolCallError> {
    match self.arguments.get(key) {
      None | Some(Value::Null) => Ok(None),
      Some(Value::Number(number)) => number.as_u64().map(Some).ok_or_else(|| {
        ToolCallError::Validation(format!("`{key}` must be a non-negative integer"))
      }),
      Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
      Some(Value::String(text)) => text.trim().parse::<u64>().map(Some).map_err(|_| {
        ToolCallError::Validation(format!("`{key}` must be a non-negative integer, got `{text}`"))
      }),
      Some(_) => Err(ToolCallError::Validation(format!(
        "`{key}` must be a non-negative integer"
      ))),
    }
  }

  /// Boolean flag given as `true`/`false`, `"true"`/`"yes"`/`"1"`.
  pub fn flag(&self, key: &str) -> bool {
    match self.arguments.get(key) {
      Some(Value::Bool(flag)) => *flag,
      Some(Value::String(text)) => matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "1" | "on"
      ),
      _ => false,
    }
  }
}

/// Where and for whom a tool is running.
#[derive(Debug, Clone)]
pub struct ToolContext {
  pub conversation_id: String,
  pub message_id: String,
  pub tool_index: u32,
  /// Set by the router for tools that need a workspace.
  pub sandbox: Option<SandboxInfo>,
}

impl ToolContext {
  pub fn new(conversation_id: impl Into<String>, message_id: impl Into<String>, tool_index: u32) -> Self {
    Self {
      conversation_id: conversation_id.into(),
      message_id: message_id.into(),
      tool_index,
      sandbox: None,
    }
  }

  pub fn sandbox(&self) -> Result<&SandboxInfo, ToolCallError> {
    self
      .sandbox
      .as_ref()
      .ok_or_else(|| ToolCallError::Internal("no sandbox was provisioned for this tool".to_string()))
  }

  pub fn workspace_root(&self) -> Result<PathBuf, ToolCallError> {
    Ok(self.sandbox()?.root.clone())
  }
}

/// Successful handler output.
#[derive(Debug, Clone)]
pub struct ToolOutput {
  pub data: Value,
  pub human_readable: Option<String>,
}

impl ToolOutput {
  pub fn new(data: Value) -> Self {
    Self {
      data,
      human_readable: None,
    }
  }

  pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
    self.human_readable = Some(summary.into());
    self
  }
}

/// Failure classes reported inline as failed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  Validation,
  SecurityRejection,
  ExecutionFailure,
  Timeout,
  Internal,
}

/// Tool invocation failures.
#[derive(Debug, Clone, Error)]
pub enum ToolCallError {
  #[error("unknown tool: {0}")]
  UnknownTool(String),

  #[error("{0}")]
  Validation(String),

  #[error("{0}")]
  Security(String),

  #[error("{message}")]
  Execution {
    message: String,
    diagnostics: Option<Value>,
  },

  #[error("{message}")]
  Timeout {
    message: String,
    diagnostics: Option<Value>,
  },

  #[error("internal tool error: {0}")]
  Internal(String),
}

impl ToolCallError {
  pub fn execution(message: impl Into<String>) -> Self {
    ToolCallError::Execution {
      message: message.into(),
      diagnostics: None,
    }
  }

  pub fn kind(&self) -> FailureKind {
    match self {
      ToolCallError::UnknownTool(_) | ToolCallError::Validation(_) => FailureKind::Validation,
      ToolCallError::Security(_) => FailureKind::SecurityRejection,
      ToolCallError::Execution { .. } => FailureKind::ExecutionFailure,
      ToolCallError::Timeout { .. } => FailureKind::Timeout,
      ToolCallError::Internal(_) => FailureKind::Internal,
    }
  }

  pub fn diagnostics(&self) -> Option<&Value> {
    match self {
      ToolCallError::Execution { diagnostics, .. } | ToolCallError::Timeout { diagnostics, .. } => {
        diagnostics.as_ref()
      }
      _ => None,
    }
  }
}

impl From<nexus_utils_path::PathError> for ToolCallError {
  fn from(value: nexus_utils_path::PathError) -> Self {
    ToolCallError::Security(value.to_string())
  }
}

/// Metadata attached to every dispatched result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
  pub tool: String,
  pub execution_ms: u64,
  pub timestamp: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub human_readable: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub kind: Option<FailureKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
  Success {
    data: Value,
  },
  Failure {
    error: String,
    diagnostics: Option<Value>,
  },
}

/// The dispatcher's uniform answer: exactly one of data or error, plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
  pub outcome: ToolOutcome,
  pub metadata: ExecutionMetadata,
}

impl ExecutionResult {
  pub fn is_success(&self) -> bool {
    matches!(self.outcome, ToolOutcome::Success { .. })
  }

  pub fn data(&self) -> Option<&Value> {
    match &self.outcome {
      ToolOutcome::Success { data } => Some(data),
      ToolOutcome::Failure { .. } => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match &self.outcome {
      ToolOutcome::Failure { error, .. } => Some(error),
      ToolOutcome::Success { .. } => None,
    }
  }

  /// Failure text including captured diagnostics.
  pub fn error_report(&self) -> Option<String> {
    let ToolOutcome::Failure { error, diagnostics } = &self.outcome else {
      return None;
    };
    let Some(diagnostics) = diagnostics else {
      return Some(error.clone());
    };
    let stderr = diagnostics
      .get("stderr")
      .and_then(Value::as_str)
      .map(str::trim)
      .filter(|text| !text.is_empty());
    match stderr {
      Some(stderr) => Some(format!("{error}\n{stderr}")),
      None => Some(error.clone()),
    }
  }

  /// `{success, data|error, metadata}` view used for audit records.
  pub fn to_value(&self) -> Value {
    let metadata = serde_json::to_value(&self.metadata).unwrap_or(Value::Null);
    match &self.outcome {
      ToolOutcome::Success { data } => json!({
        "success": true,
        "data": data,
        "metadata": metadata,
      }),
      ToolOutcome::Failure { error, diagnostics } => json!({
        "success": false,
        "error": error,
        "diagnostics": diagnostics,
        "metadata": metadata,
      }),
    }
  }

  pub fn to_completed_event(
    &self,
    tool_name: &str,
    tool_index: u32,
    message_id: &str,
  ) -> ToolCompletedEvent {
    match &self.outcome {
      ToolOutcome::Success { data } => {
        ToolCompletedEvent::success(tool_name, tool_index, data.clone(), message_id)
      }
      ToolOutcome::Failure { error, .. } => ToolCompletedEvent::failure(
        tool_name,
        tool_index,
        self.error_report().unwrap_or_else(|| error.clone()),
        message_id,
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn numeric_arguments_accept_strings() {
    let call = ToolCall::new(
      "web_search",
      json!({ "num_results": "3", "timeout": 500, "bad": "x" }),
    );
    assert_eq!(call.u64_arg("num_results").expect("num_results"), Some(3));
    assert_eq!(call.u64_arg("timeout").expect("timeout"), Some(500));
    assert_eq!(call.u64_arg("missing").expect("missing"), None);
    assert!(matches!(
      call.u64_arg("bad"),
      Err(ToolCallError::Validation(_))
    ));
  }

  #[test]
  fn failure_event_carries_stderr() {
    let result = ExecutionResult {
      outcome: ToolOutcome::Failure {
        error: "Command exited with status 2".to_string(),
        diagnostics: Some(json!({ "stderr": "ls: cannot access 'nope'\n" })),
      },
      metadata: ExecutionMetadata {
        tool: "execute_command".to_string(),
        execution_ms: 4,
        timestamp: Utc::now(),
        human_readable: None,
        kind: Some(FailureKind::ExecutionFailure),
      },
    };

    let event = result.to_completed_event("execute-command", 1, "m1");
    assert!(!event.is_success());
    assert_eq!(
      event.error.as_deref(),
      Some("Command exited with status 2\nls: cannot access 'nope'")
    );
    assert_eq!(result.to_value()["metadata"]["kind"], "execution_failure");
  }
}
