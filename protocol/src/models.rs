use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{ToolCompletedEvent, ToolStartedEvent};

/// Outcome reported on the wire for a finished invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
  Success,
  Error,
}

/// Lifecycle of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
  Executing,
  Completed,
  Error,
}

/// One tagged block the engine extracted and dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
  pub tool_name: String,
  pub tool_index: u32,
  pub arguments: Value,
  /// Raw block text the invocation was parsed from.
  #[serde(default)]
  pub source_text: String,
  pub message_id: String,
  pub status: InvocationStatus,
}

impl ToolInvocation {
  pub fn from_started(event: &ToolStartedEvent) -> Self {
    Self {
      tool_name: event.tool_name.clone(),
      tool_index: event.tool_index,
      arguments: event.args.clone(),
      source_text: String::new(),
      message_id: event.message_id.clone(),
      status: InvocationStatus::Executing,
    }
  }

  pub fn key(&self) -> (&str, u32) {
    (&self.message_id, self.tool_index)
  }

  pub fn finish(&mut self, status: ToolStatus) {
    self.status = match status {
      ToolStatus::Success => InvocationStatus::Completed,
      ToolStatus::Error => InvocationStatus::Error,
    };
  }
}

/// Result correlated 1:1 with a [`ToolInvocation`] through `(message_id, tool_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
  pub tool_name: String,
  pub tool_index: u32,
  pub status: ToolStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub message_id: String,
  pub timestamp: DateTime<Utc>,
}

impl ToolResult {
  pub fn from_completed(event: &ToolCompletedEvent) -> Self {
    Self {
      tool_name: event.tool_name.clone(),
      tool_index: event.tool_index,
      status: event.status,
      result: event.result.clone(),
      error: event.error.clone(),
      message_id: event.message_id.clone(),
      timestamp: Utc::now(),
    }
  }

  pub fn key(&self) -> (&str, u32) {
    (&self.message_id, self.tool_index)
  }

  pub fn is_success(&self) -> bool {
    self.status == ToolStatus::Success
  }
}
