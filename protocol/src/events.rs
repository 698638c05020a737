use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ToolStatus;

/// Events pushed from the engine to a consumer, one per transport message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
  /// Raw assistant text fragment, markup included.
  AssistantChunk(AssistantChunkEvent),
  /// A tool invocation was extracted and is now executing.
  ToolStarted(ToolStartedEvent),
  /// A tool invocation finished, successfully or not.
  ToolCompleted(ToolCompletedEvent),
  /// The assistant turn is finished.
  MessageComplete(MessageCompleteEvent),
  /// Keepalive.
  Ping(PingEvent),
  /// Fatal error for the current turn.
  Error(ErrorEvent),
  /// Control frame some servers send once the stream is open.
  Connected,
}

impl StreamEvent {
  pub fn event_type(&self) -> &'static str {
    match self {
      StreamEvent::AssistantChunk(_) => "assistant_chunk",
      StreamEvent::ToolStarted(_) => "tool_started",
      StreamEvent::ToolCompleted(_) => "tool_completed",
      StreamEvent::MessageComplete(_) => "message_complete",
      StreamEvent::Ping(_) => "ping",
      StreamEvent::Error(_) => "error",
      StreamEvent::Connected => "connected",
    }
  }

  pub fn message_id(&self) -> Option<&str> {
    match self {
      StreamEvent::AssistantChunk(event) => Some(&event.message_id),
      StreamEvent::ToolStarted(event) => Some(&event.message_id),
      StreamEvent::ToolCompleted(event) => Some(&event.message_id),
      StreamEvent::MessageComplete(event) => Some(&event.message_id),
      StreamEvent::Ping(_) | StreamEvent::Error(_) | StreamEvent::Connected => None,
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, StreamEvent::MessageComplete(_) | StreamEvent::Error(_))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantChunkEvent {
  pub content: String,
  pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStartedEvent {
  /// Surface tag as the model wrote it.
  pub tool_name: String,
  pub tool_index: u32,
  pub args: Value,
  pub message_id: String,
}

/// Completion of one tool invocation. Exactly one of `result` / `error` is set,
/// matching `status`; build it through [`ToolCompletedEvent::success`] or
/// [`ToolCompletedEvent::failure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCompletedEvent {
  pub tool_name: String,
  pub tool_index: u32,
  pub status: ToolStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub message_id: String,
}

impl ToolCompletedEvent {
  pub fn success(
    tool_name: impl Into<String>,
    tool_index: u32,
    result: Value,
    message_id: impl Into<String>,
  ) -> Self {
    Self {
      tool_name: tool_name.into(),
      tool_index,
      status: ToolStatus::Success,
      result: Some(result),
      error: None,
      message_id: message_id.into(),
    }
  }

  pub fn failure(
    tool_name: impl Into<String>,
    tool_index: u32,
    error: impl Into<String>,
    message_id: impl Into<String>,
  ) -> Self {
    Self {
      tool_name: tool_name.into(),
      tool_index,
      status: ToolStatus::Error,
      result: None,
      error: Some(error.into()),
      message_id: message_id.into(),
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == ToolStatus::Success
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCompleteEvent {
  pub message_id: String,
  /// Assistant text with tool markup removed.
  pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingEvent {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
  #[serde(alias = "error")]
  pub message: String,
}
