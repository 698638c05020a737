// Conversation persistence seam
pub mod memory;

pub use memory::InMemoryConversationStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
  User,
  Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
  pub id: String,
  pub conversation_id: String,
  pub role: MessageRole,
  pub content: String,
  pub created_at: DateTime<Utc>,
}

/// Audit record of one dispatched tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
  pub conversation_id: String,
  pub message_id: String,
  pub tool_name: String,
  pub tool_index: u32,
  pub arguments: Value,
  /// `{success, data|error, metadata}` as produced by the dispatcher.
  pub result: Value,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("conversation store unavailable: {0}")]
  Unavailable(String),
}

/// Storage for conversations, messages and the tool-call audit trail.
#[async_trait]
pub trait ConversationStore: Send + Sync {
  async fn append_message(&self, message: StoredMessage) -> Result<(), StoreError>;

  async fn record_tool_call(&self, record: ToolCallRecord) -> Result<(), StoreError>;

  async fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError>;

  async fn tool_calls(&self, conversation_id: &str) -> Result<Vec<ToolCallRecord>, StoreError>;
}
