use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ConversationStore, StoreError, StoredMessage, ToolCallRecord};

#[derive(Default)]
struct Conversation {
  messages: Vec<StoredMessage>,
  tool_calls: Vec<ToolCallRecord>,
}

/// Process-local store. Conversations are created on first write.
#[derive(Default)]
pub struct InMemoryConversationStore {
  conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversationStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
  async fn append_message(&self, message: StoredMessage) -> Result<(), StoreError> {
    self
      .conversations
      .write()
      .await
      .entry(message.conversation_id.clone())
      .or_default()
      .messages
      .push(message);
    Ok(())
  }

  async fn record_tool_call(&self, record: ToolCallRecord) -> Result<(), StoreError> {
    self
      .conversations
      .write()
      .await
      .entry(record.conversation_id.clone())
      .or_default()
      .tool_calls
      .push(record);
    Ok(())
  }

  async fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
    let conversations = self.conversations.read().await;
    Ok(
      conversations
        .get(conversation_id)
        .map(|conversation| conversation.messages.clone())
        .unwrap_or_default(),
    )
  }

  async fn tool_calls(&self, conversation_id: &str) -> Result<Vec<ToolCallRecord>, StoreError> {
    let conversations = self.conversations.read().await;
    Ok(
      conversations
        .get(conversation_id)
        .map(|conversation| conversation.tool_calls.clone())
        .unwrap_or_default(),
    )
  }
}
