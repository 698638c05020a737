use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use nexus_protocol::{SseFrame, StreamEvent, ToolInvocation, ToolResult};

use crate::state::StreamStatus;

/// Callbacks fired as the consumer advances. Every method defaults to a no-op.
pub trait StreamObserver: Send + Sync {
  fn on_status_change(&self, _from: StreamStatus, _to: StreamStatus) {}

  fn on_chunk(&self, _content: &str, _streaming_text: &str) {}

  fn on_tool_started(&self, _invocation: &ToolInvocation) {}

  fn on_tool_completed(&self, _result: &ToolResult) {}

  fn on_message(&self, _message_id: &str, _content: &str) {}

  fn on_error(&self, _message: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// State machine for one conversation's event stream.
///
/// Events are applied in delivery order. Once the run reaches a terminal
/// state, later events are ignored until [`StreamConsumer::start_run`].
#[derive(Default)]
pub struct StreamConsumer {
  status: StreamStatus,
  message_id: Option<String>,
  streaming_text: String,
  final_message: Option<String>,
  active_tool: Option<ToolInvocation>,
  invocations: Vec<ToolInvocation>,
  results: Vec<ToolResult>,
  delivered: HashSet<(String, u32)>,
  error: Option<String>,
  observers: BTreeMap<SubscriptionId, Arc<dyn StreamObserver>>,
  next_subscription: u64,
}

impl StreamConsumer {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn subscribe(&mut self, observer: Arc<dyn StreamObserver>) -> SubscriptionId {
    let id = SubscriptionId(self.next_subscription);
    self.next_subscription += 1;
    self.observers.insert(id, observer);
    id
  }

  pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
    self.observers.remove(&id).is_some()
  }

  /// Resets per-run state and moves to `connecting`.
  pub fn start_run(&mut self) {
    self.message_id = None;
    self.streaming_text.clear();
    self.final_message = None;
    self.active_tool = None;
    self.invocations.clear();
    self.results.clear();
    self.delivered.clear();
    self.error = None;
    self.transition(StreamStatus::Connecting);
  }

  /// Applies one decoded SSE frame. A payload that is not a valid event
  /// fails the run.
  pub fn handle_frame(&mut self, frame: &SseFrame) {
    if self.status.is_terminal() {
      return;
    }
    match frame.parse() {
      Ok(event) => self.handle_event(event),
      Err(err) => self.fail(format!("malformed event: {err}")),
    }
  }

  pub fn handle_event(&mut self, event: StreamEvent) {
    if self.status.is_terminal() {
      debug!(event = event.event_type(), status = %self.status, "ignoring event after terminal state");
      return;
    }

    match event {
      StreamEvent::Connected => {
        if matches!(self.status, StreamStatus::Idle | StreamStatus::Connecting) {
          self.transition(StreamStatus::Streaming);
        }
      }
      StreamEvent::Ping(_) => {}
      StreamEvent::AssistantChunk(chunk) => {
        self.message_id.get_or_insert(chunk.message_id);
        self.streaming_text.push_str(&chunk.content);
        if self.active_tool.is_none() {
          self.transition(StreamStatus::Streaming);
        }
        let text = self.streaming_text.clone();
        self.notify(|observer| observer.on_chunk(&chunk.content, &text));
      }
      StreamEvent::ToolStarted(started) => {
        let invocation = ToolInvocation::from_started(&started);
        self.invocations.push(invocation.clone());
        self.active_tool = Some(invocation.clone());
        self.transition(StreamStatus::ProcessingTool);
        self.notify(|observer| observer.on_tool_started(&invocation));
      }
      StreamEvent::ToolCompleted(completed) => {
        let key = (completed.message_id.clone(), completed.tool_index);
        if !self.delivered.insert(key) {
          debug!(
            message_id = %completed.message_id,
            tool_index = completed.tool_index,
            "dropping duplicate tool result"
          );
          return;
        }

        let result = ToolResult::from_completed(&completed);
        if let Some(invocation) = self
          .invocations
          .iter_mut()
          .find(|invocation| invocation.key() == result.key())
        {
          invocation.finish(result.status);
        }
        if self
          .active_tool
          .as_ref()
          .is_some_and(|active| active.key() == result.key())
        {
          self.active_tool = None;
        }
        self.notify(|observer| observer.on_tool_completed(&result));
        self.results.push(result);
        if self.active_tool.is_none() {
          self.transition(StreamStatus::Streaming);
        }
      }
      StreamEvent::MessageComplete(done) => {
        self.active_tool = None;
        self.message_id = Some(done.message_id.clone());
        self.final_message = Some(done.content.clone());
        self.notify(|observer| observer.on_message(&done.message_id, &done.content));
        self.transition(StreamStatus::Completed);
      }
      StreamEvent::Error(err) => self.fail(err.message),
    }
  }

  /// Moves to `error` (no-op once terminal).
  pub fn fail(&mut self, message: impl Into<String>) {
    if self.status.is_terminal() {
      return;
    }
    let message = message.into();
    warn!(error = %message, "stream failed");
    self.error = Some(message.clone());
    self.active_tool = None;
    self.notify(|observer| observer.on_error(&message));
    self.transition(StreamStatus::Error);
  }

  pub fn status(&self) -> StreamStatus {
    self.status
  }

  pub fn message_id(&self) -> Option<&str> {
    self.message_id.as_deref()
  }

  /// Raw assistant text received so far, markup included.
  pub fn streaming_text(&self) -> &str {
    &self.streaming_text
  }

  /// Markup-free message delivered by `message_complete`.
  pub fn final_message(&self) -> Option<&str> {
    self.final_message.as_deref()
  }

  pub fn active_tool(&self) -> Option<&ToolInvocation> {
    self.active_tool.as_ref()
  }

  pub fn invocations(&self) -> &[ToolInvocation] {
    &self.invocations
  }

  pub fn results(&self) -> &[ToolResult] {
    &self.results
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  fn transition(&mut self, to: StreamStatus) {
    let from = self.status;
    if from == to {
      return;
    }
    debug!(from = %from, to = %to, "stream status");
    self.status = to;
    self.notify(|observer| observer.on_status_change(from, to));
  }

  fn notify(&self, f: impl Fn(&dyn StreamObserver)) {
    for observer in self.observers.values() {
      f(observer.as_ref());
    }
  }
}
