use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use nexus_config::StreamConfig;
use nexus_protocol::{
  AssistantChunkEvent, ErrorEvent, MessageCompleteEvent, StreamEvent, ToolInvocation, ToolResult,
  ToolStartedEvent,
};

use crate::event::{EventSink, ping_event};
use crate::session::{ConversationStore, MessageRole, StoredMessage, ToolCallRecord};
use crate::stream::{IncrementalExtractor, Segment, ToolCallParser};
use crate::tools::context::ToolContext;
use crate::tools::router::ToolRouter;

#[derive(Debug, Clone)]
pub struct TurnConfig {
  /// Keepalive cadence while the turn is in flight.
  pub ping_interval: Duration,
}

impl TurnConfig {
  pub fn from_stream(config: &StreamConfig) -> Self {
    Self {
      ping_interval: Duration::from_millis(config.ping_interval_ms),
    }
  }
}

impl Default for TurnConfig {
  fn default() -> Self {
    Self::from_stream(&StreamConfig::default())
  }
}

#[derive(Debug, Error)]
pub enum TurnError {
  #[error("upstream stream failed: {0}")]
  Upstream(String),
}

/// Outcome of a finished turn.
#[derive(Debug, Clone)]
pub struct TurnResult {
  pub message_id: String,
  /// Assistant text with tool markup removed.
  pub content: String,
  pub invocations: Vec<ToolInvocation>,
  pub results: Vec<ToolResult>,
}

/// Per-turn bookkeeping.
struct TurnState {
  conversation_id: String,
  message_id: String,
  clean_text: String,
  next_index: u32,
  invocations: Vec<ToolInvocation>,
  results: Vec<ToolResult>,
}

/// Drives one turn: every upstream fragment is echoed as `assistant_chunk`,
/// fed to the extractor, and each completed block is dispatched before the
/// next one is looked at.
#[derive(Clone)]
pub struct TurnExecutor {
  router: Arc<ToolRouter>,
  parser: ToolCallParser,
  tags: Vec<String>,
  store: Arc<dyn ConversationStore>,
  sink: EventSink,
  config: TurnConfig,
}

impl TurnExecutor {
  pub fn new(
    router: Arc<ToolRouter>,
    parser: ToolCallParser,
    tags: Vec<String>,
    store: Arc<dyn ConversationStore>,
    sink: EventSink,
    config: TurnConfig,
  ) -> Self {
    Self {
      router,
      parser,
      tags,
      store,
      sink,
      config,
    }
  }

  pub async fn run<S, E>(
    &self,
    conversation_id: &str,
    message_id: &str,
    upstream: S,
  ) -> Result<TurnResult, TurnError>
  where
    S: Stream<Item = Result<String, E>>,
    E: Display,
  {
    info!(conversation_id, message_id, "turn started");
    let mut upstream = std::pin::pin!(upstream);
    let mut extractor = IncrementalExtractor::new(self.tags.iter().cloned());
    let mut ping = keepalive(self.config.ping_interval).await;
    let mut state = TurnState {
      conversation_id: conversation_id.to_string(),
      message_id: message_id.to_string(),
      clean_text: String::new(),
      next_index: 0,
      invocations: Vec::new(),
      results: Vec::new(),
    };

    loop {
      let next = tokio::select! {
        item = upstream.next() => item,
        _ = ping.tick() => {
          self.sink.send(ping_event()).await;
          continue;
        }
      };

      match next {
        None => break,
        Some(Err(err)) => {
          let message = err.to_string();
          warn!(conversation_id, message_id, error = %message, "upstream failed");
          self
            .sink
            .send(StreamEvent::Error(ErrorEvent {
              message: message.clone(),
            }))
            .await;
          return Err(TurnError::Upstream(message));
        }
        Some(Ok(fragment)) => {
          if fragment.is_empty() {
            continue;
          }
          self
            .sink
            .send(StreamEvent::AssistantChunk(AssistantChunkEvent {
              content: fragment.clone(),
              message_id: state.message_id.clone(),
            }))
            .await;
          for segment in extractor.push(&fragment) {
            self.apply_segment(segment, &mut state, &mut ping).await;
          }
        }
      }
    }

    for segment in extractor.finish() {
      self.apply_segment(segment, &mut state, &mut ping).await;
    }

    self
      .sink
      .send(StreamEvent::MessageComplete(MessageCompleteEvent {
        message_id: state.message_id.clone(),
        content: state.clean_text.clone(),
      }))
      .await;

    let message = StoredMessage {
      id: state.message_id.clone(),
      conversation_id: state.conversation_id.clone(),
      role: MessageRole::Assistant,
      content: state.clean_text.clone(),
      created_at: Utc::now(),
    };
    if let Err(err) = self.store.append_message(message).await {
      warn!(conversation_id, message_id, error = %err, "failed to store assistant message");
    }

    info!(
      conversation_id,
      message_id,
      tools = state.invocations.len(),
      "turn completed"
    );
    Ok(TurnResult {
      message_id: state.message_id,
      content: state.clean_text,
      invocations: state.invocations,
      results: state.results,
    })
  }

  async fn apply_segment(&self, segment: Segment, state: &mut TurnState, ping: &mut Interval) {
    let block = match segment {
      Segment::Text(text) => {
        state.clean_text.push_str(&text);
        return;
      }
      Segment::Block(block) => block,
    };

    let Some(parsed) = self.parser.parse(&block.raw) else {
      return;
    };

    let tool_index = state.next_index;
    state.next_index += 1;
    let arguments = parsed.arguments_value();

    let started = ToolStartedEvent {
      tool_name: parsed.tag.clone(),
      tool_index,
      args: arguments.clone(),
      message_id: state.message_id.clone(),
    };
    let mut invocation = ToolInvocation::from_started(&started);
    invocation.source_text = block.raw;
    debug!(
      conversation_id = %state.conversation_id,
      message_id = %state.message_id,
      tool = %parsed.tag,
      tool_index,
      "dispatching tool block"
    );
    self.sink.send(StreamEvent::ToolStarted(started)).await;

    let ctx = ToolContext::new(&state.conversation_id, &state.message_id, tool_index);
    let result = {
      let dispatch = self.router.execute_tag(&parsed.tag, arguments.clone(), ctx);
      tokio::pin!(dispatch);
      loop {
        tokio::select! {
          result = &mut dispatch => break result,
          _ = ping.tick() => {
            self.sink.send(ping_event()).await;
          }
        }
      }
    };

    let completed = result.to_completed_event(&parsed.tag, tool_index, &state.message_id);
    invocation.finish(completed.status);
    state.results.push(ToolResult::from_completed(&completed));
    state.invocations.push(invocation);
    self.sink.send(StreamEvent::ToolCompleted(completed)).await;

    let record = ToolCallRecord {
      conversation_id: state.conversation_id.clone(),
      message_id: state.message_id.clone(),
      tool_name: parsed.tag,
      tool_index,
      arguments,
      result: result.to_value(),
      created_at: Utc::now(),
    };
    if let Err(err) = self.store.record_tool_call(record).await {
      warn!(
        conversation_id = %state.conversation_id,
        tool_index,
        error = %err,
        "failed to record tool call"
      );
    }
  }
}

/// Interval whose first tick is one period from now.
async fn keepalive(period: Duration) -> Interval {
  let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
  interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
  interval.tick().await;
  interval
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use async_trait::async_trait;
  use nexus_config::SecurityConfig;
  use nexus_protocol::ToolStatus;
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use tokio::sync::mpsc;

  use super::*;
  use crate::session::InMemoryConversationStore;
  use crate::tools::context::{ToolCall, ToolCallError, ToolOutput};
  use crate::tools::parser_for;
  use crate::tools::registry::{ToolHandler, ToolRegistry};
  use crate::tools::sandboxing::{LocalSandboxProvider, SandboxManager};
  use crate::tools::spec::{BodyMode, JsonSchema, ToolSpec};
  use crate::tools::validation::ToolValidator;

  /// Echoes its body back after an optional delay.
  struct Echo {
    delay: Duration,
    calls: AtomicUsize,
  }

  #[async_trait]
  impl ToolHandler for Echo {
    async fn handle(&self, call: ToolCall, _ctx: &ToolContext) -> Result<ToolOutput, ToolCallError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(self.delay).await;
      match call.str_arg("content") {
        Some("fail") => Err(ToolCallError::execution("echo refused")),
        content => Ok(ToolOutput::new(json!({ "echo": content }))),
      }
    }
  }

  struct Harness {
    executor: TurnExecutor,
    events: mpsc::Receiver<StreamEvent>,
    store: Arc<InMemoryConversationStore>,
    echo: Arc<Echo>,
    _dir: tempfile::TempDir,
  }

  fn harness(delay: Duration, ping_interval: Duration) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let echo = Arc::new(Echo {
      delay,
      calls: AtomicUsize::new(0),
    });
    let mut registry = ToolRegistry::new();
    registry
      .register_tool(
        ToolSpec::new(
          "echo_tool",
          "echo",
          JsonSchema::Object {
            properties: Default::default(),
            required: None,
          },
          &["echo-tool"],
          BodyMode::Content,
        ),
        echo.clone(),
      )
      .expect("register");
    let parser = parser_for(&registry);
    let tags = registry.surface_tags();
    let router = ToolRouter::new(
      Arc::new(registry),
      Arc::new(ToolValidator::new(&SecurityConfig::default())),
      Arc::new(SandboxManager::new(Arc::new(LocalSandboxProvider::new(
        dir.path().to_path_buf(),
      )))),
    );
    let store = Arc::new(InMemoryConversationStore::new());
    let (sink, events) = EventSink::channel(128);
    let executor = TurnExecutor::new(
      Arc::new(router),
      parser,
      tags,
      store.clone(),
      sink,
      TurnConfig { ping_interval },
    );
    Harness {
      executor,
      events,
      store,
      echo,
      _dir: dir,
    }
  }

  fn upstream(fragments: &[&str]) -> impl Stream<Item = Result<String, String>> {
    let items: Vec<Result<String, String>> = fragments.iter().map(|f| Ok(f.to_string())).collect();
    futures::stream::iter(items)
  }

  fn collect_events(rx: &mut mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
      events.push(event);
    }
    events
  }

  fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events
      .iter()
      .map(StreamEvent::event_type)
      .filter(|kind| *kind != "ping")
      .collect()
  }

  #[tokio::test]
  async fn block_is_dispatched_between_chunks_and_stripped_from_message() {
    let mut h = harness(Duration::ZERO, Duration::from_secs(60));
    let result = h
      .executor
      .run(
        "conv",
        "msg-1",
        upstream(&["Hi ", "<echo-tool>x", "</echo-tool>", " bye"]),
      )
      .await
      .expect("turn");

    let events = collect_events(&mut h.events);
    assert_eq!(
      kinds(&events),
      vec![
        "assistant_chunk",
        "assistant_chunk",
        "assistant_chunk",
        "tool_started",
        "tool_completed",
        "assistant_chunk",
        "message_complete",
      ]
    );
    assert_eq!(result.content, "Hi  bye");
    let Some(StreamEvent::ToolCompleted(completed)) = events.get(4) else {
      panic!("expected tool_completed, got {events:?}");
    };
    assert_eq!(completed.tool_name, "echo-tool");
    assert_eq!(completed.result, Some(json!({ "echo": "x" })));

    let stored = h.store.messages("conv").await.expect("messages");
    assert_eq!(stored[0].content, "Hi  bye");
  }

  #[tokio::test]
  async fn tool_indexes_increase_from_zero_and_failures_stay_inline() {
    let mut h = harness(Duration::ZERO, Duration::from_secs(60));
    let result = h
      .executor
      .run(
        "conv",
        "msg-2",
        upstream(&["<echo-tool>a</echo-tool><echo-tool>fail</echo-tool><echo-tool>b</echo-tool>"]),
      )
      .await
      .expect("turn");

    let indexes: Vec<u32> = result.results.iter().map(|r| r.tool_index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
    assert_eq!(result.results[1].status, ToolStatus::Error);
    assert_eq!(result.results[1].error.as_deref(), Some("echo refused"));
    assert!(result.results[2].is_success());

    let completed = collect_events(&mut h.events)
      .into_iter()
      .filter(|event| matches!(event, StreamEvent::ToolCompleted(_)))
      .count();
    assert_eq!(completed, 3);
    assert_eq!(h.store.tool_calls("conv").await.expect("audit").len(), 3);
  }

  #[tokio::test]
  async fn repeated_block_text_is_dispatched_once() {
    let h = harness(Duration::ZERO, Duration::from_secs(60));
    h.executor
      .run(
        "conv",
        "msg-3",
        upstream(&["<echo-tool>same</echo-tool>", " and ", "<echo-tool>same</echo-tool>"]),
      )
      .await
      .expect("turn");
    assert_eq!(h.echo.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn pings_flow_while_a_tool_is_running() {
    let mut h = harness(Duration::from_millis(120), Duration::from_millis(20));
    h.executor
      .run("conv", "msg-4", upstream(&["<echo-tool>slow</echo-tool>"]))
      .await
      .expect("turn");

    let events = collect_events(&mut h.events);
    let started = events
      .iter()
      .position(|event| matches!(event, StreamEvent::ToolStarted(_)))
      .expect("tool_started");
    let completed = events
      .iter()
      .position(|event| matches!(event, StreamEvent::ToolCompleted(_)))
      .expect("tool_completed");
    assert!(
      events[started..completed]
        .iter()
        .any(|event| matches!(event, StreamEvent::Ping(_)))
    );
  }

  #[tokio::test]
  async fn upstream_error_ends_turn_with_error_event() {
    let mut h = harness(Duration::ZERO, Duration::from_secs(60));
    let items: Vec<Result<String, String>> = vec![Ok("partial".to_string()), Err("boom".to_string())];
    let err = h
      .executor
      .run("conv", "msg-5", futures::stream::iter(items))
      .await
      .expect_err("upstream failure");

    assert!(matches!(err, TurnError::Upstream(ref message) if message == "boom"));
    let events = collect_events(&mut h.events);
    assert_eq!(kinds(&events), vec!["assistant_chunk", "error"]);
  }

  #[tokio::test]
  async fn disconnected_consumer_does_not_stop_the_turn() {
    let h = harness(Duration::ZERO, Duration::from_secs(60));
    drop(h.events);
    let result = h
      .executor
      .run("conv", "msg-6", upstream(&["<echo-tool>x</echo-tool>", "tail"]))
      .await
      .expect("turn");

    assert_eq!(result.content, "tail");
    assert_eq!(h.echo.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.tool_calls("conv").await.expect("audit").len(), 1);
  }
}
