use std::fmt::Display;
use std::sync::Arc;

use anyhow::Context;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use nexus_config::Config;
use nexus_protocol::StreamEvent;

use crate::event::{EventSink, generate_message_id};
use crate::session::{ConversationStore, InMemoryConversationStore};
use crate::stream::ToolCallParser;
use crate::tools::registry::ToolRegistry;
use crate::tools::router::ToolRouter;
use crate::tools::sandboxing::{LocalSandboxProvider, SandboxError, SandboxProvider};
use crate::tools::{build_default_tools, parser_for};
use crate::turn::{TurnConfig, TurnError, TurnExecutor, TurnResult};

/// A turn running in the background.
pub struct TurnHandle {
  pub message_id: String,
  pub events: mpsc::Receiver<StreamEvent>,
  pub join: JoinHandle<Result<TurnResult, TurnError>>,
}

pub struct EngineBuilder {
  config: Config,
  store: Option<Arc<dyn ConversationStore>>,
  sandbox_provider: Option<Arc<dyn SandboxProvider>>,
}

impl EngineBuilder {
  pub fn new(config: Config) -> Self {
    Self {
      config,
      store: None,
      sandbox_provider: None,
    }
  }

  pub fn store(mut self, store: Arc<dyn ConversationStore>) -> Self {
    self.store = Some(store);
    self
  }

  pub fn sandbox_provider(mut self, provider: Arc<dyn SandboxProvider>) -> Self {
    self.sandbox_provider = Some(provider);
    self
  }

  pub fn build(self) -> anyhow::Result<Engine> {
    let provider = self.sandbox_provider.unwrap_or_else(|| {
      Arc::new(LocalSandboxProvider::new(self.config.workspace.root.clone()))
    });
    let (registry, router) =
      build_default_tools(&self.config, provider).context("failed to register built-in tools")?;
    let store = self
      .store
      .unwrap_or_else(|| Arc::new(InMemoryConversationStore::new()));

    info!(
      tools = registry.list_specs().len(),
      workspace = %self.config.workspace.root.display(),
      "engine ready"
    );
    Ok(Engine {
      parser: parser_for(&registry),
      tags: registry.surface_tags(),
      turn_config: TurnConfig::from_stream(&self.config.stream),
      config: Arc::new(self.config),
      registry,
      router,
      store,
    })
  }
}

/// Owns the tool stack and starts turns against it.
pub struct Engine {
  config: Arc<Config>,
  registry: Arc<ToolRegistry>,
  router: Arc<ToolRouter>,
  store: Arc<dyn ConversationStore>,
  parser: ToolCallParser,
  tags: Vec<String>,
  turn_config: TurnConfig,
}

impl Engine {
  pub fn builder(config: Config) -> EngineBuilder {
    EngineBuilder::new(config)
  }

  pub fn new(config: Config) -> anyhow::Result<Self> {
    EngineBuilder::new(config).build()
  }

  /// Executor wired to `sink`; use for turns driven in the caller's task.
  pub fn executor(&self, sink: EventSink) -> TurnExecutor {
    TurnExecutor::new(
      self.router.clone(),
      self.parser.clone(),
      self.tags.clone(),
      self.store.clone(),
      sink,
      self.turn_config.clone(),
    )
  }

  /// Spawns a turn over `upstream` and hands back its event receiver.
  pub fn start_turn<S, E>(&self, conversation_id: impl Into<String>, upstream: S) -> TurnHandle
  where
    S: Stream<Item = Result<String, E>> + Send + 'static,
    E: Display + Send + 'static,
  {
    let conversation_id = conversation_id.into();
    let message_id = generate_message_id();
    let (sink, events) = EventSink::channel(self.config.stream.channel_capacity);
    let executor = self.executor(sink);

    let turn_message_id = message_id.clone();
    let join = tokio::spawn(async move {
      executor
        .run(&conversation_id, &turn_message_id, upstream)
        .await
    });

    TurnHandle {
      message_id,
      events,
      join,
    }
  }

  /// Destroys the conversation's sandbox, if any.
  pub async fn teardown(&self, conversation_id: &str) -> Result<bool, SandboxError> {
    self.router.teardown(conversation_id).await
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn registry(&self) -> Arc<ToolRegistry> {
    self.registry.clone()
  }

  pub fn router(&self) -> Arc<ToolRouter> {
    self.router.clone()
  }

  pub fn store(&self) -> Arc<dyn ConversationStore> {
    self.store.clone()
  }
}
