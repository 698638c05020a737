// Sandboxing
// Per-conversation workspaces and the lock that serializes tool access to them

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::resource::ResourceInit;

/// Provider-side state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
  Running,
  Stopped,
  Missing,
}

/// A provisioned workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxInfo {
  pub id: String,
  pub conversation_id: String,
  pub root: PathBuf,
}

#[derive(Debug, Error)]
pub enum SandboxError {
  #[error("sandbox {0} not found")]
  NotFound(String),

  #[error("sandbox provider unavailable: {0}")]
  Unavailable(String),

  #[error("sandbox io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Backend that owns sandbox lifecycles.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
  async fn create(&self, conversation_id: &str) -> Result<SandboxInfo, SandboxError>;

  async fn status(&self, sandbox_id: &str) -> Result<SandboxState, SandboxError>;

  async fn start(&self, sandbox_id: &str) -> Result<SandboxInfo, SandboxError>;

  async fn stop(&self, sandbox_id: &str) -> Result<(), SandboxError>;

  async fn destroy(&self, sandbox_id: &str) -> Result<(), SandboxError>;
}

struct LocalSandbox {
  info: SandboxInfo,
  state: SandboxState,
}

/// One directory per conversation under a shared root.
pub struct LocalSandboxProvider {
  root: PathBuf,
  bootstrap: ResourceInit<PathBuf>,
  sandboxes: Mutex<HashMap<String, LocalSandbox>>,
}

impl LocalSandboxProvider {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      bootstrap: ResourceInit::new(),
      sandboxes: Mutex::new(HashMap::new()),
    }
  }

  async fn ensure_root(&self) -> Result<PathBuf, SandboxError> {
    let root = self.root.clone();
    self
      .bootstrap
      .get_or_init(|| async move {
        tokio::fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "workspace root ready");
        Ok::<_, std::io::Error>(root)
      })
      .await
      .map_err(|err| SandboxError::Unavailable(err.to_string()))
  }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
  async fn create(&self, conversation_id: &str) -> Result<SandboxInfo, SandboxError> {
    let root = self.ensure_root().await?;
    let id = format!("local-{}", uuid::Uuid::new_v4());
    let dir = root.join(directory_name(conversation_id)).join(&id);
    tokio::fs::create_dir_all(&dir).await?;

    let info = SandboxInfo {
      id: id.clone(),
      conversation_id: conversation_id.to_string(),
      root: dir,
    };
    self.sandboxes.lock().await.insert(
      id,
      LocalSandbox {
        info: info.clone(),
        state: SandboxState::Running,
      },
    );
    Ok(info)
  }

  async fn status(&self, sandbox_id: &str) -> Result<SandboxState, SandboxError> {
    let sandboxes = self.sandboxes.lock().await;
    Ok(
      sandboxes
        .get(sandbox_id)
        .map(|sandbox| sandbox.state)
        .unwrap_or(SandboxState::Missing),
    )
  }

  async fn start(&self, sandbox_id: &str) -> Result<SandboxInfo, SandboxError> {
    let mut sandboxes = self.sandboxes.lock().await;
    let sandbox = sandboxes
      .get_mut(sandbox_id)
      .ok_or_else(|| SandboxError::NotFound(sandbox_id.to_string()))?;
    tokio::fs::create_dir_all(&sandbox.info.root).await?;
    sandbox.state = SandboxState::Running;
    Ok(sandbox.info.clone())
  }

  async fn stop(&self, sandbox_id: &str) -> Result<(), SandboxError> {
    let mut sandboxes = self.sandboxes.lock().await;
    let sandbox = sandboxes
      .get_mut(sandbox_id)
      .ok_or_else(|| SandboxError::NotFound(sandbox_id.to_string()))?;
    sandbox.state = SandboxState::Stopped;
    Ok(())
  }

  async fn destroy(&self, sandbox_id: &str) -> Result<(), SandboxError> {
    let removed = self.sandboxes.lock().await.remove(sandbox_id);
    let Some(sandbox) = removed else {
      return Err(SandboxError::NotFound(sandbox_id.to_string()));
    };
    match tokio::fs::remove_dir_all(&sandbox.info.root).await {
      Ok(()) => Ok(()),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(err) => Err(err.into()),
    }
  }
}

fn directory_name(conversation_id: &str) -> String {
  let cleaned: String = conversation_id
    .chars()
    .map(|ch| {
      if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
        ch
      } else {
        '_'
      }
    })
    .collect();
  if cleaned.is_empty() {
    "conversation".to_string()
  } else {
    cleaned
  }
}

/// State behind one conversation's lock. A slot is `retired` once it has
/// left the manager's map; tasks that were queued on it look the
/// conversation up again instead of using it.
#[derive(Debug, Default)]
pub struct SlotState {
  sandbox: Option<SandboxInfo>,
  retired: bool,
}

type Slot = Arc<Mutex<SlotState>>;

/// Exclusive access to one conversation's sandbox slot. Held for the whole
/// tool execution.
pub type SandboxGuard = OwnedMutexGuard<SlotState>;

/// Lazily provisions and serializes access to per-conversation sandboxes.
pub struct SandboxManager {
  provider: Arc<dyn SandboxProvider>,
  slots: Mutex<HashMap<String, Slot>>,
}

impl SandboxManager {
  pub fn new(provider: Arc<dyn SandboxProvider>) -> Self {
    Self {
      provider,
      slots: Mutex::new(HashMap::new()),
    }
  }

  /// Waits until no other tool holds this conversation.
  pub async fn lock(&self, conversation_id: &str) -> SandboxGuard {
    loop {
      let slot = {
        let mut slots = self.slots.lock().await;
        evict_idle(&mut slots);
        slots
          .entry(conversation_id.to_string())
          .or_default()
          .clone()
      };
      let guard = slot.lock_owned().await;
      if !guard.retired {
        return guard;
      }
      debug!(conversation_id, "sandbox slot retired while waiting; retrying");
    }
  }

  /// Reuses a running sandbox, restarts a stopped one, creates one otherwise.
  pub async fn ensure(
    &self,
    conversation_id: &str,
    guard: &mut SandboxGuard,
  ) -> Result<SandboxInfo, SandboxError> {
    if let Some(existing) = guard.sandbox.as_ref() {
      match self.provider.status(&existing.id).await? {
        SandboxState::Running => return Ok(existing.clone()),
        SandboxState::Stopped => {
          info!(conversation_id, sandbox_id = %existing.id, "restarting stopped sandbox");
          let started = self.provider.start(&existing.id).await?;
          guard.sandbox = Some(started.clone());
          return Ok(started);
        }
        SandboxState::Missing => {
          info!(conversation_id, sandbox_id = %existing.id, "sandbox vanished; recreating");
        }
      }
    }

    let created = self.provider.create(conversation_id).await?;
    info!(conversation_id, sandbox_id = %created.id, root = %created.root.display(), "created sandbox");
    guard.sandbox = Some(created.clone());
    Ok(created)
  }

  /// Current sandbox of a conversation, if one was provisioned.
  pub async fn active(&self, conversation_id: &str) -> Option<SandboxInfo> {
    self.lock(conversation_id).await.sandbox.clone()
  }

  /// Destroys the conversation's sandbox. Returns whether one existed.
  ///
  /// The slot is retired and unmapped before its lock is released, so a
  /// task already queued on it starts over on a fresh slot shared with
  /// every later caller.
  pub async fn teardown(&self, conversation_id: &str) -> Result<bool, SandboxError> {
    let mut guard = self.lock(conversation_id).await;
    let Some(existing) = guard.sandbox.take() else {
      return Ok(false);
    };
    self.provider.destroy(&existing.id).await?;
    info!(conversation_id, sandbox_id = %existing.id, "sandbox torn down");

    guard.retired = true;
    let mut slots = self.slots.lock().await;
    if slots
      .get(conversation_id)
      .is_some_and(|slot| Arc::ptr_eq(slot, OwnedMutexGuard::mutex(&guard)))
    {
      slots.remove(conversation_id);
    }
    drop(slots);
    drop(guard);
    Ok(true)
  }

  #[cfg(test)]
  async fn slot_count(&self) -> usize {
    self.slots.lock().await.len()
  }
}

/// Drops slots nobody holds or waits on and that have no sandbox. Only the
/// map owns such a slot, and it is only cloned under the map lock.
fn evict_idle(slots: &mut HashMap<String, Slot>) {
  slots.retain(|_, slot| {
    Arc::strong_count(slot) > 1
      || slot
        .try_lock()
        .map_or(true, |state| state.sandbox.is_some())
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  fn manager(root: &std::path::Path) -> (Arc<LocalSandboxProvider>, SandboxManager) {
    let provider = Arc::new(LocalSandboxProvider::new(root.join("workspaces")));
    let manager = SandboxManager::new(provider.clone());
    (provider, manager)
  }

  #[tokio::test]
  async fn sandbox_is_created_once_and_reused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_provider, manager) = manager(dir.path());

    let first = {
      let mut guard = manager.lock("conv-1").await;
      manager.ensure("conv-1", &mut guard).await.expect("create")
    };
    let second = {
      let mut guard = manager.lock("conv-1").await;
      manager.ensure("conv-1", &mut guard).await.expect("reuse")
    };

    assert_eq!(first, second);
    assert!(first.root.is_dir());
    assert!(first.root.starts_with(dir.path().join("workspaces")));
  }

  #[tokio::test]
  async fn stopped_sandbox_is_restarted_not_replaced() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (provider, manager) = manager(dir.path());

    let created = {
      let mut guard = manager.lock("conv-1").await;
      manager.ensure("conv-1", &mut guard).await.expect("create")
    };
    provider.stop(&created.id).await.expect("stop");
    assert_eq!(
      provider.status(&created.id).await.expect("status"),
      SandboxState::Stopped
    );

    let restarted = {
      let mut guard = manager.lock("conv-1").await;
      manager.ensure("conv-1", &mut guard).await.expect("restart")
    };
    assert_eq!(restarted.id, created.id);
    assert_eq!(
      provider.status(&created.id).await.expect("status"),
      SandboxState::Running
    );
  }

  #[tokio::test]
  async fn conversations_get_isolated_sandboxes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_provider, manager) = manager(dir.path());

    let a = {
      let mut guard = manager.lock("conv-a").await;
      manager.ensure("conv-a", &mut guard).await.expect("a")
    };
    let b = {
      let mut guard = manager.lock("conv-b").await;
      manager.ensure("conv-b", &mut guard).await.expect("b")
    };

    assert_ne!(a.id, b.id);
    assert!(!a.root.starts_with(&b.root) && !b.root.starts_with(&a.root));
  }

  #[tokio::test]
  async fn teardown_destroys_and_next_use_recreates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (provider, manager) = manager(dir.path());

    let created = {
      let mut guard = manager.lock("conv-1").await;
      manager.ensure("conv-1", &mut guard).await.expect("create")
    };
    assert!(manager.teardown("conv-1").await.expect("teardown"));
    assert!(!created.root.exists());
    assert_eq!(
      provider.status(&created.id).await.expect("status"),
      SandboxState::Missing
    );
    assert!(!manager.teardown("conv-1").await.expect("second teardown"));

    let recreated = {
      let mut guard = manager.lock("conv-1").await;
      manager.ensure("conv-1", &mut guard).await.expect("recreate")
    };
    assert_ne!(recreated.id, created.id);
  }

  #[test]
  fn conversation_ids_become_safe_directory_names() {
    assert_eq!(directory_name("../../etc"), "______etc");
    assert_eq!(directory_name("conv-1_a"), "conv-1_a");
    assert_eq!(directory_name(""), "conversation");
  }

  #[tokio::test]
  async fn queued_call_during_teardown_shares_the_next_sandbox() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (provider, manager) = manager(dir.path());
    let manager = Arc::new(manager);

    let original = {
      let mut guard = manager.lock("conv-1").await;
      manager.ensure("conv-1", &mut guard).await.expect("create")
    };

    let busy = manager.lock("conv-1").await;
    let teardown = tokio::spawn({
      let manager = manager.clone();
      async move { manager.teardown("conv-1").await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let queued = tokio::spawn({
      let manager = manager.clone();
      async move {
        let mut guard = manager.lock("conv-1").await;
        manager.ensure("conv-1", &mut guard).await
      }
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    drop(busy);

    assert!(teardown.await.expect("join").expect("teardown"));
    let queued = queued.await.expect("join").expect("queued ensure");
    assert_ne!(queued.id, original.id);

    let later = {
      let mut guard = manager.lock("conv-1").await;
      manager.ensure("conv-1", &mut guard).await.expect("later ensure")
    };
    assert_eq!(later.id, queued.id);
    assert_eq!(
      provider.status(&original.id).await.expect("status"),
      SandboxState::Missing
    );
    assert_eq!(manager.slot_count().await, 1);
  }

  #[tokio::test]
  async fn idle_slots_without_sandbox_are_evicted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_provider, manager) = manager(dir.path());

    let kept = {
      let mut guard = manager.lock("conv-keep").await;
      manager.ensure("conv-keep", &mut guard).await.expect("create")
    };
    for index in 0..20 {
      drop(manager.lock(&format!("conv-{index}")).await);
    }
    drop(manager.lock("conv-last").await);

    // The provisioned slot and the one just released remain.
    assert_eq!(manager.slot_count().await, 2);
    assert_eq!(manager.active("conv-keep").await, Some(kept));
  }
}
