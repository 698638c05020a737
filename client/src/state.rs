use serde::{Deserialize, Serialize};

/// Lifecycle of one consumer run.
///
/// `idle -> connecting -> streaming -> (processing_tool <-> streaming)* -> completed`,
/// with `error` reachable from anywhere. `completed` and `error` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
  #[default]
  Idle,
  Connecting,
  Streaming,
  ProcessingTool,
  Completed,
  Error,
}

impl StreamStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, StreamStatus::Completed | StreamStatus::Error)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      StreamStatus::Idle => "idle",
      StreamStatus::Connecting => "connecting",
      StreamStatus::Streaming => "streaming",
      StreamStatus::ProcessingTool => "processing_tool",
      StreamStatus::Completed => "completed",
      StreamStatus::Error => "error",
    }
  }
}

impl std::fmt::Display for StreamStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_serializes_snake_case() {
    assert_eq!(
      serde_json::to_string(&StreamStatus::ProcessingTool).ok().as_deref(),
      Some("\"processing_tool\"")
    );
    assert!(StreamStatus::Error.is_terminal());
    assert!(!StreamStatus::Streaming.is_terminal());
  }
}
