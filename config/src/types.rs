// Configuration Types
// All configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Workspace (sandbox root) settings
  pub workspace: WorkspaceConfig,
  /// Command execution policy
  pub security: SecurityConfig,
  /// Web search provider settings
  pub web_search: WebSearchConfig,
  /// Page fetch settings for `web-scrape`
  pub web_scrape: WebScrapeConfig,
  /// Event stream settings
  pub stream: StreamConfig,
}

// ============================================================================
// WORKSPACE
// ============================================================================

/// Workspace settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
  /// Directory holding one sandbox per conversation
  pub root: PathBuf,
  /// Largest file the file tools will write
  pub max_file_bytes: u64,
}

impl Default for WorkspaceConfig {
  fn default() -> Self {
    Self {
      root: std::env::temp_dir().join("nexus-workspaces"),
      max_file_bytes: 10 * 1024 * 1024,
    }
  }
}

// ============================================================================
// SECURITY
// ============================================================================

/// Command execution policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
  /// Programs a command may start with
  pub allowed_commands: Vec<String>,
  /// Substrings that reject a command outright
  pub blocked_patterns: Vec<String>,
  /// Programs rejected unless the invocation asks for network access
  pub network_only_commands: Vec<String>,
  /// Programs whose arguments may not be absolute or contain `..`
  pub path_confined_commands: Vec<String>,
  /// Timeout used when the invocation gives none
  pub default_timeout_ms: u64,
  /// Lower timeout clamp
  pub min_timeout_ms: u64,
  /// Upper timeout clamp
  pub max_timeout_ms: u64,
  /// Captured output cap per stream
  pub max_output_bytes: usize,
}

impl Default for SecurityConfig {
  fn default() -> Self {
    Self {
      allowed_commands: to_strings(&[
        "python", "python3", "node", "npm", "pip", "pip3", "ls", "cat", "mkdir", "cp", "mv",
        "wget", "curl", "git", "echo", "date", "wc", "grep", "sort", "head", "tail",
      ]),
      blocked_patterns: to_strings(&[";", "|", "&", "$(", "`", ">", "<", "\n"]),
      network_only_commands: to_strings(&["curl", "wget"]),
      path_confined_commands: to_strings(&["cp", "mv", "mkdir"]),
      default_timeout_ms: 30_000,
      min_timeout_ms: 1_000,
      max_timeout_ms: 300_000,
      max_output_bytes: 1024 * 1024,
    }
  }
}

// ============================================================================
// WEB SEARCH
// ============================================================================

/// Web search provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
  /// Provider base URL; `/search` is appended
  pub base_url: String,
  /// Environment variable holding the API key
  pub api_key_env: String,
  /// Inline API key; takes precedence over `api_key_env`
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub api_key: Option<String>,
  /// Result count when the invocation gives none
  pub default_max_results: u32,
  /// Request timeout
  pub timeout_ms: u64,
  /// Domains favored for `search_type = "financial"`
  pub financial_domains: Vec<String>,
  /// Domains favored for `search_type = "news"`
  pub news_domains: Vec<String>,
  /// Domains always excluded
  pub excluded_domains: Vec<String>,
}

impl Default for WebSearchConfig {
  fn default() -> Self {
    Self {
      base_url: "https://api.tavily.com".to_string(),
      api_key_env: "TAVILY_API_KEY".to_string(),
      api_key: None,
      default_max_results: 5,
      timeout_ms: 15_000,
      financial_domains: to_strings(&[
        "bloomberg.com",
        "reuters.com",
        "marketwatch.com",
        "yahoo.com",
        "investing.com",
        "wsj.com",
        "cnbc.com",
        "seekingalpha.com",
        "morningstar.com",
        "sec.gov",
        "federalreserve.gov",
      ]),
      news_domains: to_strings(&[
        "reuters.com",
        "bloomberg.com",
        "cnbc.com",
        "bbc.com",
        "cnn.com",
        "wsj.com",
        "ft.com",
      ]),
      excluded_domains: to_strings(&["reddit.com", "pinterest.com", "instagram.com"]),
    }
  }
}

// ============================================================================
// WEB SCRAPE
// ============================================================================

/// Page fetch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebScrapeConfig {
  /// Request timeout
  pub timeout_ms: u64,
  /// Extracted text beyond this many characters is cut
  pub max_content_chars: usize,
  /// Value of the `User-Agent` header
  pub user_agent: String,
}

impl Default for WebScrapeConfig {
  fn default() -> Self {
    Self {
      timeout_ms: 15_000,
      max_content_chars: 20_000,
      user_agent: concat!("nexus/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

// ============================================================================
// STREAM
// ============================================================================

/// Event stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
  /// Keepalive interval while a turn is in flight
  pub ping_interval_ms: u64,
  /// Buffered events per consumer channel
  pub channel_capacity: usize,
}

impl Default for StreamConfig {
  fn default() -> Self {
    Self {
      ping_interval_ms: 15_000,
      channel_capacity: 256,
    }
  }
}

fn to_strings(items: &[&str]) -> Vec<String> {
  items.iter().map(|item| (*item).to_string()).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_sections_fall_back_to_defaults() {
    let config: Config = toml::from_str(
      r#"
      [security]
      default_timeout_ms = 5000
      "#,
    )
    .expect("parse partial config");

    assert_eq!(config.security.default_timeout_ms, 5000);
    assert_eq!(config.security.max_timeout_ms, 300_000);
    assert!(config.security.allowed_commands.contains(&"git".to_string()));
    assert_eq!(config.stream, StreamConfig::default());
    assert_eq!(config.web_scrape, WebScrapeConfig::default());
    assert_eq!(config.security.path_confined_commands, vec!["cp", "mv", "mkdir"]);
  }
}
