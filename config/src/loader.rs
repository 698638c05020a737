// Configuration Loader
// Layered configuration loading system

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::layered::{ConfigLayer, ConfigLayerSource, LayeredConfig};
use crate::types::Config;

const CONFIG_DIR: &str = ".nexus";
const CONFIG_FILE: &str = "config.toml";

/// Configuration errors surfaced to callers
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("override must look like key=value, got `{0}`")]
  MalformedOverride(String),

  #[error("unknown config key: {0}")]
  UnknownKey(String),

  #[error("invalid configuration: {0}")]
  Invalid(String),
}

/// Configuration loader with layered support
pub struct ConfigLoader {
  /// Global config directory
  global_dir: Option<PathBuf>,
  /// Project root; its `.nexus/config.toml` is the project layer
  project_dir: Option<PathBuf>,
}

impl ConfigLoader {
  /// Create a new configuration loader rooted at `~/.nexus`
  pub fn new() -> Self {
    Self {
      global_dir: dirs::home_dir().map(|home| home.join(CONFIG_DIR)),
      project_dir: None,
    }
  }

  /// Replace the global config directory
  pub fn with_global_dir(mut self, dir: PathBuf) -> Self {
    self.global_dir = Some(dir);
    self
  }

  /// Set project directory
  pub fn with_project_dir(mut self, dir: PathBuf) -> Self {
    self.project_dir = Some(dir);
    self
  }

  /// Load configuration with CLI overrides
  pub fn load_with_cli_overrides(&self, cli_overrides: Vec<(String, String)>) -> Result<Config> {
    let layered = self.load_layers(cli_overrides)?;
    let merged = layered.merge();
    let config: Config = merged
      .try_into()
      .context("merged configuration does not match the expected schema")?;
    validate(&config)?;
    Ok(config)
  }

  /// Collect every layer in precedence order:
  /// 1. Built-in defaults
  /// 2. Global config (~/.nexus/config.toml)
  /// 3. Project config (.nexus/config.toml)
  /// 4. CLI overrides
  pub fn load_layers(&self, cli_overrides: Vec<(String, String)>) -> Result<LayeredConfig> {
    let defaults =
      toml::Value::try_from(Config::default()).context("failed to serialize default config")?;

    let mut layered = LayeredConfig::new();
    layered.add_layer(ConfigLayer {
      source: ConfigLayerSource::Default,
      values: defaults.clone(),
    });

    if let Some(global_dir) = &self.global_dir {
      let path = global_dir.join(CONFIG_FILE);
      if let Some(values) = read_layer(&path)? {
        layered.add_layer(ConfigLayer {
          source: ConfigLayerSource::GlobalConfig(path),
          values,
        });
      }
    }

    if let Some(project_dir) = &self.project_dir {
      let path = project_dir.join(CONFIG_DIR).join(CONFIG_FILE);
      if let Some(values) = read_layer(&path)? {
        layered.add_layer(ConfigLayer {
          source: ConfigLayerSource::ProjectConfig(path),
          values,
        });
      }
    }

    for (key, value) in cli_overrides {
      if lookup(&defaults, &key).is_none() {
        return Err(ConfigError::UnknownKey(key).into());
      }
      layered.add_layer(ConfigLayer {
        source: ConfigLayerSource::CliOverride,
        values: override_layer(&key, &value),
      });
    }

    Ok(layered)
  }
}

impl Default for ConfigLoader {
  fn default() -> Self {
    Self::new()
  }
}

/// Split a `key=value` CLI override.
pub fn parse_override(raw: &str) -> Result<(String, String), ConfigError> {
  match raw.split_once('=') {
    Some((key, value)) if !key.trim().is_empty() => {
      Ok((key.trim().to_string(), value.trim().to_string()))
    }
    _ => Err(ConfigError::MalformedOverride(raw.to_string())),
  }
}

fn read_layer(path: &Path) -> Result<Option<toml::Value>> {
  if !path.exists() {
    debug!(path = %path.display(), "config layer not present");
    return Ok(None);
  }
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read {}", path.display()))?;
  let values: toml::Value =
    toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
  debug!(path = %path.display(), "loaded config layer");
  Ok(Some(values))
}

/// Values are parsed as TOML literals first (`5000`, `true`, `["ls"]`) and
/// fall back to plain strings.
fn override_layer(key: &str, raw_value: &str) -> toml::Value {
  let mut value = parse_literal(raw_value);
  for segment in key.rsplit('.') {
    let mut table = toml::map::Map::new();
    table.insert(segment.to_string(), value);
    value = toml::Value::Table(table);
  }
  value
}

fn parse_literal(raw: &str) -> toml::Value {
  let wrapped = format!("value = {raw}");
  toml::from_str::<toml::Table>(&wrapped)
    .ok()
    .and_then(|mut table| table.remove("value"))
    .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

fn lookup<'a>(root: &'a toml::Value, key: &str) -> Option<&'a toml::Value> {
  key
    .split('.')
    .try_fold(root, |node, segment| node.as_table()?.get(segment))
}

fn validate(config: &Config) -> Result<(), ConfigError> {
  let security = &config.security;
  if security.min_timeout_ms > security.max_timeout_ms {
    return Err(ConfigError::Invalid(format!(
      "security.min_timeout_ms ({}) exceeds security.max_timeout_ms ({})",
      security.min_timeout_ms, security.max_timeout_ms
    )));
  }
  if config.stream.channel_capacity == 0 {
    return Err(ConfigError::Invalid(
      "stream.channel_capacity must be at least 1".to_string(),
    ));
  }
  if config.stream.ping_interval_ms == 0 {
    return Err(ConfigError::Invalid(
      "stream.ping_interval_ms must be positive".to_string(),
    ));
  }
  Ok(())
}
