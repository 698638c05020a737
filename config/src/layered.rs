// Layered Configuration
// Raw TOML layers merged with precedence

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Layered configuration wrapper
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayeredConfig {
  /// Configuration layers, lowest precedence first
  layers: Vec<ConfigLayer>,
}

/// Configuration layer with source tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigLayer {
  /// Layer source
  pub source: ConfigLayerSource,
  /// Configuration values
  pub values: toml::Value,
}

/// Configuration layer source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigLayerSource {
  /// Built-in defaults
  Default,
  /// Global user config
  GlobalConfig(PathBuf),
  /// Project-specific config
  ProjectConfig(PathBuf),
  /// CLI override
  CliOverride,
}

impl LayeredConfig {
  /// Create a new layered configuration
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a layer on top of the existing ones
  pub fn add_layer(&mut self, layer: ConfigLayer) {
    self.layers.push(layer);
  }

  pub fn layers(&self) -> &[ConfigLayer] {
    &self.layers
  }

  /// Deep-merge every layer; later layers win key by key.
  pub fn merge(&self) -> toml::Value {
    let mut merged = toml::Value::Table(toml::map::Map::new());
    for layer in &self.layers {
      merge_value(&mut merged, &layer.values);
    }
    merged
  }
}

fn merge_value(base: &mut toml::Value, overlay: &toml::Value) {
  match (base, overlay) {
    (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
      for (key, value) in overlay_table {
        match base_table.get_mut(key) {
          Some(existing) => merge_value(existing, value),
          None => {
            base_table.insert(key.clone(), value.clone());
          }
        }
      }
    }
    (base, overlay) => *base = overlay.clone(),
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn layer(source: ConfigLayerSource, text: &str) -> ConfigLayer {
    ConfigLayer {
      source,
      values: toml::from_str(text).expect("layer toml"),
    }
  }

  #[test]
  fn nested_tables_merge_instead_of_replacing() {
    let mut layered = LayeredConfig::new();
    layered.add_layer(layer(
      ConfigLayerSource::Default,
      "[security]\ndefault_timeout_ms = 30000\nmax_timeout_ms = 300000\n",
    ));
    layered.add_layer(layer(
      ConfigLayerSource::CliOverride,
      "[security]\ndefault_timeout_ms = 1000\n",
    ));

    let merged = layered.merge();
    let security = merged
      .get("security")
      .and_then(toml::Value::as_table)
      .expect("security table");
    assert_eq!(security.get("default_timeout_ms"), Some(&toml::Value::Integer(1000)));
    assert_eq!(security.get("max_timeout_ms"), Some(&toml::Value::Integer(300_000)));
  }

  #[test]
  fn arrays_are_replaced_wholesale() {
    let mut layered = LayeredConfig::new();
    layered.add_layer(layer(
      ConfigLayerSource::Default,
      "[security]\nallowed_commands = [\"ls\", \"cat\"]\n",
    ));
    layered.add_layer(layer(
      ConfigLayerSource::ProjectConfig(PathBuf::from(".nexus/config.toml")),
      "[security]\nallowed_commands = [\"echo\"]\n",
    ));

    let merged = layered.merge();
    let allowed = merged["security"]["allowed_commands"]
      .as_array()
      .expect("allowed array");
    assert_eq!(allowed, &vec![toml::Value::String("echo".to_string())]);
  }
}
