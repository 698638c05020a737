use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::tools::context::{ToolCall, ToolCallError, ToolContext, ToolOutput};
use crate::tools::spec::{BodyMode, ToolSpec};

#[async_trait]
pub trait ToolHandler: Send + Sync {
  async fn handle(&self, call: ToolCall, ctx: &ToolContext) -> Result<ToolOutput, ToolCallError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
  #[error("tool `{0}` is already registered")]
  DuplicateTool(String),
  #[error("tag `{tag}` is already mapped to `{existing}`")]
  DuplicateTag { tag: String, existing: String },
}

/// A spec paired with the handler that executes it.
#[derive(Clone)]
pub struct RegisteredTool {
  pub spec: ToolSpec,
  pub handler: Arc<dyn ToolHandler>,
}

/// Closed set of tools plus the surface-tag table that points at them.
#[derive(Default)]
pub struct ToolRegistry {
  tools: BTreeMap<String, RegisteredTool>,
  tags: HashMap<String, String>,
}

impl ToolRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register_tool(
    &mut self,
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
  ) -> Result<(), RegistryError> {
    if self.tools.contains_key(&spec.name) {
      return Err(RegistryError::DuplicateTool(spec.name));
    }
    for tag in &spec.surface_tags {
      if let Some(existing) = self.tags.get(tag) {
        return Err(RegistryError::DuplicateTag {
          tag: tag.clone(),
          existing: existing.clone(),
        });
      }
    }

    for tag in &spec.surface_tags {
      self.tags.insert(tag.clone(), spec.name.clone());
    }
    self
      .tools
      .insert(spec.name.clone(), RegisteredTool { spec, handler });
    Ok(())
  }

  pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
    self.tools.get(name)
  }

  pub fn get_spec(&self, name: &str) -> Option<&ToolSpec> {
    self.tools.get(name).map(|tool| &tool.spec)
  }

  /// Internal tool name a surface tag maps to.
  pub fn resolve_tag(&self, tag: &str) -> Option<&str> {
    self.tags.get(tag).map(String::as_str)
  }

  /// Every recognized surface tag.
  pub fn surface_tags(&self) -> Vec<String> {
    let mut tags: Vec<String> = self.tags.keys().cloned().collect();
    tags.sort();
    tags
  }

  pub fn tag_body_modes(&self) -> Vec<(String, BodyMode)> {
    self
      .tags
      .iter()
      .filter_map(|(tag, name)| {
        self
          .tools
          .get(name)
          .map(|tool| (tag.clone(), tool.spec.body))
      })
      .collect()
  }

  pub fn list_specs(&self) -> Vec<ToolSpec> {
    self.tools.values().map(|tool| tool.spec.clone()).collect()
  }

  /// Plain-text usage guide for every registered tool.
  pub fn documentation(&self) -> String {
    let mut doc = String::new();
    for tool in self.tools.values() {
      let spec = &tool.spec;
      doc.push_str(&format!("## {}\n{}\n", spec.canonical_tag(), spec.description));
      doc.push_str(&format!("Usage: {}\n", spec.usage_example()));
      if spec.surface_tags.len() > 1 {
        doc.push_str(&format!("Aliases: {}\n", spec.surface_tags[1..].join(", ")));
      }
      doc.push('\n');
    }
    doc
  }
}
