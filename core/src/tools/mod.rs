pub mod context;
pub mod handlers;
pub mod registry;
pub mod router;
pub mod sandboxing;
pub mod spec;
pub mod validation;

use std::sync::Arc;

use nexus_config::Config;

use crate::stream::ToolCallParser;
use crate::tools::registry::{RegistryError, ToolRegistry};
use crate::tools::router::ToolRouter;
use crate::tools::sandboxing::{SandboxManager, SandboxProvider};
use crate::tools::validation::ToolValidator;

/// Build the built-in tool registry and a router over it.
pub fn build_default_tools(
  config: &Config,
  sandbox_provider: Arc<dyn SandboxProvider>,
) -> Result<(Arc<ToolRegistry>, Arc<ToolRouter>), RegistryError> {
  let mut registry = ToolRegistry::new();
  handlers::register_builtin_tools(&mut registry, config)?;

  let registry = Arc::new(registry);
  let validator = Arc::new(ToolValidator::new(&config.security));
  let sandboxes = Arc::new(SandboxManager::new(sandbox_provider));
  let router = Arc::new(ToolRouter::new(registry.clone(), validator, sandboxes));

  Ok((registry, router))
}

/// Parser whose body handling follows each registered tag's spec.
pub fn parser_for(registry: &ToolRegistry) -> ToolCallParser {
  registry
    .tag_body_modes()
    .into_iter()
    .fold(ToolCallParser::new(), |parser, (tag, mode)| {
      parser.with_body_mode(tag, mode)
    })
}
