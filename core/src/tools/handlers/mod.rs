pub mod create_file;
pub mod delete_file;
pub mod execute_command;
pub mod list_files;
pub mod read_file;
pub mod sandbox;
pub mod str_replace;
pub mod web_scrape;
pub mod web_search;

use std::sync::Arc;

use nexus_config::Config;

use crate::tools::registry::{RegistryError, ToolRegistry};
use crate::tools::spec;

pub fn register_builtin_tools(registry: &mut ToolRegistry, config: &Config) -> Result<(), RegistryError> {
  let runner = execute_command::CommandRunner::new(&config.security);
  let max_file_bytes = config.workspace.max_file_bytes;

  registry.register_tool(
    spec::create_file_tool(),
    Arc::new(create_file::CreateFileHandler::new(max_file_bytes)),
  )?;
  registry.register_tool(
    spec::execute_command_tool(),
    Arc::new(execute_command::ExecuteCommandHandler::new(runner.clone())),
  )?;
  registry.register_tool(
    spec::web_search_tool(),
    Arc::new(web_search::WebSearchHandler::from_config(&config.web_search)),
  )?;
  registry.register_tool(
    spec::sandbox_tool(),
    Arc::new(sandbox::SandboxHandler::new(runner, max_file_bytes)),
  )?;
  registry.register_tool(spec::delete_file_tool(), Arc::new(delete_file::DeleteFileHandler))?;
  registry.register_tool(spec::list_files_tool(), Arc::new(list_files::ListFilesHandler))?;
  registry.register_tool(
    spec::read_file_tool(),
    Arc::new(read_file::ReadFileHandler::new(max_file_bytes)),
  )?;
  registry.register_tool(
    spec::str_replace_tool(),
    Arc::new(str_replace::StrReplaceHandler::new(max_file_bytes)),
  )?;
  registry.register_tool(
    spec::web_scrape_tool(),
    Arc::new(web_scrape::WebScrapeHandler::new(&config.web_scrape)),
  )?;
  Ok(())
}
