use std::path::{Component, Path};

use serde_json::Value;

use nexus_config::SecurityConfig;

use crate::tools::context::{ToolCall, ToolCallError};
use crate::tools::spec::ToolSpec;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
  #[error("missing required argument `{0}`")]
  MissingArgument(String),
  #[error("command is empty")]
  EmptyCommand,
  #[error("command has unbalanced quotes")]
  UnbalancedQuotes,
  #[error("command contains blocked pattern `{0}`")]
  BlockedPattern(String),
  #[error("Command '{0}' is not allowed")]
  NotAllowed(String),
  #[error("Command '{0}' needs network access; set network=\"true\" to allow it")]
  NetworkRequired(String),
  #[error("Command '{program}' may not reference `{argument}` outside the workspace")]
  PathOutsideWorkspace { program: String, argument: String },
}

impl From<ValidationError> for ToolCallError {
  fn from(value: ValidationError) -> Self {
    match value {
      ValidationError::MissingArgument(_)
      | ValidationError::EmptyCommand
      | ValidationError::UnbalancedQuotes => ToolCallError::Validation(value.to_string()),
      ValidationError::BlockedPattern(_)
      | ValidationError::NotAllowed(_)
      | ValidationError::NetworkRequired(_)
      | ValidationError::PathOutsideWorkspace { .. } => ToolCallError::Security(value.to_string()),
    }
  }
}

/// Allowlist / denylist policy for commands a tool may start.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
  allowed_commands: Vec<String>,
  blocked_patterns: Vec<String>,
  network_only_commands: Vec<String>,
  path_confined_commands: Vec<String>,
}

impl CommandPolicy {
  pub fn from_config(security: &SecurityConfig) -> Self {
    Self {
      allowed_commands: security.allowed_commands.clone(),
      blocked_patterns: security.blocked_patterns.clone(),
      network_only_commands: security.network_only_commands.clone(),
      path_confined_commands: security.path_confined_commands.clone(),
    }
  }

  /// Checks a command line and returns its argument vector. Nothing is
  /// executed here.
  pub fn check(&self, command: &str, allow_network: bool) -> Result<Vec<String>, ValidationError> {
    if let Some(pattern) = self
      .blocked_patterns
      .iter()
      .find(|pattern| !pattern.is_empty() && command.contains(pattern.as_str()))
    {
      return Err(ValidationError::BlockedPattern(pattern.escape_debug().to_string()));
    }

    let argv = split_command(command)?;
    let program = argv[0].as_str();

    if !self.is_allowed(program) {
      return Err(ValidationError::NotAllowed(program.to_string()));
    }
    if !allow_network && self.network_only_commands.iter().any(|cmd| cmd == program) {
      return Err(ValidationError::NetworkRequired(program.to_string()));
    }
    if self.path_confined_commands.iter().any(|cmd| cmd == program)
      && let Some(argument) = argv[1..].iter().find(|arg| leaves_workspace(arg))
    {
      return Err(ValidationError::PathOutsideWorkspace {
        program: program.to_string(),
        argument: argument.clone(),
      });
    }
    Ok(argv)
  }

  /// `python3.11` is accepted through a `python3` entry.
  fn is_allowed(&self, program: &str) -> bool {
    self.allowed_commands.iter().any(|allowed| {
      program == allowed.as_str()
        || program
          .strip_prefix(allowed.as_str())
          .and_then(|rest| rest.strip_prefix('.'))
          .is_some_and(|version| {
            !version.is_empty() && version.chars().all(|c| c.is_ascii_digit() || c == '.')
          })
    })
  }
}

/// True when an argument, or the value of `--opt=value` / `-tVALUE`, is
/// absolute, home-relative or climbs with `..`.
fn leaves_workspace(argument: &str) -> bool {
  let mut candidates = vec![argument];
  if let Some((_, value)) = argument.split_once('=') {
    candidates.push(value);
  }
  if let Some(short) = argument.strip_prefix('-')
    && !short.starts_with('-')
    && let Some((index, _)) = short.char_indices().nth(1)
  {
    candidates.push(&short[index..]);
  }
  candidates.into_iter().any(|candidate| {
    candidate.starts_with('~')
      || Path::new(candidate).components().any(|component| {
        matches!(
          component,
          Component::RootDir | Component::ParentDir | Component::Prefix(_)
        )
      })
  })
}

/// Shell-word tokenization without invoking a shell.
pub fn split_command(command: &str) -> Result<Vec<String>, ValidationError> {
  let argv = shlex::split(command).ok_or(ValidationError::UnbalancedQuotes)?;
  if argv.is_empty() {
    return Err(ValidationError::EmptyCommand);
  }
  Ok(argv)
}

/// Command text of a call: the `command` argument, else the tag body.
pub fn command_text(call: &ToolCall) -> Option<&str> {
  call.str_arg("command").or_else(|| call.str_arg("content"))
}

/// `action` argument in kebab case (`execute_command` -> `execute-command`).
pub fn normalized_action(call: &ToolCall) -> Option<String> {
  call
    .str_arg("action")
    .map(|action| action.to_ascii_lowercase().replace('_', "-"))
}

/// Calls without an `action` are plain command tools.
fn runs_command(call: &ToolCall) -> bool {
  normalized_action(call).is_none_or(|action| action == "execute-command")
}

pub struct ToolValidator {
  policy: CommandPolicy,
}

impl ToolValidator {
  pub fn new(security: &SecurityConfig) -> Self {
    Self {
      policy: CommandPolicy::from_config(security),
    }
  }

  pub fn policy(&self) -> &CommandPolicy {
    &self.policy
  }

  /// Required arguments first, then the command policy for tools that run
  /// commands.
  pub fn validate_tool_call(&self, spec: &ToolSpec, call: &ToolCall) -> Result<(), ToolCallError> {
    for required in spec.required_arguments() {
      if is_blank(call.arguments.get(required)) {
        return Err(ValidationError::MissingArgument(required.clone()).into());
      }
    }

    if spec.executes_commands
      && runs_command(call)
      && let Some(command) = command_text(call)
    {
      self.policy.check(command, call.flag("network"))?;
    }
    Ok(())
  }
}

fn is_blank(value: Option<&Value>) -> bool {
  match value {
    None | Some(Value::Null) => true,
    Some(Value::String(text)) => text.trim().is_empty(),
    Some(_) => false,
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;
  use crate::tools::spec::{execute_command_tool, web_search_tool};

  fn policy() -> CommandPolicy {
    CommandPolicy::from_config(&SecurityConfig::default())
  }

  #[test]
  fn metacharacters_are_rejected_before_tokenizing() {
    for command in [
      "ls; rm -rf /",
      "cat a | grep b",
      "ls && echo hi",
      "echo `id`",
      "echo $(id)",
      "echo hi > out.txt",
      "sort < in.txt",
      "ls\nrm x",
    ] {
      assert!(
        matches!(policy().check(command, true), Err(ValidationError::BlockedPattern(_))),
        "{command:?} should be blocked"
      );
    }
  }

  #[test]
  fn only_allowlisted_programs_run() {
    assert_eq!(
      policy().check("ls -la 'my dir'", false).expect("ls allowed"),
      vec!["ls".to_string(), "-la".to_string(), "my dir".to_string()]
    );
    assert_eq!(
      policy().check("rm -rf build", false),
      Err(ValidationError::NotAllowed("rm".to_string()))
    );
    assert!(policy().check("python3.11 -V", false).is_ok());
    assert!(policy().check("python3x -V", false).is_err());
    assert!(policy().check("/bin/ls", false).is_err());
  }

  #[test]
  fn network_programs_need_explicit_opt_in() {
    assert_eq!(
      policy().check("curl https://example.com", false),
      Err(ValidationError::NetworkRequired("curl".to_string()))
    );
    assert!(policy().check("curl https://example.com", true).is_ok());
  }

  #[test]
  fn file_commands_cannot_reach_outside_the_workspace() {
    for command in [
      "cp -s /tmp/victim.txt link.txt",
      "cp notes.txt ../escaped.txt",
      "mv report.md --target-directory=/etc",
      "mv -t/tmp report.md",
      "mkdir -p ~/cache",
    ] {
      assert!(
        matches!(
          policy().check(command, false),
          Err(ValidationError::PathOutsideWorkspace { .. })
        ),
        "{command:?} should be rejected"
      );
    }
    assert!(policy().check("cp -r src backup/src", false).is_ok());
    assert!(policy().check("mkdir -p reports/q3", false).is_ok());
    assert!(policy().check("cat /etc/hostname", false).is_ok());
    assert!(matches!(
      ToolCallError::from(ValidationError::PathOutsideWorkspace {
        program: "cp".to_string(),
        argument: "/tmp/x".to_string(),
      }),
      ToolCallError::Security(_)
    ));
  }

  #[test]
  fn unbalanced_quotes_fail_validation() {
    assert_eq!(
      policy().check("echo 'oops", false),
      Err(ValidationError::UnbalancedQuotes)
    );
  }

  #[test]
  fn validator_checks_required_arguments_and_body_commands() {
    let validator = ToolValidator::new(&SecurityConfig::default());

    let missing = ToolCall::new("web_search", json!({ "query": "  " }));
    assert!(matches!(
      validator.validate_tool_call(&web_search_tool(), &missing),
      Err(ToolCallError::Validation(_))
    ));

    let from_body = ToolCall::new("execute_command", json!({ "content": "ls | wc" }));
    assert!(matches!(
      validator.validate_tool_call(&execute_command_tool(), &from_body),
      Err(ToolCallError::Security(_))
    ));
  }
}
