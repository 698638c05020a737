use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// JSON schema representation for tool input contracts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonSchema {
  String {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    allowed: Option<Vec<String>>,
  },
  Number {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
  },
  Boolean {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
  },
  Object {
    properties: BTreeMap<String, JsonSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<Vec<String>>,
  },
}

impl JsonSchema {
  pub fn to_value(&self) -> serde_json::Value {
    serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
  }
}

/// How the text between a tag's opening and closing markers is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyMode {
  /// The trimmed body becomes the `content` argument.
  Content,
  /// `<key>value</key>` children become arguments.
  Structured,
  /// Attribute-only tool; the body is ignored.
  None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
  /// Stable internal identifier.
  pub name: String,
  pub description: String,
  pub input_schema: JsonSchema,
  /// Tag names a model may emit for this tool; the first is canonical.
  pub surface_tags: Vec<String>,
  pub body: BodyMode,
  pub requires_sandbox: bool,
  /// The `command` argument is subject to the command policy.
  pub executes_commands: bool,
  /// Child elements shown in the usage example of a structured body.
  #[serde(default)]
  pub body_fields: Vec<String>,
}

impl ToolSpec {
  pub fn new(
    name: impl Into<String>,
    description: impl Into<String>,
    input_schema: JsonSchema,
    surface_tags: &[&str],
    body: BodyMode,
  ) -> Self {
    Self {
      name: name.into(),
      description: description.into(),
      input_schema,
      surface_tags: surface_tags.iter().map(|tag| tag.to_string()).collect(),
      body,
      requires_sandbox: false,
      executes_commands: false,
      body_fields: Vec::new(),
    }
  }

  pub fn with_sandbox(mut self) -> Self {
    self.requires_sandbox = true;
    self
  }

  pub fn with_command_policy(mut self) -> Self {
    self.executes_commands = true;
    self
  }

  pub fn with_body_fields(mut self, fields: &[&str]) -> Self {
    self.body_fields = fields.iter().map(|field| field.to_string()).collect();
    self
  }

  pub fn required_arguments(&self) -> &[String] {
    match &self.input_schema {
      JsonSchema::Object {
        required: Some(required),
        ..
      } => required,
      _ => &[],
    }
  }

  pub fn canonical_tag(&self) -> &str {
    self
      .surface_tags
      .first()
      .map(String::as_str)
      .unwrap_or(self.name.as_str())
  }

  /// One-line usage example in the tag syntax the extractor recognizes.
  pub fn usage_example(&self) -> String {
    let tag = self.canonical_tag();
    let attributes = match &self.input_schema {
      JsonSchema::Object { properties, .. } => properties
        .keys()
        .filter(|key| key.as_str() != "content" && !self.body_fields.contains(key))
        .filter(|key| self.required_arguments().contains(key))
        .map(|key| format!(" {key}=\"...\""))
        .collect::<String>(),
      _ => String::new(),
    };
    match self.body {
      BodyMode::Content => format!("<{tag}{attributes}>...</{tag}>"),
      BodyMode::Structured => {
        let children: String = self
          .body_fields
          .iter()
          .map(|field| format!("<{field}>...</{field}>"))
          .collect();
        format!("<{tag}{attributes}>{children}</{tag}>")
      }
      BodyMode::None => format!("<{tag}{attributes}></{tag}>"),
    }
  }
}

pub fn build_specs() -> Vec<ToolSpec> {
  vec![
    create_file_tool(),
    execute_command_tool(),
    web_search_tool(),
    sandbox_tool(),
    delete_file_tool(),
    list_files_tool(),
    read_file_tool(),
    str_replace_tool(),
    web_scrape_tool(),
  ]
}

fn obj(properties: BTreeMap<String, JsonSchema>, required: &[&str]) -> JsonSchema {
  JsonSchema::Object {
    properties,
    required: if required.is_empty() {
      None
    } else {
      Some(required.iter().map(|s| s.to_string()).collect())
    },
  }
}

fn str_field(desc: &str) -> JsonSchema {
  JsonSchema::String {
    description: Some(desc.to_string()),
    allowed: None,
  }
}

fn enum_field(desc: &str, values: &[&str]) -> JsonSchema {
  JsonSchema::String {
    description: Some(desc.to_string()),
    allowed: Some(values.iter().map(|s| s.to_string()).collect()),
  }
}

fn int_field(desc: &str) -> JsonSchema {
  JsonSchema::Number {
    description: Some(desc.to_string()),
  }
}

fn bool_field(desc: &str) -> JsonSchema {
  JsonSchema::Boolean {
    description: Some(desc.to_string()),
  }
}

pub fn create_file_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert("path".to_string(), str_field("File path relative to the workspace"));
  props.insert("content".to_string(), str_field("File content (tag body)"));
  ToolSpec::new(
    "create_file",
    "Create or overwrite a file in the conversation workspace",
    obj(props, &["path"]),
    &["create-file", "file-create", "write-file", "full-file-rewrite"],
    BodyMode::Content,
  )
  .with_sandbox()
}

pub fn execute_command_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert(
    "command".to_string(),
    str_field("Command line to run; the tag body is used when absent"),
  );
  props.insert("workdir".to_string(), str_field("Working directory inside the workspace"));
  props.insert("timeout".to_string(), int_field("Timeout in milliseconds"));
  props.insert("network".to_string(), bool_field("Allow network access"));
  ToolSpec::new(
    "execute_command",
    "Run an allowlisted command inside the conversation workspace",
    obj(props, &[]),
    &["execute-command"],
    BodyMode::Content,
  )
  .with_sandbox()
  .with_command_policy()
}

pub fn web_search_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert("query".to_string(), str_field("Search query"));
  props.insert("num_results".to_string(), int_field("Maximum number of results"));
  props.insert(
    "search_type".to_string(),
    enum_field("Domain bias", &["general", "news", "financial"]),
  );
  props.insert(
    "search_depth".to_string(),
    enum_field("Provider search depth", &["basic", "advanced"]),
  );
  ToolSpec::new(
    "web_search",
    "Search the web and return ranked results with an optional answer",
    obj(props, &["query"]),
    &["web-search"],
    BodyMode::None,
  )
}

pub fn sandbox_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert(
    "action".to_string(),
    enum_field(
      "Sandbox action",
      &["create-file", "list-files", "execute-command", "delete-file"],
    ),
  );
  props.insert("path".to_string(), str_field("Target path for file actions"));
  props.insert("content".to_string(), str_field("File content for create-file"));
  props.insert("command".to_string(), str_field("Command for execute-command"));
  props.insert("workdir".to_string(), str_field("Working directory for execute-command"));
  ToolSpec::new(
    "sandbox",
    "Perform an action inside the conversation's isolated environment",
    obj(props, &["action"]),
    &["sandbox", "daytona-sandbox", "development-environment"],
    BodyMode::Structured,
  )
  .with_sandbox()
  .with_command_policy()
  .with_body_fields(&["command"])
}

pub fn delete_file_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert("path".to_string(), str_field("File path relative to the workspace"));
  ToolSpec::new(
    "delete_file",
    "Delete a file from the conversation workspace",
    obj(props, &["path"]),
    &["delete-file"],
    BodyMode::None,
  )
  .with_sandbox()
}

pub fn list_files_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert("path".to_string(), str_field("Directory relative to the workspace"));
  ToolSpec::new(
    "list_files",
    "List a directory in the conversation workspace",
    obj(props, &[]),
    &["list-files"],
    BodyMode::None,
  )
  .with_sandbox()
}

pub fn read_file_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert("path".to_string(), str_field("File path relative to the workspace"));
  ToolSpec::new(
    "read_file",
    "Read a UTF-8 text file from the conversation workspace",
    obj(props, &["path"]),
    &["read-file"],
    BodyMode::None,
  )
  .with_sandbox()
}

pub fn str_replace_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert("path".to_string(), str_field("File path relative to the workspace"));
  props.insert(
    "old_str".to_string(),
    str_field("Text to replace; must occur exactly once"),
  );
  props.insert("new_str".to_string(), str_field("Replacement text"));
  ToolSpec::new(
    "str_replace",
    "Replace one exact occurrence of a string in a workspace file",
    obj(props, &["path", "old_str"]),
    &["str-replace"],
    BodyMode::Structured,
  )
  .with_sandbox()
  .with_body_fields(&["old_str", "new_str"])
}

pub fn web_scrape_tool() -> ToolSpec {
  let mut props = BTreeMap::new();
  props.insert("url".to_string(), str_field("http or https page to fetch"));
  props.insert(
    "selector".to_string(),
    str_field("CSS selector of the elements to keep; defaults to body"),
  );
  ToolSpec::new(
    "web_scrape",
    "Fetch a web page and return the text of the selected elements",
    obj(props, &["url"]),
    &["web-scrape", "scrape-webpage"],
    BodyMode::None,
  )
}
