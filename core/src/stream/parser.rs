use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use crate::tools::spec::BodyMode;

static ATTRIBUTE_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
  Regex::new(r#"([A-Za-z_][\w\-:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).ok()
});

static ELEMENT_PATTERN: LazyLock<Option<Regex>> =
  LazyLock::new(|| Regex::new(r"<([A-Za-z_][\w\-]*)\s*>").ok());

/// Argument names that all refer to the same file path.
const PATH_ALIASES: [&str; 3] = ["path", "file_path", "filePath"];

/// Structured form of one tagged block.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
  /// Tag exactly as written.
  pub tag: String,
  /// Identifier form of the tag (`web-search` -> `web_search`).
  pub name: String,
  pub arguments: Map<String, Value>,
  /// Trimmed text between the opening and closing tags.
  pub body: Option<String>,
}

impl ParsedToolCall {
  pub fn arguments_value(&self) -> Value {
    Value::Object(self.arguments.clone())
  }
}

/// Turns a raw block into a [`ParsedToolCall`]. Never fails loudly:
/// malformed input yields `None` and a warning.
#[derive(Debug, Clone, Default)]
pub struct ToolCallParser {
  body_modes: HashMap<String, BodyMode>,
}

impl ToolCallParser {
  pub fn new() -> Self {
    Self::default()
  }

  /// Declares how the body of `tag` is turned into arguments. Tags without
  /// an entry use [`BodyMode::Content`].
  pub fn with_body_mode(mut self, tag: impl Into<String>, mode: BodyMode) -> Self {
    self.body_modes.insert(tag.into(), mode);
    self
  }

  pub fn body_mode(&self, tag: &str) -> BodyMode {
    self
      .body_modes
      .get(tag)
      .copied()
      .unwrap_or(BodyMode::Content)
  }

  pub fn parse(&self, raw: &str) -> Option<ParsedToolCall> {
    match self.parse_inner(raw.trim()) {
      Ok(call) => Some(call),
      Err(reason) => {
        warn!(reason, block = %preview(raw), "skipping malformed tool block");
        None
      }
    }
  }

  fn parse_inner(&self, raw: &str) -> Result<ParsedToolCall, &'static str> {
    let after_lt = raw.strip_prefix('<').ok_or("block does not start with `<`")?;
    let name_len = after_lt
      .find(|ch: char| ch.is_whitespace() || ch == '>' || ch == '/')
      .unwrap_or(after_lt.len());
    let tag = &after_lt[..name_len];
    if tag.is_empty() {
      return Err("empty tag name");
    }

    let (open_end, self_closing) = scan_opening_tag(raw)?;
    let attribute_text = raw[1 + name_len..open_end - 1].trim_end_matches('/');
    let mut arguments = parse_attributes(attribute_text);

    let body = if self_closing {
      if open_end != raw.len() {
        return Err("text after self-closing tag");
      }
      None
    } else {
      let inner = strip_closing_tag(&raw[open_end..], tag)?;
      let trimmed = inner.trim();
      (!trimmed.is_empty()).then(|| trimmed.to_string())
    };

    if let Some(body) = &body {
      match self.body_mode(tag) {
        BodyMode::Content => {
          arguments.insert("content".to_string(), Value::String(body.clone()));
        }
        BodyMode::Structured => {
          let elements = parse_elements(body);
          if elements.is_empty() {
            arguments.insert("content".to_string(), Value::String(body.clone()));
          } else {
            for (key, value) in elements {
              arguments.entry(key).or_insert(Value::String(value));
            }
          }
        }
        BodyMode::None => {}
      }
    }

    mirror_path_aliases(&mut arguments);

    Ok(ParsedToolCall {
      tag: tag.to_string(),
      name: tag.replace('-', "_"),
      arguments,
      body,
    })
  }
}

/// Finds the `>` ending the opening tag while skipping quoted values.
fn scan_opening_tag(raw: &str) -> Result<(usize, bool), &'static str> {
  let mut quote: Option<char> = None;
  let mut previous = '\0';
  for (index, ch) in raw.char_indices() {
    match quote {
      Some(open) if ch == open => quote = None,
      Some(_) => {}
      None if ch == '"' || ch == '\'' => quote = Some(ch),
      None if ch == '>' => return Ok((index + 1, previous == '/')),
      None => {}
    }
    previous = ch;
  }
  if quote.is_some() {
    Err("unterminated attribute quote")
  } else {
    Err("opening tag is never closed")
  }
}

fn strip_closing_tag<'a>(rest: &'a str, tag: &str) -> Result<&'a str, &'static str> {
  let without_gt = rest
    .trim_end()
    .strip_suffix('>')
    .ok_or("missing closing tag")?;
  let close_start = without_gt.rfind("</").ok_or("missing closing tag")?;
  let closing_name = without_gt[close_start + 2..].trim();
  if closing_name != tag {
    return Err("closing tag does not match opening tag");
  }
  Ok(&without_gt[..close_start])
}

fn parse_attributes(text: &str) -> Map<String, Value> {
  let mut arguments = Map::new();
  let Some(pattern) = ATTRIBUTE_PATTERN.as_ref() else {
    return arguments;
  };
  for captures in pattern.captures_iter(text) {
    let Some(key) = captures.get(1) else {
      continue;
    };
    let value = captures
      .get(2)
      .or_else(|| captures.get(3))
      .map(|m| m.as_str())
      .unwrap_or_default();
    arguments.insert(key.as_str().to_string(), Value::String(value.to_string()));
  }
  arguments
}

/// Simple `<key>value</key>` children of a structured body.
fn parse_elements(body: &str) -> Vec<(String, String)> {
  let Some(pattern) = ELEMENT_PATTERN.as_ref() else {
    return Vec::new();
  };
  let mut elements = Vec::new();
  let mut cursor = 0;
  while let Some(captures) = pattern.captures_at(body, cursor) {
    let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
      break;
    };
    let closing = format!("</{}>", name.as_str());
    match body[whole.end()..].find(&closing) {
      Some(offset) => {
        let value_end = whole.end() + offset;
        elements.push((
          name.as_str().to_string(),
          body[whole.end()..value_end].trim().to_string(),
        ));
        cursor = value_end + closing.len();
      }
      None => cursor = whole.end(),
    }
  }
  elements
}

fn mirror_path_aliases(arguments: &mut Map<String, Value>) {
  let Some(value) = PATH_ALIASES
    .iter()
    .find_map(|alias| arguments.get(*alias).cloned())
  else {
    return;
  };
  for alias in PATH_ALIASES {
    arguments
      .entry(alias.to_string())
      .or_insert_with(|| value.clone());
  }
}

fn preview(raw: &str) -> String {
  const LIMIT: usize = 80;
  match raw.char_indices().nth(LIMIT) {
    Some((index, _)) => format!("{}...", &raw[..index]),
    None => raw.to_string(),
  }
}
