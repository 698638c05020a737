// Web Scrape Handler
// Fetches one page and reduces the selected element to plain text

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Node, Selector};
use serde_json::json;
use tracing::debug;

use nexus_config::WebScrapeConfig;

use crate::tools::context::{ToolCall, ToolCallError, ToolContext, ToolOutput};
use crate::tools::registry::ToolHandler;

const DEFAULT_SELECTOR: &str = "body";
const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Text pulled out of a page.
#[derive(Debug, Clone, PartialEq)]
struct PageText {
  title: Option<String>,
  content: String,
  matches: usize,
}

pub struct WebScrapeHandler {
  client: Client,
  config: WebScrapeConfig,
}

impl WebScrapeHandler {
  pub fn new(config: &WebScrapeConfig) -> Self {
    let client = Client::builder()
      .timeout(Duration::from_millis(config.timeout_ms))
      .user_agent(config.user_agent.clone())
      .build()
      .unwrap_or_else(|_| Client::new());
    Self {
      client,
      config: config.clone(),
    }
  }
}

/// Text of every element matching `selector`, one element per line.
/// Script and style contents are dropped and whitespace is collapsed.
fn extract_text(html: &str, selector: &str) -> Result<PageText, ToolCallError> {
  let selector = Selector::parse(selector)
    .map_err(|e| ToolCallError::Validation(format!("invalid selector `{selector}`: {e}")))?;
  let document = Html::parse_document(html);

  let title = Selector::parse("title").ok().and_then(|title_selector| {
    document
      .select(&title_selector)
      .next()
      .map(|title| collapse_whitespace(&title.text().collect::<String>()))
      .filter(|title| !title.is_empty())
  });

  let mut lines = Vec::new();
  for element in document.select(&selector) {
    let mut text = String::new();
    for node in element.descendants() {
      let Node::Text(piece) = node.value() else {
        continue;
      };
      let hidden = node.ancestors().any(|ancestor| {
        ancestor
          .value()
          .as_element()
          .is_some_and(|element| SKIPPED_ELEMENTS.contains(&element.name()))
      });
      if !hidden {
        text.push_str(piece);
        text.push(' ');
      }
    }
    let text = collapse_whitespace(&text);
    if !text.is_empty() {
      lines.push(text);
    }
  }

  Ok(PageText {
    title,
    matches: lines.len(),
    content: lines.join("\n"),
  })
}

fn collapse_whitespace(text: &str) -> String {
  text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cuts `text` to at most `max_chars` characters.
fn truncate_chars(text: &mut String, max_chars: usize) -> bool {
  match text.char_indices().nth(max_chars) {
    Some((index, _)) => {
      text.truncate(index);
      true
    }
    None => false,
  }
}

#[async_trait]
impl ToolHandler for WebScrapeHandler {
  async fn handle(&self, call: ToolCall, _ctx: &ToolContext) -> Result<ToolOutput, ToolCallError> {
    let url = call
      .str_arg("url")
      .ok_or_else(|| ToolCallError::Validation("missing required argument `url`".to_string()))?;
    let parsed = reqwest::Url::parse(url)
      .map_err(|e| ToolCallError::Validation(format!("invalid url `{url}`: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
      return Err(ToolCallError::Validation(format!(
        "only http and https urls can be scraped, got `{}`",
        parsed.scheme()
      )));
    }
    let selector = call.str_arg("selector").unwrap_or(DEFAULT_SELECTOR);

    let response = self.client.get(parsed).send().await.map_err(|e| {
      if e.is_timeout() {
        ToolCallError::Timeout {
          message: format!("Scrape of {url} timed out after {} ms", self.config.timeout_ms),
          diagnostics: None,
        }
      } else {
        ToolCallError::execution(format!("Scrape request failed: {e}"))
      }
    })?;

    let status = response.status();
    if !status.is_success() {
      return Err(ToolCallError::Execution {
        message: format!("Scrape of {url} failed: HTTP {status}"),
        diagnostics: Some(json!({ "status": status.as_u16(), "url": url })),
      });
    }
    let html = response
      .text()
      .await
      .map_err(|e| ToolCallError::execution(format!("failed to read page body: {e}")))?;

    let mut page = extract_text(&html, selector)?;
    if page.matches == 0 {
      return Err(ToolCallError::execution(format!(
        "selector `{selector}` matched no text on {url}"
      )));
    }
    let truncated = truncate_chars(&mut page.content, self.config.max_content_chars);
    debug!(url, selector, matches = page.matches, truncated, "scraped page");

    let summary = format!(
      "Scraped {} ({} characters from {} element(s))",
      page.title.as_deref().unwrap_or(url),
      page.content.chars().count(),
      page.matches
    );
    Ok(
      ToolOutput::new(json!({
        "url": url,
        "selector": selector,
        "title": page.title,
        "content": page.content,
        "matches": page.matches,
        "truncated": truncated,
      }))
      .with_summary(summary),
    )
  }
}
