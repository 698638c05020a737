// Web Search Handler
// Ranked results plus an optional synthesized answer from the search provider

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use nexus_config::WebSearchConfig;

use crate::tools::context::{ToolCall, ToolCallError, ToolContext, ToolOutput};
use crate::tools::registry::ToolHandler;

const MAX_RESULTS_CAP: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchType {
  General,
  News,
  Financial,
}

impl SearchType {
  fn parse(raw: Option<&str>) -> Result<Self, ToolCallError> {
    match raw.map(str::to_ascii_lowercase).as_deref() {
      None | Some("general") => Ok(SearchType::General),
      Some("news") => Ok(SearchType::News),
      Some("financial") => Ok(SearchType::Financial),
      Some(other) => Err(ToolCallError::Validation(format!(
        "unknown search_type `{other}`; expected general, news or financial"
      ))),
    }
  }

  fn as_str(self) -> &'static str {
    match self {
      SearchType::General => "general",
      SearchType::News => "news",
      SearchType::Financial => "financial",
    }
  }
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
  #[serde(default)]
  answer: Option<String>,
  #[serde(default)]
  results: Vec<ProviderResult>,
}

#[derive(Debug, Deserialize)]
struct ProviderResult {
  #[serde(default)]
  title: String,
  #[serde(default)]
  url: String,
  #[serde(default)]
  content: String,
  #[serde(default)]
  score: Option<f64>,
  #[serde(default)]
  published_date: Option<String>,
}

pub struct WebSearchHandler {
  client: Client,
  config: WebSearchConfig,
  api_key: Option<String>,
}

impl WebSearchHandler {
  /// Uses the inline key when set, else the configured environment variable.
  pub fn from_config(config: &WebSearchConfig) -> Self {
    let api_key = config
      .api_key
      .clone()
      .or_else(|| std::env::var(&config.api_key_env).ok())
      .filter(|key| !key.trim().is_empty());
    if api_key.is_none() {
      debug!(env = %config.api_key_env, "web search api key not set");
    }
    Self::with_api_key(config, api_key)
  }

  pub fn with_api_key(config: &WebSearchConfig, api_key: Option<String>) -> Self {
    let client = Client::builder()
      .timeout(Duration::from_millis(config.timeout_ms))
      .build()
      .unwrap_or_else(|_| Client::new());
    Self {
      client,
      config: config.clone(),
      api_key,
    }
  }

  fn endpoint(&self) -> String {
    format!("{}/search", self.config.base_url.trim_end_matches('/'))
  }

  fn include_domains(&self, search_type: SearchType) -> &[String] {
    match search_type {
      SearchType::General => &[],
      SearchType::News => &self.config.news_domains,
      SearchType::Financial => &self.config.financial_domains,
    }
  }
}

#[async_trait]
impl ToolHandler for WebSearchHandler {
  async fn handle(&self, call: ToolCall, _ctx: &ToolContext) -> Result<ToolOutput, ToolCallError> {
    let query = call
      .str_arg("query")
      .ok_or_else(|| ToolCallError::Validation("missing required argument `query`".to_string()))?;
    let Some(api_key) = self.api_key.as_deref() else {
      return Err(ToolCallError::execution(format!(
        "Web search unavailable: {} not configured",
        self.config.api_key_env
      )));
    };

    let search_type = SearchType::parse(call.str_arg("search_type"))?;
    let max_results = call
      .u64_arg("num_results")?
      .unwrap_or(u64::from(self.config.default_max_results))
      .clamp(1, MAX_RESULTS_CAP);
    let search_depth = call.str_arg("search_depth").unwrap_or("advanced");

    let body = json!({
      "query": query,
      "search_depth": search_depth,
      "include_answer": true,
      "max_results": max_results,
      "include_domains": self.include_domains(search_type),
      "exclude_domains": self.config.excluded_domains,
    });

    let response = self
      .client
      .post(self.endpoint())
      .header("Authorization", format!("Bearer {api_key}"))
      .json(&body)
      .send()
      .await
      .map_err(|e| {
        if e.is_timeout() {
          ToolCallError::Timeout {
            message: format!("Web search timed out after {} ms", self.config.timeout_ms),
            diagnostics: None,
          }
        } else {
          ToolCallError::execution(format!("Web search request failed: {e}"))
        }
      })?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
      warn!(query, "web search rate limited");
      return Err(ToolCallError::execution(
        "Web search rate limited by provider; try again later",
      ));
    }
    if !status.is_success() {
      let text = response.text().await.unwrap_or_default();
      return Err(ToolCallError::Execution {
        message: format!("Search provider error: HTTP {status}"),
        diagnostics: Some(json!({ "status": status.as_u16(), "body": text })),
      });
    }

    let parsed: ProviderResponse = response
      .json()
      .await
      .map_err(|e| ToolCallError::execution(format!("invalid search provider response: {e}")))?;

    let summary = render_summary(query, &parsed);
    let results: Vec<Value> = parsed
      .results
      .iter()
      .map(|result| {
        json!({
          "title": result.title,
          "url": result.url,
          "snippet": result.content,
          "score": result.score,
          "publishedDate": result.published_date,
        })
      })
      .collect();

    Ok(
      ToolOutput::new(json!({
        "query": query,
        "searchType": search_type.as_str(),
        "answer": parsed.answer,
        "totalResults": results.len(),
        "results": results,
      }))
      .with_summary(summary),
    )
  }
}

fn render_summary(query: &str, response: &ProviderResponse) -> String {
  let mut out = format!("# Search results for \"{query}\"\n");
  if let Some(answer) = response.answer.as_deref().filter(|a| !a.trim().is_empty()) {
    out.push_str(&format!("\n## Summary\n{answer}\n"));
  }
  if response.results.is_empty() {
    out.push_str("\nNo results found.\n");
    return out;
  }
  out.push_str("\n## Sources\n");
  for (index, result) in response.results.iter().enumerate() {
    out.push_str(&format!("{}. [{}]({})\n", index + 1, result.title, result.url));
    if !result.content.is_empty() {
      out.push_str(&format!("   {}\n", result.content));
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use wiremock::matchers::{body_partial_json, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  use super::*;
  use crate::tools::context::FailureKind;

  fn config(base_url: &str) -> WebSearchConfig {
    WebSearchConfig {
      base_url: base_url.to_string(),
      ..WebSearchConfig::default()
    }
  }

  fn ctx() -> ToolContext {
    ToolContext::new("conv", "msg", 0)
  }

  #[tokio::test]
  async fn financial_search_biases_domains_and_maps_results() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/search"))
      .and(header("Authorization", "Bearer test-key"))
      .and(body_partial_json(json!({
        "query": "AAPL price",
        "max_results": 3,
        "include_answer": true,
        "search_depth": "advanced",
      })))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "answer": "Apple trades near $190.",
        "results": [
          { "title": "AAPL quote", "url": "https://example.com/aapl", "content": "Apple Inc.", "score": 0.9 }
        ]
      })))
      .expect(1)
      .mount(&server)
      .await;

    let handler = WebSearchHandler::with_api_key(&config(&server.uri()), Some("test-key".to_string()));
    let out = handler
      .handle(
        ToolCall::new(
          "web_search",
          json!({ "query": "AAPL price", "num_results": "3", "search_type": "financial" }),
        ),
        &ctx(),
      )
      .await
      .expect("search");

    assert_eq!(out.data["totalResults"], 1);
    assert_eq!(out.data["searchType"], "financial");
    assert_eq!(out.data["results"][0]["snippet"], "Apple Inc.");
    assert_eq!(out.data["answer"], "Apple trades near $190.");
    assert!(
      out
        .human_readable
        .unwrap_or_default()
        .contains("## Summary\nApple trades near $190.")
    );

    let requests = server.received_requests().await.unwrap_or_default();
    let sent: Value = serde_json::from_slice(&requests[0].body).expect("request body");
    assert!(
      sent["include_domains"]
        .as_array()
        .expect("include_domains")
        .contains(&json!("bloomberg.com"))
    );
  }

  #[tokio::test]
  async fn rate_limit_is_a_failed_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/search"))
      .respond_with(ResponseTemplate::new(429))
      .mount(&server)
      .await;

    let handler = WebSearchHandler::with_api_key(&config(&server.uri()), Some("k".to_string()));
    let err = handler
      .handle(ToolCall::new("web_search", json!({ "query": "q" })), &ctx())
      .await
      .expect_err("rate limited");
    assert_eq!(err.kind(), FailureKind::ExecutionFailure);
    assert!(err.to_string().contains("rate limited"));
  }

  #[tokio::test]
  async fn provider_error_keeps_status_in_diagnostics() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/search"))
      .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
      .mount(&server)
      .await;

    let handler = WebSearchHandler::with_api_key(&config(&server.uri()), Some("k".to_string()));
    let err = handler
      .handle(ToolCall::new("web_search", json!({ "query": "q" })), &ctx())
      .await
      .expect_err("server error");
    let diagnostics = err.diagnostics().expect("diagnostics");
    assert_eq!(diagnostics["status"], 500);
    assert_eq!(diagnostics["body"], "boom");
  }

  #[tokio::test]
  async fn missing_api_key_fails_without_a_request() {
    let handler = WebSearchHandler::with_api_key(&config("http://127.0.0.1:9"), None);
    let err = handler
      .handle(ToolCall::new("web_search", json!({ "query": "q" })), &ctx())
      .await
      .expect_err("no key");
    assert_eq!(
      err.to_string(),
      "Web search unavailable: TAVILY_API_KEY not configured"
    );
  }

  #[tokio::test]
  async fn slow_provider_is_a_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/search"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(json!({ "results": [] }))
          .set_delay(Duration::from_millis(500)),
      )
      .mount(&server)
      .await;

    let config = WebSearchConfig {
      timeout_ms: 50,
      ..config(&server.uri())
    };
    let handler = WebSearchHandler::with_api_key(&config, Some("k".to_string()));
    let err = handler
      .handle(ToolCall::new("web_search", json!({ "query": "q" })), &ctx())
      .await
      .expect_err("timeout");
    assert_eq!(err.kind(), FailureKind::Timeout);
  }
}
