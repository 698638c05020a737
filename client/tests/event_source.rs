use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nexus_client::{EventSource, StreamConsumer, StreamObserver, StreamStatus, TransportError};

#[derive(Default)]
struct Transitions(Mutex<Vec<StreamStatus>>);

impl StreamObserver for Transitions {
  fn on_status_change(&self, _from: StreamStatus, to: StreamStatus) {
    if let Ok(mut seen) = self.0.lock() {
      seen.push(to);
    }
  }
}

fn sse(body: &str) -> ResponseTemplate {
  ResponseTemplate::new(200)
    .insert_header("content-type", "text/event-stream")
    .set_body_string(body.to_string())
}

#[tokio::test]
async fn consumes_a_complete_run() {
  let server = MockServer::start().await;
  let body = concat!(
    "data: {\"type\":\"connected\"}\n\n",
    ": keepalive comment\n\n",
    "data: {\"type\":\"assistant_chunk\",\"content\":\"Let me \",\"messageId\":\"m1\"}\n\n",
    "data: {\"type\":\"tool_started\",\"toolName\":\"web-search\",\"toolIndex\":0,\"args\":{\"query\":\"AAPL price\"},\"messageId\":\"m1\"}\n\n",
    "data: {\"type\":\"ping\"}\n\n",
    "data: {\"type\":\"tool_completed\",\"toolName\":\"web-search\",\"toolIndex\":0,\"status\":\"success\",\"result\":{\"totalResults\":1},\"messageId\":\"m1\"}\n\n",
    "data: {\"type\":\"tool_completed\",\"toolName\":\"web-search\",\"toolIndex\":0,\"status\":\"success\",\"result\":{\"totalResults\":1},\"messageId\":\"m1\"}\n\n",
    "data: {\"type\":\"message_complete\",\"messageId\":\"m1\",\"content\":\"Let me Done.\"}\n\n",
  );
  Mock::given(method("GET"))
    .and(path("/stream"))
    .respond_with(sse(body))
    .mount(&server)
    .await;

  let transitions = Arc::new(Transitions::default());
  let mut consumer = StreamConsumer::new();
  consumer.subscribe(transitions.clone());

  EventSource::new()
    .run(&format!("{}/stream", server.uri()), &mut consumer)
    .await
    .expect("run completes");

  assert_eq!(consumer.status(), StreamStatus::Completed);
  assert_eq!(consumer.final_message(), Some("Let me Done."));
  assert_eq!(consumer.results().len(), 1);
  let seen = transitions.0.lock().map(|seen| seen.clone()).unwrap_or_default();
  assert_eq!(
    seen,
    vec![
      StreamStatus::Connecting,
      StreamStatus::Streaming,
      StreamStatus::ProcessingTool,
      StreamStatus::Streaming,
      StreamStatus::Completed,
    ]
  );
}

#[tokio::test]
async fn non_success_status_is_a_transport_error() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/stream"))
    .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
    .mount(&server)
    .await;

  let mut consumer = StreamConsumer::new();
  let err = EventSource::new()
    .run(&format!("{}/stream", server.uri()), &mut consumer)
    .await
    .expect_err("503");
  assert!(matches!(err, TransportError::Status { status: 503, .. }));
  assert_eq!(consumer.status(), StreamStatus::Error);
}

#[tokio::test]
async fn malformed_frame_fails_the_run() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/stream"))
    .respond_with(sse(
      "data: {\"type\":\"assistant_chunk\",\"content\":\"hi\",\"messageId\":\"m\"}\n\ndata: {oops\n\n",
    ))
    .mount(&server)
    .await;

  let mut consumer = StreamConsumer::new();
  let err = EventSource::new()
    .run(&format!("{}/stream", server.uri()), &mut consumer)
    .await
    .expect_err("malformed");
  assert!(matches!(err, TransportError::Stream(ref message) if message.starts_with("malformed event")));
  assert_eq!(consumer.streaming_text(), "hi");
}

#[tokio::test]
async fn stream_ending_early_is_closed() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/stream"))
    .respond_with(sse(
      "data: {\"type\":\"assistant_chunk\",\"content\":\"hi\",\"messageId\":\"m\"}\n\n",
    ))
    .mount(&server)
    .await;

  let mut consumer = StreamConsumer::new();
  let err = EventSource::new()
    .run(&format!("{}/stream", server.uri()), &mut consumer)
    .await
    .expect_err("closed");
  assert!(matches!(err, TransportError::Closed));
  assert_eq!(consumer.status(), StreamStatus::Error);
}
