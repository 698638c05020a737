use std::pin::Pin;

use futures::{Stream, StreamExt};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info};

use nexus_protocol::{SseDecoder, SseFrame};

use crate::consumer::StreamConsumer;
use crate::state::StreamStatus;

#[derive(Debug, Error)]
pub enum TransportError {
  #[error("request failed: {0}")]
  Request(#[from] reqwest::Error),

  #[error("HTTP {status}: {body}")]
  Status { status: u16, body: String },

  #[error("stream closed before message_complete")]
  Closed,

  #[error("{0}")]
  Stream(String),
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame, TransportError>> + Send>>;

/// SSE event source over HTTP GET.
#[derive(Debug, Clone, Default)]
pub struct EventSource {
  client: Client,
}

impl EventSource {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_client(client: Client) -> Self {
    Self { client }
  }

  /// Opens `url` and yields decoded frames. A non-2xx answer is the single
  /// item of the stream.
  pub fn frames(&self, url: &str) -> FrameStream {
    let request = self
      .client
      .get(url)
      .header("Accept", "text/event-stream")
      .send();

    Box::pin(async_stream::stream! {
        let response = match request.await {
            Ok(response) => response,
            Err(err) => {
                yield Err(TransportError::Request(err));
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            yield Err(TransportError::Status { status: status.as_u16(), body });
            return;
        }

        let mut bytes = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        while let Some(item) = bytes.next().await {
            match item {
                Ok(chunk) => {
                    for frame in decoder.push_bytes(&chunk) {
                        yield Ok(frame);
                    }
                }
                Err(err) => {
                    yield Err(TransportError::Request(err));
                    return;
                }
            }
        }

        for frame in decoder.finish() {
            yield Ok(frame);
        }
    })
  }

  /// Drives `consumer` through one run against `url`. The connection is
  /// dropped as soon as the run reaches a terminal state.
  pub async fn run(&self, url: &str, consumer: &mut StreamConsumer) -> Result<(), TransportError> {
    consumer.start_run();
    info!(url, "opening event stream");

    let mut frames = self.frames(url);
    while let Some(frame) = frames.next().await {
      match frame {
        Ok(frame) => consumer.handle_frame(&frame),
        Err(err) => {
          consumer.fail(err.to_string());
          return Err(err);
        }
      }
      if consumer.status().is_terminal() {
        break;
      }
    }
    drop(frames);

    match consumer.status() {
      StreamStatus::Completed => {
        debug!(message_id = consumer.message_id().unwrap_or_default(), "run completed");
        Ok(())
      }
      StreamStatus::Error => Err(TransportError::Stream(
        consumer.error().unwrap_or("stream failed").to_string(),
      )),
      _ => {
        consumer.fail(TransportError::Closed.to_string());
        Err(TransportError::Closed)
      }
    }
  }
}
