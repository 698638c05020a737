//! Server-Sent Events framing for [`StreamEvent`].

use crate::events::StreamEvent;

const FRAME_SEPARATOR: &str = "\n\n";

/// Encodes one event as a `data: <json>\n\n` frame.
pub fn encode_event(event: &StreamEvent) -> serde_json::Result<String> {
  let payload = serde_json::to_string(event)?;
  Ok(format!("data: {payload}{FRAME_SEPARATOR}"))
}

/// One decoded frame: the joined `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
  pub event: Option<String>,
  pub data: String,
}

impl SseFrame {
  /// Parses the payload into a [`StreamEvent`].
  pub fn parse(&self) -> serde_json::Result<StreamEvent> {
    serde_json::from_str(&self.data)
  }
}

/// Stateful SSE decoder. Bytes may arrive split at any point.
#[derive(Debug, Default)]
pub struct SseDecoder {
  buffer: String,
  pending_bytes: Vec<u8>,
}

impl SseDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Feeds one text segment and returns completed frames.
  pub fn push_text(&mut self, text: &str) -> Vec<SseFrame> {
    // Normalize CRLF so a single separator search covers both line endings.
    self.buffer.push_str(&text.replace("\r\n", "\n"));
    self.drain_frames()
  }

  /// Feeds raw bytes. A multi-byte character split across pushes is held
  /// until its remaining bytes arrive.
  pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
    self.pending_bytes.extend_from_slice(bytes);
    let valid_up_to = match std::str::from_utf8(&self.pending_bytes) {
      Ok(_) => self.pending_bytes.len(),
      Err(err) if err.error_len().is_none() => err.valid_up_to(),
      Err(_) => {
        let decoded = String::from_utf8_lossy(&self.pending_bytes).into_owned();
        self.pending_bytes.clear();
        return self.push_text(&decoded);
      }
    };
    let tail = self.pending_bytes.split_off(valid_up_to);
    let complete = std::mem::replace(&mut self.pending_bytes, tail);
    let decoded = String::from_utf8_lossy(&complete).into_owned();
    self.push_text(&decoded)
  }

  /// Flushes whatever is left once the underlying stream ends.
  pub fn finish(&mut self) -> Vec<SseFrame> {
    if !self.pending_bytes.is_empty() {
      let rest = String::from_utf8_lossy(&self.pending_bytes).into_owned();
      self.pending_bytes.clear();
      self.buffer.push_str(&rest);
    }
    let remaining = std::mem::take(&mut self.buffer);
    parse_frame(&remaining).into_iter().collect()
  }

  fn drain_frames(&mut self) -> Vec<SseFrame> {
    let mut frames = Vec::new();
    while let Some(idx) = self.buffer.find(FRAME_SEPARATOR) {
      let raw = self.buffer[..idx].to_string();
      self.buffer.drain(..idx + FRAME_SEPARATOR.len());
      if let Some(frame) = parse_frame(&raw) {
        frames.push(frame);
      }
    }
    frames
  }
}

fn parse_frame(raw: &str) -> Option<SseFrame> {
  let mut event = None;
  let mut data_lines: Vec<&str> = Vec::new();

  for line in raw.lines() {
    if line.is_empty() || line.starts_with(':') {
      continue;
    }
    let (field, value) = match line.split_once(':') {
      Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
      None => (line, ""),
    };
    match field {
      "data" => data_lines.push(value),
      "event" => event = Some(value.to_string()),
      _ => {}
    }
  }

  if data_lines.is_empty() {
    return None;
  }
  Some(SseFrame {
    event,
    data: data_lines.join("\n"),
  })
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::events::{AssistantChunkEvent, PingEvent};

  #[test]
  fn encode_produces_single_data_frame() {
    let frame = encode_event(&StreamEvent::Ping(PingEvent::default())).expect("encode ping");
    assert_eq!(frame, "data: {\"type\":\"ping\"}\n\n");
  }

  #[test]
  fn decoder_handles_frames_split_across_pushes() {
    let event = StreamEvent::AssistantChunk(AssistantChunkEvent {
      content: "Let me ".to_string(),
      message_id: "m1".to_string(),
    });
    let encoded = encode_event(&event).expect("encode chunk");
    let (head, tail) = encoded.split_at(9);

    let mut decoder = SseDecoder::new();
    assert!(decoder.push_text(head).is_empty());
    let frames = decoder.push_text(tail);

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].parse().expect("parse frame"), event);
  }

  #[test]
  fn decoder_skips_comments_and_joins_multiline_data() {
    let mut decoder = SseDecoder::new();
    let frames = decoder.push_text(": keep-alive\n\ndata: {\"type\":\ndata: \"ping\"}\r\n\r\n");

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data, "{\"type\":\n\"ping\"}");
    assert_eq!(
      frames[0].parse().expect("parse ping"),
      StreamEvent::Ping(PingEvent::default())
    );
  }

  #[test]
  fn decoder_holds_split_utf8_sequence() {
    let payload = "data: {\"type\":\"error\",\"message\":\"é\"}\n\n".as_bytes();
    let split = payload
      .iter()
      .position(|byte| *byte == 0xC3)
      .expect("multibyte lead")
      + 1;

    let mut decoder = SseDecoder::new();
    assert!(decoder.push_bytes(&payload[..split]).is_empty());
    let frames = decoder.push_bytes(&payload[split..]);
    assert_eq!(frames.len(), 1);
    assert!(frames[0].data.contains('é'));
  }

  #[test]
  fn finish_flushes_unterminated_frame() {
    let mut decoder = SseDecoder::new();
    assert!(decoder.push_text("data: {\"type\":\"connected\"}").is_empty());
    let frames = decoder.finish();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].parse().expect("parse"), StreamEvent::Connected);
  }
}
