// Event Module
pub mod sink;

pub use sink::EventSink;

use chrono::Utc;
use nexus_protocol::{PingEvent, StreamEvent};

/// Keepalive stamped with the current time in milliseconds.
pub fn ping_event() -> StreamEvent {
  StreamEvent::Ping(PingEvent {
    timestamp: Some(Utc::now().timestamp_millis()),
  })
}

/// Message ids are opaque; the engine mints UUIDs.
pub fn generate_message_id() -> String {
  uuid::Uuid::new_v4().to_string()
}
