// Nexus Protocol
// Event protocol shared by the orchestration engine and its consumers

pub mod events;
pub mod models;
pub mod sse;

pub use events::{
  AssistantChunkEvent, ErrorEvent, MessageCompleteEvent, PingEvent, StreamEvent,
  ToolCompletedEvent, ToolStartedEvent,
};
pub use models::{InvocationStatus, ToolInvocation, ToolResult, ToolStatus};
pub use sse::{SseDecoder, SseFrame, encode_event};
